// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! `flowtrack weave`: instrument a class and show the result

use super::{load_class, load_config};
use crate::error::ToolResult;
use clap::Args;
use flowtrack_weaver::{Class, WeaveReport, Weaver};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct WeaveArgs {
    /// Class to weave, in JSON form
    #[arg(value_name = "CLASS_FILE")]
    pub input: PathBuf,

    /// Weaver configuration file; defaults to FLOWTRACK_* environment variables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where to write the woven class
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the weave report as JSON
    #[arg(short, long)]
    pub report: bool,

    /// Do not print the listing of the woven class
    #[arg(short, long)]
    pub quiet: bool,
}

/// Weaves the input class, writing it out if an output is given
pub fn weave_file(args: &WeaveArgs) -> ToolResult<(Class, WeaveReport)> {
    let class = load_class(&args.input)?;
    let config = load_config(args.config.as_deref())?;
    let weaver = Weaver::new(config)?;
    let (woven, report) = weaver.weave_class(&class);

    if let Some(output) = &args.output {
        std::fs::write(output, serde_json::to_string_pretty(&woven)?)?;
        info!(output = %output.display(), "wrote woven class");
    }
    Ok((woven, report))
}

pub fn run_weave(args: WeaveArgs) -> ToolResult<()> {
    let (woven, report) = weave_file(&args)?;
    if !args.quiet {
        print!("{}", woven.listing());
    }
    if args.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    for failure in &report.failed {
        eprintln!("left uninstrumented: {}: {}", failure.method, failure.error);
    }
    Ok(())
}
