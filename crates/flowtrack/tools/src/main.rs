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

//! Flowtrack CLI

use clap::{Parser, Subcommand};
use flowtrack_tools::cli::run::{RunArgs, run_method};
use flowtrack_tools::cli::weave::{WeaveArgs, run_weave};
use tracing::Level;

#[derive(Parser)]
#[command(name = "flowtrack")]
#[command(about = "Flowtrack - provenance tracking for stack-machine classes")]
#[command(version = "0.1.0")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument a class
    Weave(WeaveArgs),
    /// Weave a class and run one of its methods
    Run(RunArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Weave(args) => run_weave(args)?,
        Commands::Run(args) => run_method(args)?,
    }

    Ok(())
}
