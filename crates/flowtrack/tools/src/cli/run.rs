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

//! `flowtrack run`: weave a class, call one of its methods, and show what the
//! provenance store learned about the arrays and strings involved

use super::{load_class, load_config};
use crate::error::{ToolError, ToolResult};
use clap::Args;
use flowtrack_core::{Tracker, TrackerRepository, TrackerSnapshot};
use flowtrack_runtime::{Executor, ExecutorConfig, HeapObject, Value};
use flowtrack_weaver::{Type, Weaver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Class to run, in JSON form
    #[arg(value_name = "CLASS_FILE")]
    pub input: PathBuf,

    /// Method to call
    #[arg(short, long)]
    pub method: String,

    /// Descriptor of the method, e.g. `([C[C)V`
    #[arg(short, long)]
    pub desc: String,

    /// Arguments: an integer, `null`, `str:TEXT`, `chars:TEXT` for a char array whose
    /// contents originate from a fresh tracker, or `buffer:N` for an empty char array
    #[arg(short, long = "arg")]
    pub args: Vec<String>,

    /// Weaver configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run the class as loaded, without weaving it
    #[arg(long)]
    pub no_weave: bool,
}

/// Parsed command-line argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgInput {
    Int(i32),
    Null,
    Str(String),
    Chars(String),
    Buffer(usize),
}

impl ArgInput {
    pub fn parse(text: &str) -> ToolResult<Self> {
        if text == "null" {
            return Ok(ArgInput::Null);
        }
        if let Some(rest) = text.strip_prefix("str:") {
            return Ok(ArgInput::Str(rest.to_string()));
        }
        if let Some(rest) = text.strip_prefix("chars:") {
            return Ok(ArgInput::Chars(rest.to_string()));
        }
        if let Some(rest) = text.strip_prefix("buffer:") {
            return rest.parse().map(ArgInput::Buffer).map_err(|_| ToolError::InvalidArgument(text.to_string()));
        }
        text.parse().map(ArgInput::Int).map_err(|_| ToolError::InvalidArgument(text.to_string()))
    }
}

/// An array or string whose provenance is reported after the run
#[derive(Debug)]
pub struct Observed {
    pub label: String,
    pub object: Arc<HeapObject>,
    pub origin: Option<Arc<Tracker>>,
}

impl Observed {
    pub fn snapshot(&self, repository: &TrackerRepository) -> Option<TrackerSnapshot> {
        repository.get_tracker(&self.object).map(|tracker| tracker.snapshot())
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub result: Option<Value>,
    pub observed: Vec<Observed>,
}

pub fn run_file(args: &RunArgs) -> ToolResult<RunOutcome> {
    let mut class = load_class(&args.input)?;
    if !args.no_weave {
        let weaver = Weaver::new(load_config(args.config.as_deref())?)?;
        let (woven, report) = weaver.weave_class(&class);
        for failure in &report.failed {
            warn!(method = %failure.method, error = %failure.error, "running uninstrumented");
        }
        class = woven;
    }
    let owner = class.name.clone();

    let repository = TrackerRepository::global();
    let mut observed = Vec::new();
    let mut values = Vec::with_capacity(args.args.len());
    for (index, text) in args.args.iter().enumerate() {
        let value = match ArgInput::parse(text)? {
            ArgInput::Int(value) => Value::Int(value),
            ArgInput::Null => Value::Null,
            ArgInput::Str(text) => Value::Ref(HeapObject::string(&text)),
            ArgInput::Chars(text) => {
                let array = HeapObject::char_array(&text);
                let origin = Tracker::origin();
                origin.set_descriptor(format!("argument {index}"));
                if let Err(error) = origin.append(text.as_bytes()) {
                    warn!(%error, index, "argument left untracked");
                }
                repository.set_tracker(&array, origin.clone());
                observed.push(Observed { label: format!("argument {index}"), object: array.clone(), origin: Some(origin) });
                Value::Ref(array)
            }
            ArgInput::Buffer(length) => {
                let array = HeapObject::new_array(Type::Char, length);
                observed.push(Observed { label: format!("argument {index}"), object: array.clone(), origin: None });
                Value::Ref(array)
            }
        };
        values.push(value);
    }

    let mut executor = Executor::new().with_config(ExecutorConfig::from_env());
    executor.load_class(class);
    debug!(owner = %owner, method = %args.method, desc = %args.desc, "invoking");
    let result = executor.invoke(&owner, &args.method, &args.desc, values)?;

    if let Some(Value::Ref(object)) = &result {
        observed.push(Observed { label: "result".to_string(), object: object.clone(), origin: None });
    }
    Ok(RunOutcome { result, observed })
}

pub fn run_method(args: RunArgs) -> ToolResult<()> {
    let outcome = run_file(&args)?;
    match &outcome.result {
        Some(value) => println!("result: {value}"),
        None => println!("result: (void)"),
    }

    let repository = TrackerRepository::global();
    for observed in &outcome.observed {
        let text = observed.object.text().unwrap_or_else(|| format!("{:?}", observed.object));
        match &observed.origin {
            Some(origin) => println!("{} {:?} (origin tracker {})", observed.label, text, origin.id()),
            None => println!("{} {:?}", observed.label, text),
        }
        match observed.snapshot(&repository) {
            Some(snapshot) => println!("{}", snapshot.to_json()?),
            None => println!("  no provenance recorded"),
        }
    }
    Ok(())
}
