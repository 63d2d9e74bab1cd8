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

//! Weaving whole classes
//!
//! Each method is analyzed and instrumented on its own. A method that cannot be
//! analyzed or instrumented is passed through unchanged and reported; it never stops
//! the rest of the class from being woven.

use crate::analysis::FlowAnalyzer;
use crate::config::WeaverConfig;
use crate::error::{WeaveError, WeaveResult};
use crate::filter::ClassFilter;
use crate::instrument::{find_store_sites, required_stack, ConstantPool, Synthesizer};
use crate::ir::{Class, Method};
use flowtrack_core::ConstantRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodFailure {
    pub method: String,
    pub error: String,
}

/// What happened to one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeaveReport {
    pub class_name: String,
    pub included: bool,
    pub instrumented: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<MethodFailure>,
    /// Number of store sites per kind
    pub sites: BTreeMap<String, usize>,
    /// Id of the class's constant table, if it got one
    pub constant_table: Option<u32>,
}

pub struct Weaver {
    config: WeaverConfig,
    filter: ClassFilter,
    interning: ClassFilter,
    registry: Arc<ConstantRegistry>,
}

impl Weaver {
    pub fn new(config: WeaverConfig) -> WeaveResult<Self> {
        config.validate()?;
        Ok(Self {
            filter: ClassFilter::parse(&config.filter)?,
            interning: ClassFilter::parse(&config.break_string_interning)?,
            registry: ConstantRegistry::global(),
            config,
        })
    }

    /// Uses `registry` for constant tables instead of the process-wide one
    pub fn with_registry(mut self, registry: Arc<ConstantRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConstantRegistry> {
        &self.registry
    }

    pub fn weave_class(&self, class: &Class) -> (Class, WeaveReport) {
        let mut report = WeaveReport { class_name: class.name.clone(), ..Default::default() };
        if !self.filter.include(&class.name) {
            debug!(class = %class.name, "excluded by filter");
            report.unchanged = class.methods.iter().map(Method::signature).collect();
            return (class.clone(), report);
        }
        report.included = true;

        let break_interning = self.interning.include(&class.name);
        let mut pool = ConstantPool::new(self.registry.clone(), &class.name);
        let mut methods = Vec::with_capacity(class.methods.len());

        for method in &class.methods {
            match self.weave_method(method, &mut pool, break_interning, &mut report.sites) {
                Ok(Some(woven)) => {
                    report.instrumented.push(method.signature());
                    methods.push(woven);
                }
                Ok(None) => {
                    report.unchanged.push(method.signature());
                    methods.push(method.clone());
                }
                Err(error) => {
                    warn!(class = %class.name, method = %method.signature(), %error, "leaving method uninstrumented");
                    report.failed.push(MethodFailure { method: method.signature(), error: error.to_string() });
                    methods.push(method.clone());
                }
            }
        }

        report.constant_table = pool.table().map(|table| table.class_id());
        info!(
            class = %class.name,
            instrumented = report.instrumented.len(),
            failed = report.failed.len(),
            "woven"
        );
        (Class { name: class.name.clone(), methods }, report)
    }

    /// Instruments one method; `None` if it needs no change
    pub fn weave_method(
        &self,
        method: &Method,
        pool: &mut ConstantPool,
        break_interning: bool,
        sites_by_kind: &mut BTreeMap<String, usize>,
    ) -> WeaveResult<Option<Method>> {
        let analysis = FlowAnalyzer::new()
            .with_order(self.config.solver_order)
            .with_max_iterations(self.config.max_iterations)
            .analyze(method)?;

        let sites = find_store_sites(method, &analysis, break_interning);
        if sites.is_empty() {
            return Ok(None);
        }

        let mut synth = Synthesizer::new(method, &analysis, pool);
        for site in &sites {
            site.instrument(&mut synth)?;
        }
        if !synth.has_edits() {
            return Ok(None);
        }
        let woven = synth.finish();

        let required = required_stack(&woven)?;
        if required > usize::from(woven.max_stack) {
            return Err(WeaveError::Unsupported {
                insn: 0,
                reason: format!("woven code needs stack depth {required} but reports {}", woven.max_stack),
            });
        }

        for site in &sites {
            *sites_by_kind.entry(site.kind().to_string()).or_default() += 1;
        }
        debug!(
            method = %method.signature(),
            sites = sites.len(),
            iterations = analysis.iterations,
            max_stack = woven.max_stack,
            max_locals = woven.max_locals,
            "instrumented"
        );
        Ok(Some(woven))
    }
}
