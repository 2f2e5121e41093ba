//! Contract between the build and a source-to-class compiler.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::abi::UnitName;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub source_root: PathBuf,
    /// Paths relative to `source_root`, `/`-separated.
    pub sources: Vec<String>,
    pub classpath: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Classes written for each input source.
    pub produced: BTreeMap<String, BTreeSet<UnitName>>,
    pub success: bool,
    /// Compiler messages for each failing source.
    pub diagnostics: BTreeMap<String, Vec<String>>,
}

impl CompileOutcome {
    /// Per-source status for every source of `request`. In a failed batch a
    /// source without diagnostics of its own compiled cleanly, unless no
    /// source was blamed at all.
    pub fn statuses(&self, request: &CompileRequest) -> BTreeMap<String, UnitStatus> {
        let unattributed_failure = !self.success && self.diagnostics.is_empty();
        request
            .sources
            .iter()
            .map(|source| {
                let status = match self.diagnostics.get(source) {
                    Some(messages) => UnitStatus::Failed(messages.clone()),
                    None if unattributed_failure => UnitStatus::Failed(Vec::new()),
                    None => UnitStatus::Ok,
                };
                (source.clone(), status)
            })
            .collect()
    }
}

/// Result of compiling one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "diagnostics", rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Failed(Vec<String>),
}

impl UnitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Combines two results for the same source; a failure wins.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failed(mut a), Self::Failed(b)) => {
                a.extend(b);
                Self::Failed(a)
            }
            (Self::Failed(a), Self::Ok) | (Self::Ok, Self::Failed(a)) => Self::Failed(a),
            (Self::Ok, Self::Ok) => Self::Ok,
        }
    }
}

pub trait CompilerPort {
    /// Compiles `request.sources` into `request.destination`. Compile errors
    /// are reported in the outcome; `Err` means the compiler could not run.
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutcome>;
}
