//! One incremental build, from change detection to committed state.
//!
//! ```text
//! Idle → ChangeDetected → NoOp | ColdBuild | IncrementalBuild → Committed | RolledBack
//! ```
//!
//! An incremental build compiles the changed sources, diffs the ABI of every
//! class they produced or lost, and recompiles the direct dependants of the
//! classes whose ABI changed incompatibly. Dependants are recompiled once;
//! their own ABI changes are not followed further. A globally incompatible
//! change (an inlinable constant changed or disappeared) abandons the
//! incremental attempt and recompiles everything.
//!
//! A failed build puts back every class file it overwrote or deleted, so the
//! next build diffs against the same "before" state and redoes the same work.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::abi::{AbiSnapshot, UnitName};
use crate::classmap::ClassMap;
use crate::compat::{AbiCompatibilityChecker, CompatibilityLevel};
use crate::compiler::{CompileOutcome, CompileRequest, CompilerPort, UnitStatus};
use crate::error::{IoContext, Result};
use crate::graph::DependencyGraphBuilder;
use crate::reader::{BinaryUnitReader, capture_snapshot};
use crate::store::{ClassMapStore, FingerprintStore};
use crate::tracker::{ChangedSourceSet, Fingerprinter, SourceChangeTracker, Transaction};

/// Everything a build talks to.
pub struct Ports<'a> {
    pub compiler: &'a dyn CompilerPort,
    pub reader: &'a dyn BinaryUnitReader,
    pub fingerprints: &'a dyn FingerprintStore,
    pub fingerprinter: Fingerprinter,
    pub class_maps: &'a dyn ClassMapStore,
    pub graphs: &'a dyn DependencyGraphBuilder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub source_root: PathBuf,
    pub destination: PathBuf,
    pub classpath: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    NoOp,
    Cold,
    Incremental,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub changes: ChangedSourceSet,
    /// Status of every source compiled during the build.
    pub units: BTreeMap<String, UnitStatus>,
    /// Sources recompiled only because a class they use changed.
    pub dependants: BTreeSet<String>,
    pub success: bool,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn compiled(&self) -> usize {
        self.units.len()
    }
}

/// Result of the build phases before anything is persisted.
struct Phase {
    mode: BuildMode,
    class_map: ClassMap,
    units: BTreeMap<String, UnitStatus>,
    dependants: BTreeSet<String>,
    success: bool,
}

enum Attempt {
    Finished(Phase),
    GloballyIncompatible,
}

pub struct IncrementalBuilder<'a> {
    ports: Ports<'a>,
}

impl<'a> IncrementalBuilder<'a> {
    pub fn new(ports: Ports<'a>) -> Self {
        Self { ports }
    }

    pub fn run(&self, request: &BuildRequest) -> Result<BuildReport> {
        let started = Instant::now();
        let tracker = SourceChangeTracker::new(self.ports.fingerprints, self.ports.fingerprinter);
        let mut txn = tracker.begin(&request.source_root)?;

        let changes = match txn.list_changed_files() {
            Ok(changes) => changes.clone(),
            Err(e) => {
                txn.rollback();
                return Err(e);
            }
        };
        if changes.is_empty() {
            info!("no source changes");
            txn.rollback();
            return Ok(BuildReport {
                mode: BuildMode::NoOp,
                changes,
                units: BTreeMap::new(),
                dependants: BTreeSet::new(),
                success: true,
                duration_ms: elapsed_ms(started),
            });
        }

        let mut backup = ClassFileBackup::default();
        let phase = match self.build(request, &changes, &mut txn, &mut backup) {
            Ok(phase) => phase,
            Err(e) => {
                txn.rollback();
                restore_after_error(backup);
                return Err(e);
            }
        };

        if phase.success {
            if let Err(e) = self.ports.class_maps.save(&phase.class_map) {
                txn.rollback();
                restore_after_error(backup);
                return Err(e);
            }
            txn.commit()?;
            info!(mode = ?phase.mode, compiled = phase.units.len(), "build committed");
        } else {
            txn.rollback();
            backup.restore()?;
            info!(mode = ?phase.mode, "build failed, state rolled back");
        }

        Ok(BuildReport {
            mode: phase.mode,
            changes,
            units: phase.units,
            dependants: phase.dependants,
            success: phase.success,
            duration_ms: elapsed_ms(started),
        })
    }

    fn build(
        &self,
        request: &BuildRequest,
        changes: &ChangedSourceSet,
        txn: &mut Transaction<'_>,
        backup: &mut ClassFileBackup,
    ) -> Result<Phase> {
        let Some(class_map) = self.ports.class_maps.load()? else {
            info!("no class map from a previous build, compiling everything");
            return self.cold_build(request, txn);
        };

        match self.incremental_build(request, changes, class_map, backup)? {
            Attempt::Finished(phase) => Ok(phase),
            Attempt::GloballyIncompatible => {
                info!("globally incompatible change, compiling everything");
                self.cold_build(request, txn)
            }
        }
    }

    fn cold_build(&self, request: &BuildRequest, txn: &mut Transaction<'_>) -> Result<Phase> {
        let sources = txn.current_sources()?;
        let outcome = self.compile(request, sources.clone())?;

        let mut class_map = ClassMap::new();
        for (source, units) in &outcome.produced {
            class_map.register_source_class_relationship(source, units.clone());
        }

        Ok(Phase {
            mode: BuildMode::Cold,
            class_map,
            units: outcome.statuses(&compile_request(request, sources)),
            dependants: BTreeSet::new(),
            success: outcome.success,
        })
    }

    fn incremental_build(
        &self,
        request: &BuildRequest,
        changes: &ChangedSourceSet,
        mut class_map: ClassMap,
        backup: &mut ClassFileBackup,
    ) -> Result<Attempt> {
        let destination = request.destination.as_path();
        let before = capture_snapshot(self.ports.reader, destination)?;

        let mut removed_units = BTreeSet::new();
        for source in &changes.removed {
            let owned = class_map.remove_source_file(source);
            backup.save(destination, &owned)?;
            for unit in &owned {
                delete_class_file(destination, unit)?;
            }
            debug!(source = %source, classes = owned.len(), "removed source");
            removed_units.extend(owned);
        }

        let to_compile = changes.to_compile();
        backup.save_owned(destination, &class_map, &to_compile)?;
        let outcome = self.compile(request, to_compile.clone())?;
        backup.track_new(destination, &before, &outcome);
        let mut units = outcome.statuses(&compile_request(request, to_compile));
        let mut success = outcome.success;
        let mut changed_units = BTreeSet::new();
        for (source, produced) in &outcome.produced {
            let orphans = class_map.register_source_class_relationship(source, produced.clone());
            for orphan in &orphans {
                delete_class_file(&request.destination, orphan)?;
            }
            removed_units.extend(orphans);
            changed_units.extend(produced.iter().cloned());
        }

        let after = capture_snapshot(self.ports.reader, &request.destination)?;
        let graph = self.ports.graphs.build(&after);
        let checker = AbiCompatibilityChecker::new(&before);

        let affected: BTreeSet<UnitName> = removed_units.union(&changed_units).cloned().collect();
        let mut incompatible = Vec::new();
        for unit in &affected {
            let level = checker.compare(before.get(unit), after.get(unit));
            match level {
                CompatibilityLevel::Compatible => {}
                CompatibilityLevel::GloballyIncompatible => {
                    info!(class = %unit, "globally incompatible ABI change");
                    return Ok(Attempt::GloballyIncompatible);
                }
                CompatibilityLevel::Incompatible => {
                    debug!(class = %unit, "incompatible ABI change");
                    incompatible.push(unit);
                }
            }
        }

        let mut dependants = BTreeSet::new();
        for unit in incompatible {
            for dependant in graph.dependants_of(unit).all() {
                if affected.contains(dependant) {
                    continue;
                }
                dependants.insert(class_map.source_file_of(dependant)?.to_string());
            }
        }

        if !dependants.is_empty() {
            info!(sources = dependants.len(), "recompiling dependants");
            let batch: Vec<String> = dependants.iter().cloned().collect();
            backup.save_owned(destination, &class_map, &batch)?;
            let outcome = self.compile(request, batch.clone())?;
            backup.track_new(destination, &before, &outcome);
            for (source, produced) in &outcome.produced {
                for orphan in class_map.register_source_class_relationship(source, produced.clone()) {
                    delete_class_file(&request.destination, &orphan)?;
                }
            }
            for (source, status) in outcome.statuses(&compile_request(request, batch)) {
                let merged = match units.remove(&source) {
                    Some(previous) => previous.merge(status),
                    None => status,
                };
                units.insert(source, merged);
            }
            success &= outcome.success;
        }

        Ok(Attempt::Finished(Phase {
            mode: BuildMode::Incremental,
            class_map,
            units,
            dependants,
            success,
        }))
    }

    fn compile(&self, request: &BuildRequest, sources: Vec<String>) -> Result<CompileOutcome> {
        if sources.is_empty() {
            return Ok(CompileOutcome {
                success: true,
                ..Default::default()
            });
        }
        debug!(sources = ?sources, "compiling batch");
        self.ports.compiler.compile(&compile_request(request, sources))
    }
}

fn compile_request(request: &BuildRequest, sources: Vec<String>) -> CompileRequest {
    CompileRequest {
        source_root: request.source_root.clone(),
        sources,
        classpath: request.classpath.clone(),
        destination: request.destination.clone(),
    }
}

/// Class files as they were before the build first touched them; `None` for
/// files the build created.
#[derive(Debug, Default)]
struct ClassFileBackup {
    saved: BTreeMap<PathBuf, Option<Vec<u8>>>,
}

impl ClassFileBackup {
    fn save<'u>(
        &mut self,
        destination: &Path,
        units: impl IntoIterator<Item = &'u UnitName>,
    ) -> Result<()> {
        for unit in units {
            let path = destination.join(unit.class_file_path());
            if self.saved.contains_key(&path) {
                continue;
            }
            let previous = match std::fs::read(&path) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e).at(&path),
            };
            self.saved.insert(path, previous);
        }
        Ok(())
    }

    /// Saves the class files currently owned by each registered source in `sources`.
    fn save_owned(
        &mut self,
        destination: &Path,
        class_map: &ClassMap,
        sources: &[String],
    ) -> Result<()> {
        for source in sources {
            if let Ok(owned) = class_map.classes_of(source) {
                self.save(destination, owned)?;
            }
        }
        Ok(())
    }

    /// Remembers produced classes that did not exist before the build.
    fn track_new(&mut self, destination: &Path, before: &AbiSnapshot, outcome: &CompileOutcome) {
        for unit in outcome.produced.values().flatten() {
            if before.get(unit).is_none() {
                self.saved
                    .entry(destination.join(unit.class_file_path()))
                    .or_insert(None);
            }
        }
    }

    fn restore(self) -> Result<()> {
        if !self.saved.is_empty() {
            debug!(files = self.saved.len(), "restoring class files");
        }
        for (path, previous) in self.saved {
            match previous {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).at(parent)?;
                    }
                    std::fs::write(&path, bytes).at(&path)?;
                }
                None => match std::fs::remove_file(&path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e).at(&path),
                    _ => {}
                },
            }
        }
        Ok(())
    }
}

fn restore_after_error(backup: ClassFileBackup) {
    if let Err(e) = backup.restore() {
        warn!(error = %e, "could not restore class files");
    }
}

/// Deletes the class file of `unit`; one that is already gone is fine.
fn delete_class_file(destination: &Path, unit: &UnitName) -> Result<()> {
    let path = destination.join(unit.class_file_path());
    match std::fs::remove_file(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "class file already absent");
            Ok(())
        }
        other => other.at(&path),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
