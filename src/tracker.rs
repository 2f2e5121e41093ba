//! Detects added, changed and removed source files between builds.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

use crate::error::{IoContext, Result};
use crate::scan::scan_sources;
use crate::store::{FingerprintStore, Fingerprints};

/// How a source file is fingerprinted between builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Fingerprinter {
    /// Modification time in nanoseconds since the epoch.
    #[default]
    #[value(name = "mtime")]
    ModifiedTime,
    /// Hex SHA-256 of the file contents.
    #[value(name = "content")]
    ContentHash,
}

impl Fingerprinter {
    pub fn fingerprint(self, path: &Path) -> Result<String> {
        match self {
            Self::ModifiedTime => {
                let modified = path.metadata().and_then(|m| m.modified()).at(path)?;
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                Ok(nanos.to_string())
            }
            Self::ContentHash => {
                let bytes = std::fs::read(path).at(path)?;
                Ok(hash_content(&bytes))
            }
        }
    }
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Relative source paths that differ from the last committed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChangedSourceSet {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangedSourceSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Added and changed sources, sorted.
    pub fn to_compile(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.added.union(&self.changed).cloned().collect();
        sources.sort();
        sources
    }

    fn between(committed: &Fingerprints, current: &Fingerprints) -> Self {
        let mut changes = Self::default();
        for (path, fingerprint) in current {
            match committed.get(path) {
                None => {
                    changes.added.insert(path.clone());
                }
                Some(old) if old != fingerprint => {
                    changes.changed.insert(path.clone());
                }
                Some(_) => {}
            }
        }
        for path in committed.keys() {
            if !current.contains_key(path) {
                changes.removed.insert(path.clone());
            }
        }
        changes
    }
}

pub struct SourceChangeTracker<'s> {
    store: &'s dyn FingerprintStore,
    fingerprinter: Fingerprinter,
}

impl<'s> SourceChangeTracker<'s> {
    pub fn new(store: &'s dyn FingerprintStore, fingerprinter: Fingerprinter) -> Self {
        Self {
            store,
            fingerprinter,
        }
    }

    pub fn begin(&self, source_root: &Path) -> Result<Transaction<'s>> {
        let committed = self.store.load()?.unwrap_or_default();
        debug!(
            root = %source_root.display(),
            known = committed.len(),
            "opened change tracking transaction"
        );
        Ok(Transaction {
            store: self.store,
            fingerprinter: self.fingerprinter,
            root: source_root.to_path_buf(),
            committed,
            candidate: None,
        })
    }
}

struct Candidate {
    snapshot: Fingerprints,
    changes: ChangedSourceSet,
}

/// One observation of the source tree. Nothing is persisted until
/// [`Transaction::commit`].
pub struct Transaction<'s> {
    store: &'s dyn FingerprintStore,
    fingerprinter: Fingerprinter,
    root: PathBuf,
    committed: Fingerprints,
    candidate: Option<Candidate>,
}

impl Transaction<'_> {
    /// Diffs the source tree against the committed snapshot. Later calls
    /// return the first observation.
    pub fn list_changed_files(&mut self) -> Result<&ChangedSourceSet> {
        Ok(&self.observe()?.changes)
    }

    /// Every source present when the tree was observed.
    pub fn current_sources(&mut self) -> Result<Vec<String>> {
        Ok(self.observe()?.snapshot.keys().cloned().collect())
    }

    pub fn commit(self) -> Result<()> {
        if let Some(candidate) = self.candidate {
            self.store.save(&candidate.snapshot)?;
            debug!(sources = candidate.snapshot.len(), "committed source fingerprints");
        }
        Ok(())
    }

    pub fn rollback(self) {
        debug!(root = %self.root.display(), "rolled back change tracking transaction");
    }

    fn observe(&mut self) -> Result<&Candidate> {
        let candidate = match self.candidate.take() {
            Some(candidate) => candidate,
            None => self.scan()?,
        };
        Ok(self.candidate.insert(candidate))
    }

    fn scan(&self) -> Result<Candidate> {
        let mut snapshot = Fingerprints::new();
        for source in scan_sources(&self.root)? {
            let fingerprint = self.fingerprinter.fingerprint(&self.root.join(&source))?;
            snapshot.insert(source, fingerprint);
        }
        let changes = ChangedSourceSet::between(&self.committed, &snapshot);
        debug!(
            added = changes.added.len(),
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            "observed source tree"
        );
        Ok(Candidate { snapshot, changes })
    }
}
