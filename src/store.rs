//! Persisted build state.
//!
//! Uses LMDB (via heed) to keep the two pieces of state that survive between
//! builds: the fingerprint of every source file at the last successful build
//! and the class map. Each is rewritten in full inside one write transaction.

use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::abi::UnitName;
use crate::classmap::ClassMap;
use crate::error::{IoContext, Result};

pub const SOURCE_FINGERPRINTS_DB: &str = "source_fingerprints";
pub const CLASS_MAP_DB: &str = "class_map";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

/// Relative source path → fingerprint.
pub type Fingerprints = BTreeMap<String, String>;

pub trait FingerprintStore {
    /// `None` when no snapshot was ever saved.
    fn load(&self) -> Result<Option<Fingerprints>>;
    fn save(&self, fingerprints: &Fingerprints) -> Result<()>;
}

pub trait ClassMapStore {
    /// `None` when no class map was ever saved.
    fn load(&self) -> Result<Option<ClassMap>>;
    fn save(&self, map: &ClassMap) -> Result<()>;
}

#[derive(Debug)]
pub struct StateStore {
    env: Env,
}

impl StateStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let env = open_env(&db_path)?;
        Ok(Self { env })
    }

    fn read_all(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let rtxn = self.env.read_txn()?;
        let Some(db) = self.env.open_database::<Str, Str>(&rtxn, Some(name))? else {
            return Ok(None);
        };
        let mut entries = BTreeMap::new();
        for item in db.iter(&rtxn)? {
            let (k, v) = item?;
            entries.insert(k.to_string(), v.to_string());
        }
        Ok(Some(entries))
    }

    fn replace_all<'a>(
        &self,
        name: &str,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let db: StrDb = self.env.create_database(&mut wtxn, Some(name))?;
        db.clear(&mut wtxn)?;
        for (k, v) in entries {
            db.put(&mut wtxn, k, v)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

impl FingerprintStore for StateStore {
    fn load(&self) -> Result<Option<Fingerprints>> {
        self.read_all(SOURCE_FINGERPRINTS_DB)
    }

    fn save(&self, fingerprints: &Fingerprints) -> Result<()> {
        self.replace_all(
            SOURCE_FINGERPRINTS_DB,
            fingerprints.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }
}

impl ClassMapStore for StateStore {
    fn load(&self) -> Result<Option<ClassMap>> {
        Ok(self.read_all(CLASS_MAP_DB)?.map(|rows| {
            ClassMap::from_unit_map(
                rows.into_iter()
                    .map(|(unit, source)| (UnitName::new(unit), source))
                    .collect(),
            )
        }))
    }

    fn save(&self, map: &ClassMap) -> Result<()> {
        self.replace_all(
            CLASS_MAP_DB,
            map.to_unit_map()
                .iter()
                .map(|(unit, source)| (unit.as_str(), source.as_str())),
        )
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the state in a single file next to its lock file.
    let env = unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options.open(db_path)?
    };
    Ok(env)
}

pub fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

/// In-memory state used by tests in place of LMDB.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    fingerprints: std::cell::RefCell<Option<Fingerprints>>,
    class_map: std::cell::RefCell<Option<ClassMap>>,
}

#[cfg(test)]
impl FingerprintStore for MemoryStore {
    fn load(&self) -> Result<Option<Fingerprints>> {
        Ok(self.fingerprints.borrow().clone())
    }

    fn save(&self, fingerprints: &Fingerprints) -> Result<()> {
        *self.fingerprints.borrow_mut() = Some(fingerprints.clone());
        Ok(())
    }
}

#[cfg(test)]
impl ClassMapStore for MemoryStore {
    fn load(&self) -> Result<Option<ClassMap>> {
        Ok(self.class_map.borrow().clone())
    }

    fn save(&self, map: &ClassMap) -> Result<()> {
        *self.class_map.borrow_mut() = Some(map.clone());
        Ok(())
    }
}
