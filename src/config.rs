use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::store::lmdb_lock_path;
use crate::tracker::Fingerprinter;

pub const STATE_DIR: &str = ".class-rebuild";
pub const STATE_FILE: &str = "state.lmdb";
pub const JAVAC_ENV: &str = "CLASS_REBUILD_JAVAC";

/// Everything one build needs, resolved from the command line and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub source_root: PathBuf,
    pub destination: PathBuf,
    pub classpath: String,
    pub state_path: PathBuf,
    pub javac: PathBuf,
    pub fingerprinter: Fingerprinter,
}

impl BuildConfig {
    /// `None` when the source or target directory is missing.
    pub fn resolve(cli: &Cli) -> Option<Self> {
        let source_root = cli.source_dir.clone()?;
        let destination = cli.target_dir.clone()?;
        Some(Self {
            state_path: resolve_state_path(cli, &destination),
            javac: resolve_javac_path(cli),
            classpath: cli.classpath.clone().unwrap_or_default(),
            fingerprinter: cli.fingerprint,
            source_root,
            destination,
        })
    }
}

pub fn resolve_state_path(cli: &Cli, destination: &Path) -> PathBuf {
    if let Some(p) = cli.state.clone() {
        return p;
    }
    destination.join(STATE_DIR).join(STATE_FILE)
}

pub fn resolve_javac_path(cli: &Cli) -> PathBuf {
    if let Some(p) = cli.javac.clone() {
        return p;
    }

    if let Ok(p) = env::var(JAVAC_ENV)
        && !p.is_empty()
    {
        return PathBuf::from(p);
    }

    if let Ok(home) = env::var("JAVA_HOME")
        && !home.is_empty()
    {
        let javac = Path::new(&home).join("bin").join(javac_file_name());
        if javac.exists() {
            return javac;
        }
    }

    PathBuf::from("javac")
}

/// Removes the state database and its lock file.
pub fn clear_state(state_path: &Path) -> Result<()> {
    remove_file_if_exists(state_path, "state")?;
    remove_file_if_exists(&lmdb_lock_path(state_path), "state lock")?;
    Ok(())
}

fn javac_file_name() -> &'static str {
    if cfg!(windows) { "javac.exe" } else { "javac" }
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
