use std::path::{Path, PathBuf};

use crate::abi::UnitName;

/// Failures that abort a build.
///
/// Compile errors reported by the compiler are not part of this enum: they are
/// recorded per source unit in the build report and only flip the overall
/// success flag.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A class file could not be parsed into an ABI model.
    #[error("malformed class file {}: {reason}", path.display())]
    MalformedUnit { path: PathBuf, reason: String },

    /// Reading or writing the source tree, the destination or the state files failed.
    #[error("I/O failure on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted state environment failed.
    #[error("state store failure: {0}")]
    Store(#[from] heed::Error),

    /// The compiler process could not be started.
    #[error("failed to run compiler {program}: {source}")]
    CompilerUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("class {0} is not registered to any source file")]
    UnregisteredUnit(UnitName),

    #[error("source file {0} is not registered in the class map")]
    UnregisteredSource(String),
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// Attaches the offending path to an I/O error.
pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| BuildError::Storage {
            path: path.to_path_buf(),
            source,
        })
    }
}
