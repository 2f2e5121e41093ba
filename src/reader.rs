//! Turns a directory of class files into an [`AbiSnapshot`].

use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::abi::{AbiSnapshot, ClassAbi};
use crate::classfile;
use crate::error::{BuildError, IoContext, Result};
use crate::scan::scan_class_files;

/// Raw bytes of one class file.
pub enum UnitBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for UnitBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Access to compiled classes on some storage.
pub trait BinaryUnitReader: Sync {
    /// Class files under `root`. A missing root has none.
    fn list_units(&self, root: &Path) -> Result<Vec<PathBuf>>;

    fn open_unit(&self, path: &Path) -> Result<UnitBytes>;
}

/// Reads class files from the local file system through memory maps.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsBinaryReader;

impl BinaryUnitReader for FsBinaryReader {
    fn list_units(&self, root: &Path) -> Result<Vec<PathBuf>> {
        scan_class_files(root)
    }

    fn open_unit(&self, path: &Path) -> Result<UnitBytes> {
        let file = File::open(path).at(path)?;
        let len = file.metadata().at(path)?.len();
        if len == 0 {
            // mmap of an empty file fails on some platforms
            return Ok(UnitBytes::Owned(Vec::new()));
        }
        // SAFETY: The file is opened read-only and the map does not outlive this build step.
        let mmap = unsafe { Mmap::map(&file) }.at(path)?;
        Ok(UnitBytes::Mapped(mmap))
    }
}

pub fn read_unit(reader: &dyn BinaryUnitReader, path: &Path) -> Result<ClassAbi> {
    let bytes = reader.open_unit(path)?;
    classfile::extract(&bytes).map_err(|e| BuildError::MalformedUnit {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// ABI of every class under `root`, parsed in parallel.
pub fn capture_snapshot(reader: &dyn BinaryUnitReader, root: &Path) -> Result<AbiSnapshot> {
    let units = reader.list_units(root)?;
    let parsed: Vec<ClassAbi> = units
        .par_iter()
        .map(|path| read_unit(reader, path))
        .collect::<Result<_>>()?;
    debug!(root = %root.display(), units = parsed.len(), "captured ABI snapshot");
    Ok(parsed.into_iter().collect())
}
