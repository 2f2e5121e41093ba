use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::error::{BuildError, Result};

pub const SOURCE_EXTENSION: &str = "java";
pub const CLASS_EXTENSION: &str = "class";

/// Every `.java` file under `root`, as sorted `/`-separated paths relative to it.
pub fn scan_sources(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(BuildError::Storage {
            path: root.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "source root is not a directory",
            ),
        });
    }

    let mut sources: Vec<String> = scan_files(root, SOURCE_EXTENSION)?
        .iter()
        .filter_map(|path| relative_key(root, path))
        .collect();
    sources.sort();
    Ok(sources)
}

/// Every `.class` file under `root`; empty when the root does not exist yet.
pub fn scan_class_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = scan_files(root, CLASS_EXTENSION)?;
    files.sort();
    Ok(files)
}

pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Files under `base_path` with `extension`. Any directory that cannot be read
/// fails the scan: a skipped subtree would look like deleted files.
fn scan_files(base_path: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            let Some(found) = visit(base_path, entry, extension) else {
                return ignore::WalkState::Continue;
            };
            let failed = found.is_err();
            if tx.send(found).is_err() || failed {
                return ignore::WalkState::Quit;
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    rx.iter().collect()
}

fn visit(
    base_path: &Path,
    entry: std::result::Result<DirEntry, ignore::Error>,
    extension: &str,
) -> Option<Result<PathBuf>> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(err) => return Some(Err(walk_error(base_path, err))),
    };
    let path = entry.path();
    let is_file = entry.file_type().is_some_and(|t| t.is_file());
    (is_file && path.extension().is_some_and(|e| e == extension)).then(|| Ok(path.to_path_buf()))
}

fn walk_error(base_path: &Path, err: ignore::Error) -> BuildError {
    let kind = err
        .io_error()
        .map_or(std::io::ErrorKind::Other, std::io::Error::kind);
    BuildError::Storage {
        path: base_path.to_path_buf(),
        source: std::io::Error::new(kind, err.to_string()),
    }
}
