use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Subdirectories never scanned for science frames, besides hidden ones.
const SKIPPED_DIRS: &[&str] = &["DARK", "FLAT", "BIAS", "node_modules", "target"];

/// True for `.fits`, `.fit` and `.fts` files, in any letter case.
pub fn is_fits_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "fits" | "fit" | "fts"))
        .unwrap_or(false)
}

/// Expand one input argument into the files to process.
///
/// Accepted forms, checked in this order:
/// - a directory, scanned recursively for FITS files (sorted)
/// - a `.list` file with one path per line; blank lines and `#` comments are
///   skipped and relative paths are taken relative to the list
/// - several whitespace-separated paths
/// - a single path
pub fn resolve_inputs(input: &str) -> Result<Vec<PathBuf>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("No input files given"));
    }

    let path = Path::new(trimmed);
    if path.is_dir() {
        let mut files = Vec::new();
        scan_directory(path, &mut files, true);
        files.sort();
        tracing::info!("Found {} FITS files under {}", files.len(), path.display());
        return Ok(files);
    }

    if path.extension().and_then(|e| e.to_str()) == Some("list") {
        return read_list(path);
    }

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() > 1 && !path.exists() {
        return Ok(parts.into_iter().map(PathBuf::from).collect());
    }

    Ok(vec![path.to_path_buf()])
}

/// Resolve several input arguments and concatenate the results.
pub fn resolve_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        files.extend(resolve_inputs(input.as_ref())?);
    }
    Ok(files)
}

fn read_list(list: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(list).map_err(|e| Error::load(list, e.to_string()))?;
    let base = list.parent().unwrap_or_else(|| Path::new(""));

    let files: Vec<PathBuf> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = Path::new(line);
            if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                base.join(entry)
            }
        })
        .collect();

    tracing::debug!("Read {} entries from {}", files.len(), list.display());
    Ok(files)
}

fn scan_directory(dir: &Path, files: &mut Vec<PathBuf>, is_root: bool) {
    if let Some(name) = dir.file_name().map(|n| n.to_string_lossy()).filter(|_| !is_root) {
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
            tracing::trace!("Skipping directory: {:?}", dir);
            return;
        }
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read directory {:?}: {}", dir, e);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::trace!("Error reading entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, files, false);
        } else if is_fits_file(&path) {
            files.push(path);
        }
    }
}
