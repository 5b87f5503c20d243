//! Output and log file handling

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// Open `path` for writing, creating it when missing
///
/// With `truncate` an existing file is removed and recreated, otherwise new
/// data is appended to it. Results files are truncated, command logs are
/// appended across trials.
pub fn ensure_exists_and_open(path: &Path, truncate: bool) -> Result<File> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            bail!("{} is a directory", path.display());
        }
        Ok(_) if truncate => {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove existing {}", path.display()))?;
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}
