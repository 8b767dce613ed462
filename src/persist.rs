//! Atomic JSON persistence helpers shared by the on-disk stores.
//!
//! Every store writes its full record to a temporary file in the target
//! directory and renames it into place, so readers never observe a partially
//! written file and a failed write leaves the previous record intact.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;

    serde_json::to_writer_pretty(&tmp, value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// Read a JSON record from `path`, falling back to `T::default()` when the
/// file does not exist yet.
pub fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
