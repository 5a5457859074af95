//! Schema definitions for replan's persisted artifacts.
//!
//! This crate contains the data structures that cross a build boundary: the
//! dependency keys and per-source summaries emitted by a previous compile,
//! the prior build record, and the output file map. These types are
//! serialized to JSON and shared by every phase of the planner.
//!
//! The schemas are designed to be:
//! - **Self-describing**: JSON Schema is auto-generated from Rust types
//! - **Stable**: the build record keeps the legacy whole-second mtime encoding
//! - **Shared**: used across graph construction, planning, and the CLI

mod key;
mod output_map;
mod record;
mod summary;
#[cfg(test)]
mod testutil;

#[doc(inline)]
pub use key::*;
#[doc(inline)]
pub use output_map::*;
#[doc(inline)]
pub use record::*;
#[doc(inline)]
pub use summary::*;

use std::fmt;
use std::path::Path;

/// Error reading a persisted artifact from disk.
///
/// Distinguishes transport failures (the file could not be read) from
/// malformed content (the bytes were not valid JSON for the target type).
/// Callers treat both as "this artifact is unusable" but report them
/// differently.
#[derive(Debug)]
pub enum ReadError {
    /// The file could not be opened or read.
    Io(std::io::Error),
    /// The file contents failed to parse as the target schema.
    Parse(serde_json::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "I/O error: {err}"),
            ReadError::Parse(err) => write!(f, "malformed contents: {err}"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Io(err) => Some(err),
            ReadError::Parse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Io(err)
    }
}

impl From<serde_json::Error> for ReadError {
    fn from(err: serde_json::Error) -> Self {
        ReadError::Parse(err)
    }
}

/// Reads and deserializes a JSON artifact from `path`.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, ReadError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serializes `value` as pretty JSON and writes it to `path`.
pub(crate) fn write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), ReadError> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
