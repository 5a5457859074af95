//! The output file map: where each input's build products live.
//!
//! The map supplies the per-input summary path (where the compiler writes the
//! dependency summary) and object path. A build without an output file map
//! cannot locate summaries, so incremental planning is disabled entirely.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ReadError;

/// A kind of build product reserved for an input.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// The compiled object file.
    Object,
    /// The per-source dependency summary.
    Summary,
}

/// Mapping from `(input, output kind)` to output path.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct OutputFileMap {
    pub entries: BTreeMap<PathBuf, BTreeMap<OutputKind, PathBuf>>,
}

impl OutputFileMap {
    /// Reads and parses an output file map.
    pub fn read(path: &Path) -> Result<Self, ReadError> {
        crate::read_json(path)
    }

    /// Serializes this map to `path` as JSON.
    pub fn write(&self, path: &Path) -> Result<(), ReadError> {
        crate::write_json(path, self)
    }

    /// Output path reserved for `(input, kind)`, if any.
    pub fn output_path(&self, input: &Path, kind: OutputKind) -> Option<&Path> {
        self.entries
            .get(input)
            .and_then(|outputs| outputs.get(&kind))
            .map(PathBuf::as_path)
    }

    /// The summary path reserved for `input`, if any.
    pub fn summary_path(&self, input: &Path) -> Option<&Path> {
        self.output_path(input, OutputKind::Summary)
    }

    /// The object path reserved for `input`, if any.
    pub fn object_path(&self, input: &Path) -> Option<&Path> {
        self.output_path(input, OutputKind::Object)
    }

    /// Reserves `path` as the `kind` output for `input`.
    pub fn insert(
        &mut self,
        input: impl Into<PathBuf>,
        kind: OutputKind,
        path: impl Into<PathBuf>,
    ) {
        self.entries
            .entry(input.into())
            .or_default()
            .insert(kind, path.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a map with object and summary entries for one input.
    fn sample_map() -> OutputFileMap {
        let mut map = OutputFileMap::default();
        map.insert("A.swift", OutputKind::Object, "build/A.o");
        map.insert("A.swift", OutputKind::Summary, "build/A.deps.json");
        map
    }

    /// Lookup returns the reserved path per kind.
    #[test]
    fn lookup_by_kind() {
        let map = sample_map();
        assert_eq!(
            map.summary_path(Path::new("A.swift")),
            Some(Path::new("build/A.deps.json"))
        );
        assert_eq!(
            map.object_path(Path::new("A.swift")),
            Some(Path::new("build/A.o"))
        );
    }

    /// Inputs with no entry produce `None`, which disables incremental mode.
    #[test]
    fn missing_input_has_no_paths() {
        let map = sample_map();
        assert!(map.summary_path(Path::new("B.swift")).is_none());
    }

    /// The serialized form is a plain nested JSON object keyed by input.
    #[test]
    fn serializes_as_nested_object() {
        let map = sample_map();
        let json = serde_json::to_value(&map).expect("serialize");
        assert_eq!(json["A.swift"]["summary"], "build/A.deps.json");
        assert_eq!(json["A.swift"]["object"], "build/A.o");
    }

    /// A map written to disk reads back unchanged.
    #[test]
    fn read_back_written_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output-map.json");
        let map = sample_map();
        map.write(&path).expect("write");
        assert_eq!(OutputFileMap::read(&path).expect("read"), map);
    }
}
