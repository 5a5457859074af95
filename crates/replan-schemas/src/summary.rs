//! Per-source dependency summaries.
//!
//! A summary is the artifact a previous compile emitted for one source file:
//! the declarations that source defines (with content fingerprints) and the
//! keys it uses. The planner integrates summaries into the module dependency
//! graph; it never inspects source code itself.

use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{DependencyKey, ReadError};

/// Opaque content hash of a declaration.
///
/// Equal fingerprints mean no semantic change; the planner never interprets
/// the bytes beyond equality.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Fingerprint(hash.into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(hash: &str) -> Self {
        Fingerprint(hash.to_owned())
    }
}

/// One declaration defined by a source, as listed in its summary.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct DefinedDecl {
    /// The declaration's dependency key.
    pub key: DependencyKey,
    /// Content hash, when the emitting compiler computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl DefinedDecl {
    pub fn new(key: DependencyKey, fingerprint: Option<Fingerprint>) -> Self {
        DefinedDecl { key, fingerprint }
    }
}

/// A parsed per-source dependency summary.
///
/// `definitions` and `uses` are kept in the order the emitting compiler wrote
/// them; the graph imposes its own deterministic ordering where needed.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct SourceSummary {
    /// Declarations this source defines.
    pub definitions: Vec<DefinedDecl>,
    /// Keys this source uses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<DependencyKey>,
}

impl SourceSummary {
    /// Reads and parses a summary file.
    ///
    /// Both I/O and parse failures surface as [`ReadError`]; the caller
    /// treats either as a malformed summary and rebuilds conservatively.
    pub fn read(path: &Path) -> Result<Self, ReadError> {
        crate::read_json(path)
    }

    /// Serializes this summary to `path` as JSON.
    pub fn write(&self, path: &Path) -> Result<(), ReadError> {
        crate::write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testutil::{arb_key, arb_summary};
    use crate::Aspect;

    // =====================================================================
    // Reading from disk
    // =====================================================================

    /// A summary written to disk reads back unchanged.
    #[test]
    fn read_back_written_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.deps.json");

        let summary = SourceSummary {
            definitions: vec![DefinedDecl::new(
                DependencyKey::top_level(Aspect::Interface, "foo"),
                Some(Fingerprint::from("abc123")),
            )],
            uses: vec![DependencyKey::top_level(Aspect::Interface, "bar")],
        };
        summary.write(&path).expect("write");

        let read = SourceSummary::read(&path).expect("read");
        assert_eq!(read, summary);
    }

    /// A missing file is an I/O failure, not a parse failure.
    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SourceSummary::read(&dir.path().join("absent.json"))
            .expect_err("must fail");
        assert!(matches!(err, crate::ReadError::Io(_)));
    }

    /// Garbage bytes are a parse failure.
    #[test]
    fn garbage_is_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"not json at all").expect("write");

        let err = SourceSummary::read(&path).expect_err("must fail");
        assert!(matches!(err, crate::ReadError::Parse(_)));
    }

    /// The `uses` field is optional in the serialized form.
    #[test]
    fn uses_field_is_optional() {
        let summary: SourceSummary =
            serde_json::from_str(r#"{"definitions": []}"#).expect("parse");
        assert!(summary.uses.is_empty());
    }

    // =====================================================================
    // Properties
    // =====================================================================

    proptest! {
        /// Summaries survive a JSON roundtrip unchanged.
        #[test]
        fn summary_json_roundtrip(summary in arb_summary()) {
            let json = serde_json::to_string(&summary).expect("serialize");
            let parsed: SourceSummary =
                serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(parsed, summary);
        }

        /// Defined decls with and without fingerprints both roundtrip.
        #[test]
        fn decl_fingerprint_optionality_roundtrips(
            key in arb_key(),
            fp in proptest::option::of("[a-f0-9]{8}"),
        ) {
            let decl = DefinedDecl::new(key, fp.map(Fingerprint::new));
            let json = serde_json::to_string(&decl).expect("serialize");
            let parsed: DefinedDecl =
                serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(parsed, decl);
        }
    }
}
