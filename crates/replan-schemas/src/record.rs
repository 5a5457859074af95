//! The prior build record.
//!
//! The record persists per-input state between builds: the status each input
//! reached and the modification time the planner last saw for it, plus the
//! wall-clock time the prior build started. The legacy format stores dates
//! in whole-second precision, so all mtime comparisons happen in whole
//! seconds; sub-second drift must not cause spurious rebuilds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampSeconds, serde_as};

use crate::ReadError;

/// Where an input ended up in the prior build.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    /// Compiled successfully; its summary is authoritative.
    UpToDate,
    /// Appeared for the first time in the prior build and never compiled.
    NewlyAdded,
    /// Must recompile, and its dependents must be scheduled speculatively.
    NeedsCascadingBuild,
    /// Must recompile; dependents wait for its fresh summary.
    NeedsNonCascadingBuild,
}

/// Per-input state persisted from the previous build.
#[serde_as]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct InputInfo {
    /// Status the input reached in the prior build.
    pub status: InputStatus,
    /// Modification time last seen, whole-second precision.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub previous_mod_time: SystemTime,
}

impl InputInfo {
    pub fn new(status: InputStatus, previous_mod_time: SystemTime) -> Self {
        InputInfo {
            status,
            previous_mod_time,
        }
    }
}

/// The prior build record: per-input state plus the prior build's start time.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildRecord {
    /// When the prior build started, whole-second precision.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub build_start_time: SystemTime,
    /// State for each input the prior build knew about.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<PathBuf, InputInfo>,
}

impl BuildRecord {
    /// An empty record with the given start time.
    pub fn new(build_start_time: SystemTime) -> Self {
        BuildRecord {
            build_start_time,
            inputs: BTreeMap::new(),
        }
    }

    /// Reads and parses a record file.
    pub fn read(path: &Path) -> Result<Self, ReadError> {
        crate::read_json(path)
    }

    /// Serializes this record to `path` as JSON.
    pub fn write(&self, path: &Path) -> Result<(), ReadError> {
        crate::write_json(path, self)
    }

    /// Prior state of `input`, if the prior build knew about it.
    pub fn input_info(&self, input: &Path) -> Option<InputInfo> {
        self.inputs.get(input).copied()
    }

    /// Records `input`'s state, replacing any prior entry.
    pub fn set_input(
        &mut self,
        input: impl Into<PathBuf>,
        status: InputStatus,
        mod_time: SystemTime,
    ) {
        self.inputs
            .insert(input.into(), InputInfo::new(status, mod_time));
    }
}

/// Truncates a timestamp to whole seconds since the epoch.
///
/// Times before the epoch clamp to zero; source files do not predate 1970.
pub fn whole_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whole-second equality, the only mtime comparison the planner performs.
pub fn mod_times_match(a: SystemTime, b: SystemTime) -> bool {
    whole_seconds(a) == whole_seconds(b)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Seconds-since-epoch helper for readable fixtures.
    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    // =====================================================================
    // Whole-second comparison
    // =====================================================================

    /// Sub-second drift within the same whole second compares equal.
    #[test]
    fn subsecond_drift_matches() {
        let base = at(1_000_000);
        let drifted = base + Duration::from_millis(640);
        assert!(mod_times_match(base, drifted));
    }

    /// A full-second difference does not match.
    #[test]
    fn whole_second_difference_differs() {
        assert!(!mod_times_match(at(1_000_000), at(1_000_001)));
    }

    // =====================================================================
    // Serialization
    // =====================================================================

    /// Mtimes serialize as integer seconds, matching the legacy format.
    #[test]
    fn mtime_serializes_as_integer_seconds() {
        let info = InputInfo::new(InputStatus::UpToDate, at(1_700_000_000));
        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["previous_mod_time"], 1_700_000_000_i64);
        assert_eq!(json["status"], "up_to_date");
    }

    /// A record written to disk reads back unchanged.
    #[test]
    fn read_back_written_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("build-record.json");

        let mut record = BuildRecord::new(at(1_700_000_000));
        record.set_input("main.swift", InputStatus::UpToDate, at(1_699_999_000));
        record.set_input(
            "A.swift",
            InputStatus::NeedsCascadingBuild,
            at(1_699_999_500),
        );
        record.write(&path).expect("write");

        let read = BuildRecord::read(&path).expect("read");
        assert_eq!(read, record);
    }

    /// Inputs missing from the record return `None`, which the change
    /// detector maps to newly-added.
    #[test]
    fn unknown_input_has_no_info() {
        let record = BuildRecord::new(at(0));
        assert!(record.input_info(Path::new("new.swift")).is_none());
    }

    /// Sub-second components do not survive the whole-second encoding.
    #[test]
    fn serialization_truncates_to_whole_seconds() {
        let info = InputInfo::new(
            InputStatus::UpToDate,
            at(1_700_000_000) + Duration::from_millis(250),
        );
        let json = serde_json::to_string(&info).expect("serialize");
        let parsed: InputInfo = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.previous_mod_time, at(1_700_000_000));
    }
}
