//! Change detection: comparing current inputs against the prior record.
//!
//! Classification is a pure function of the prior record entry and the
//! input's current mtime. Mtimes compare in whole seconds because the
//! legacy record stores seconds; sub-second drift must never cause a
//! spurious rebuild.

use std::time::SystemTime;

use replan_schemas::{mod_times_match, InputInfo, InputStatus};

/// What change detection concluded about one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Unchanged since the prior build; may be skipped.
    SkipCandidate,
    /// Previously up to date, but its mtime moved.
    Changed,
    /// The prior build never compiled it (or never saw it).
    NewlyAdded,
    /// The prior build left it needing a cascading build.
    ChangedCascading,
    /// The prior build left it needing a non-cascading build.
    ChangedNonCascading,
}

impl Classification {
    /// True for anything that must compile in the first wave.
    pub fn requires_compile(self) -> bool {
        !matches!(self, Classification::SkipCandidate)
    }

    /// True when the input's dependents must be scheduled speculatively.
    ///
    /// Only a prior cascading status cascades; `UpToDate`, `NewlyAdded`,
    /// and `NeedsNonCascadingBuild` never do on their own.
    pub fn is_cascading(self) -> bool {
        matches!(self, Classification::ChangedCascading)
    }
}

/// Classifies one input against its prior record entry.
///
/// An input absent from the record counts as newly added.
pub fn classify(
    prior: Option<InputInfo>,
    current_mod_time: SystemTime,
) -> Classification {
    let Some(prior) = prior else {
        return Classification::NewlyAdded;
    };
    match prior.status {
        InputStatus::UpToDate => {
            if mod_times_match(current_mod_time, prior.previous_mod_time) {
                Classification::SkipCandidate
            } else {
                Classification::Changed
            }
        }
        InputStatus::NewlyAdded => Classification::NewlyAdded,
        InputStatus::NeedsCascadingBuild => Classification::ChangedCascading,
        InputStatus::NeedsNonCascadingBuild => {
            Classification::ChangedNonCascading
        }
    }
}
