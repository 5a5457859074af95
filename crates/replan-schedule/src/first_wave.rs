//! First-wave planning: the mandatory set and the skipped set.
//!
//! The first wave is the union of five criteria, applied in order so each
//! input keeps the first reason that claimed it: changed inputs, inputs
//! without a usable summary, inputs with missing outputs, externally
//! affected inputs, and speculative dependents of cascading changes.
//! Mandatory inputs are emitted in command-line order so build output is
//! reproducible; everything else starts the build in the skipped set and
//! can only move out of it, never back in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use replan_graph::{GraphError, ModuleDepGraph};
use replan_schemas::{whole_seconds, BuildRecord, OutputFileMap};
use serde::Serialize;
use tracing::warn;

use crate::change::{classify, Classification};
use crate::jobs::{CompileJobGroup, Job, JobId};
use crate::remarks::Remarks;
use crate::state::PlannerState;
use crate::PlanOptions;

/// Why an input is in the mandatory set.
///
/// Variant order mirrors the order the criteria are applied in; the first
/// matching criterion claims the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleReason {
    /// Mtime moved while the record said up to date.
    Changed,
    /// Not compiled before (absent from the record, or recorded as new).
    NewlyAdded,
    /// The prior build recorded a cascading build for it.
    CascadingChange,
    /// The prior build recorded a non-cascading build for it.
    NonCascadingChange,
    /// Its dependency summary is missing; compile to emit a fresh one.
    MissingSummary,
    /// A declared output file does not exist.
    MissingOutput,
    /// An external module file is newer than the prior build.
    ExternallyAffected,
    /// A dependent of a cascading change, scheduled speculatively.
    SpeculativeDependent,
    /// Graph reasoning failed; everything compiles.
    FallbackToFullRebuild,
}

impl ScheduleReason {
    fn remark(self) -> &'static str {
        match self {
            ScheduleReason::Changed => "Queuing (initial):",
            ScheduleReason::NewlyAdded => "Queuing (newly added):",
            ScheduleReason::CascadingChange => "Queuing (cascading):",
            ScheduleReason::NonCascadingChange => "Queuing (non-cascading):",
            ScheduleReason::MissingSummary => {
                "Queuing (no dependency summary):"
            }
            ScheduleReason::MissingOutput => "Queuing (missing output):",
            ScheduleReason::ExternallyAffected => {
                "Queuing because of an external dependency:"
            }
            ScheduleReason::SpeculativeDependent => {
                "Queuing because of a dependency cascade:"
            }
            ScheduleReason::FallbackToFullRebuild => {
                "Queuing (full rebuild):"
            }
        }
    }
}

/// The first wave: mandatory jobs in input order, the skipped set, and the
/// live scheduler that will expand the build as compiles finish.
#[derive(Debug)]
pub struct FirstWave {
    /// One compile job per mandatory input, in input-file order.
    pub mandatory_jobs: Vec<Job>,
    /// Inputs not scheduled yet, in input-file order.
    pub skipped: Vec<PathBuf>,
    /// Why each mandatory input is mandatory.
    pub reasons: BTreeMap<PathBuf, ScheduleReason>,
    /// Remarks emitted during planning.
    pub remarks: Vec<String>,
    /// Second-wave authority over the rest of the build.
    pub state: PlannerState,
}

/// A ready planner: validated inputs, prior record, output map, and the
/// graph built from every readable summary.
#[derive(Debug)]
pub struct Planner {
    pub(crate) options: PlanOptions,
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) record: BuildRecord,
    pub(crate) output_map: OutputFileMap,
    pub(crate) graph: ModuleDepGraph,
    pub(crate) remarks: Remarks,
    /// Inputs whose summary file does not exist yet.
    pub(crate) missing_summaries: BTreeSet<PathBuf>,
    /// When this build started.
    pub(crate) build_start: SystemTime,
}

impl Planner {
    /// Computes the first wave and hands the remaining state to the
    /// second-wave scheduler.
    ///
    /// A graph failure mid-planning downgrades to a full rebuild; planning
    /// itself never fails the build.
    pub fn plan(mut self) -> FirstWave {
        let observed = observe_mtimes(&self.inputs);

        let mut reasons: BTreeMap<PathBuf, ScheduleReason> = BTreeMap::new();
        match self.collect_reasons(&observed, &mut reasons) {
            Ok(()) => {}
            Err(err) => {
                warn!(error = %err, "incremental planning failed");
                self.remarks.always(format!(
                    "Incremental planning failed ({err}); compiling everything"
                ));
                reasons = self
                    .inputs
                    .iter()
                    .map(|input| {
                        (input.clone(), ScheduleReason::FallbackToFullRebuild)
                    })
                    .collect();
            }
        }

        self.into_first_wave(reasons, observed)
    }

    /// Applies the five scheduling criteria in order. Each input keeps the
    /// first reason that claimed it.
    fn collect_reasons(
        &mut self,
        observed: &HashMap<PathBuf, SystemTime>,
        reasons: &mut BTreeMap<PathBuf, ScheduleReason>,
    ) -> Result<(), GraphError> {
        // (1) Changed inputs, straight from the record comparison.
        let mut classifications: Vec<(PathBuf, Classification)> = Vec::new();
        for input in &self.inputs {
            let mtime = observed
                .get(input)
                .copied()
                .unwrap_or_else(SystemTime::now);
            let classification = classify(self.record.input_info(input), mtime);
            if classification.requires_compile() {
                let reason = match classification {
                    Classification::Changed => ScheduleReason::Changed,
                    Classification::NewlyAdded => ScheduleReason::NewlyAdded,
                    Classification::ChangedCascading => {
                        ScheduleReason::CascadingChange
                    }
                    Classification::ChangedNonCascading => {
                        ScheduleReason::NonCascadingChange
                    }
                    Classification::SkipCandidate => unreachable!(),
                };
                reasons.entry(input.clone()).or_insert(reason);
            }
            classifications.push((input.clone(), classification));
        }

        // (2) Inputs without a usable summary: compile to emit a fresh one.
        for input in &self.missing_summaries {
            reasons
                .entry(input.clone())
                .or_insert(ScheduleReason::MissingSummary);
        }

        // (3) Inputs with a missing declared output.
        for input in &self.inputs {
            if self.has_missing_output(input) {
                reasons
                    .entry(input.clone())
                    .or_insert(ScheduleReason::MissingOutput);
            }
        }

        // (4) Externally affected inputs: external file at least as new as
        // the prior build start, traced through the graph.
        let externals: Vec<PathBuf> = self
            .graph
            .external_dependencies()
            .map(Path::to_owned)
            .collect();
        for external in externals {
            if !external_is_newer(&external, self.record.build_start_time) {
                continue;
            }
            for source in self.graph.externally_affected_sources(&external)? {
                reasons
                    .entry(source)
                    .or_insert(ScheduleReason::ExternallyAffected);
            }
        }

        // (5) Speculative dependents of cascading changes. The source's own
        // summary has not been re-read yet, so dependents compiled now save
        // a second-wave round trip.
        for (input, classification) in &classifications {
            let cascades = classification.is_cascading()
                || (self.options.always_rebuild_dependents
                    && classification.requires_compile());
            if !cascades {
                continue;
            }
            for dependent in self.graph.dependent_sources_of(input)? {
                reasons
                    .entry(dependent)
                    .or_insert(ScheduleReason::SpeculativeDependent);
            }
        }
        Ok(())
    }

    /// True if any declared output file for `input` is absent.
    fn has_missing_output(&self, input: &Path) -> bool {
        let Some(outputs) = self.output_map.entries.get(input) else {
            return false;
        };
        outputs.values().any(|path| !path.exists())
    }

    /// Splits inputs into mandatory jobs and skipped groups, emits the
    /// per-input remarks, and assembles the second-wave state.
    fn into_first_wave(
        mut self,
        reasons: BTreeMap<PathBuf, ScheduleReason>,
        observed: HashMap<PathBuf, SystemTime>,
    ) -> FirstWave {
        let mut next_id = 0u32;
        let mut mandatory_jobs: Vec<Job> = Vec::new();
        let mut skipped: Vec<PathBuf> = Vec::new();
        let mut skipped_groups: IndexMap<PathBuf, CompileJobGroup> =
            IndexMap::new();

        for input in &self.inputs {
            let id = JobId(next_id);
            next_id += 1;
            let job = Job::new(id, vec![input.clone()]);
            match reasons.get(input) {
                Some(reason) => {
                    self.remarks.incremental(
                        &self.output_map,
                        input,
                        reason.remark(),
                    );
                    mandatory_jobs.push(job);
                }
                None => {
                    self.remarks.incremental(
                        &self.output_map,
                        input,
                        "Skipping input:",
                    );
                    skipped.push(input.clone());
                    skipped_groups.insert(
                        input.clone(),
                        CompileJobGroup::new(vec![job]),
                    );
                }
            }
        }

        if !mandatory_jobs.is_empty() {
            self.remarks.lifecycle(format!(
                "Added to TaskQueue: {} compile job(s)",
                mandatory_jobs.len()
            ));
        }

        let unfinished: BTreeSet<JobId> =
            mandatory_jobs.iter().map(|job| job.id).collect();
        let remarks = self.remarks.drain();
        let state = PlannerState::new(
            self.options,
            self.graph,
            self.output_map,
            skipped_groups,
            unfinished,
            self.remarks,
            observed,
            self.build_start,
            self.inputs.clone(),
        );

        FirstWave {
            mandatory_jobs,
            skipped,
            reasons,
            remarks,
            state,
        }
    }
}

/// Reads every input's mtime once, up front. Unreadable inputs fall back
/// to "now", which can only over-schedule, never skip a real change.
fn observe_mtimes(inputs: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    inputs
        .iter()
        .map(|input| {
            let mtime = std::fs::metadata(input)
                .and_then(|meta| meta.modified())
                .unwrap_or_else(|err| {
                    warn!(
                        input = %input.display(),
                        error = %err,
                        "could not read input mtime"
                    );
                    SystemTime::now()
                });
            (input.clone(), mtime)
        })
        .collect()
}

/// Whole-second comparison: is `external` at least as new as the prior
/// build's start? Unreadable externals count as newer.
fn external_is_newer(external: &Path, build_start: SystemTime) -> bool {
    match std::fs::metadata(external).and_then(|meta| meta.modified()) {
        Ok(mtime) => whole_seconds(mtime) >= whole_seconds(build_start),
        Err(_) => true,
    }
}
