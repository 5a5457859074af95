//! Two-wave incremental scheduling.
//!
//! Wave one: compare the current inputs against the prior build record,
//! pick the mandatory compiles, and defer the rest into the skipped set.
//! Wave two: as each compile finishes, re-integrate its fresh summary into
//! the dependency graph and release whatever that discovers.
//!
//! The planner over-approximates freely; rebuilding too much is safe,
//! rebuilding too little is not. It never fails a build over its own
//! bookkeeping: any precondition or graph problem downgrades to a full
//! rebuild with a remark saying why.

pub mod change;
pub mod first_wave;
pub mod jobs;
pub mod remarks;
pub mod second_wave;
pub mod state;

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;

use replan_graph::{IntegrationOptions, ModuleDepGraph};
use replan_schemas::{BuildRecord, OutputFileMap, ReadError, SourceSummary};

pub use first_wave::{FirstWave, Planner, ScheduleReason};
pub use jobs::{CompileJobGroup, Job, JobExit, JobId};
pub use second_wave::SchedulerEvent;
pub use state::PlannerState;

use remarks::Remarks;

/// The recognised planner options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Treat every changed input as cascading, scheduling its dependents
    /// speculatively.
    pub always_rebuild_dependents: bool,
    /// Emit queuing/skipping/scheduling remarks.
    pub show_incremental: bool,
    /// Emit per-job lifecycle remarks.
    pub show_job_lifecycle: bool,
    /// Capture a Graphviz snapshot after every integration.
    pub emit_dot_after_integration: bool,
    /// Re-verify graph invariants after every integration.
    pub verify_after_integration: bool,
}

impl PlanOptions {
    pub(crate) fn integration_options(&self) -> IntegrationOptions {
        IntegrationOptions {
            emit_dot_after_integration: self.emit_dot_after_integration,
            verify_after_integration: self.verify_after_integration,
        }
    }
}

/// Everything needed to attempt incremental planning for one build.
#[derive(Debug, Clone)]
pub struct IncrementalSetup {
    /// Source inputs in command-line order.
    pub inputs: Vec<PathBuf>,
    /// Path to the prior build record, when one was supplied.
    pub record_path: Option<PathBuf>,
    /// Path to the output file map, when one was supplied.
    pub output_map_path: Option<PathBuf>,
    pub options: PlanOptions,
}

/// Either a ready planner or the reason incremental mode is off.
#[derive(Debug)]
pub enum SetupOutcome {
    /// Preconditions hold; the planner is loaded and ready to plan.
    Ready(Planner),
    /// A precondition failed. Not an error: the driver compiles every
    /// input and writes a fresh record.
    Disabled {
        reason: String,
        remarks: Vec<String>,
    },
}

impl IncrementalSetup {
    /// Loads the record, output map, and every per-source summary, and
    /// builds the initial dependency graph.
    ///
    /// Any failed precondition (no output map, no readable record, a
    /// prior input gone from the input list, an input with no reserved
    /// summary path, or a malformed summary) disables incremental mode
    /// with a remark naming the cause. A summary that is merely *absent*
    /// does not disable anything; its input compiles in the first wave so
    /// a fresh summary gets emitted.
    pub fn prepare(self) -> SetupOutcome {
        let build_start = SystemTime::now();
        let mut remarks = Remarks::new(
            self.options.show_incremental,
            self.options.show_job_lifecycle,
        );
        let disabled = |mut remarks: Remarks, reason: String| {
            remarks.always(format!(
                "Incremental compilation has been disabled: {reason}"
            ));
            SetupOutcome::Disabled {
                reason,
                remarks: remarks.drain(),
            }
        };

        let Some(map_path) = &self.output_map_path else {
            return disabled(remarks, "no output file map".to_string());
        };
        let output_map = match OutputFileMap::read(map_path) {
            Ok(map) => map,
            Err(err) => {
                return disabled(
                    remarks,
                    format!(
                        "could not read output file map {}: {err}",
                        map_path.display()
                    ),
                );
            }
        };

        let Some(record_path) = &self.record_path else {
            return disabled(remarks, "no build record path".to_string());
        };
        let record = match BuildRecord::read(record_path) {
            Ok(record) => record,
            Err(err) => {
                return disabled(
                    remarks,
                    format!(
                        "could not read build record {}: {err}",
                        record_path.display()
                    ),
                );
            }
        };

        // A prior input that vanished from the input list invalidates the
        // record's reasoning about everything that depended on it.
        let current: HashSet<&PathBuf> = self.inputs.iter().collect();
        for prior_input in record.inputs.keys() {
            if !current.contains(prior_input) {
                return disabled(
                    remarks,
                    format!(
                        "input {} of the previous build is no longer in the \
                         input list",
                        prior_input.display()
                    ),
                );
            }
        }

        // Register every input with its reserved summary path up front, so
        // second-wave reintegration works even for inputs that have no
        // summary yet.
        let mut graph = ModuleDepGraph::new();
        for input in &self.inputs {
            let Some(summary_path) = output_map.summary_path(input) else {
                return disabled(
                    remarks,
                    format!(
                        "{} has no reserved dependency summary path",
                        input.display()
                    ),
                );
            };
            if let Err(err) = graph.register_source(input, summary_path) {
                return disabled(remarks, err.to_string());
            }
        }

        // Integrate every readable summary, in input order.
        let mut missing_summaries: BTreeSet<PathBuf> = BTreeSet::new();
        for input in &self.inputs {
            let summary_path = output_map
                .summary_path(input)
                .expect("summary paths checked during registration")
                .to_owned();
            let summary = match SourceSummary::read(&summary_path) {
                Ok(summary) => summary,
                Err(ReadError::Io(err))
                    if err.kind() == std::io::ErrorKind::NotFound =>
                {
                    missing_summaries.insert(input.clone());
                    continue;
                }
                Err(err) => {
                    return disabled(
                        remarks,
                        format!(
                            "malformed dependency summary {}: {err}",
                            summary_path.display()
                        ),
                    );
                }
            };
            if let Err(err) = graph.integrate(
                input,
                &summary,
                &self.options.integration_options(),
            ) {
                return disabled(remarks, err.to_string());
            }
        }

        remarks.lifecycle(format!(
            "Incremental compilation planning over {} input(s)",
            self.inputs.len()
        ));
        SetupOutcome::Ready(Planner {
            options: self.options,
            inputs: self.inputs,
            record,
            output_map,
            graph,
            remarks,
            missing_summaries,
            build_start,
        })
    }
}
