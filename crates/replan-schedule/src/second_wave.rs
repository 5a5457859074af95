//! Second-wave scheduling: expanding the build as compiles finish.
//!
//! Each finished compile's freshly emitted summary is re-integrated into
//! the graph; the changed defs trace to the sources that must now compile,
//! and those move from the skipped set into the running build. Entries only
//! ever move skipped → released. A summary that cannot be read releases
//! every still-skipped input instead: over-approximation is safe,
//! under-approximation is not.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use replan_graph::ModuleDepGraph;
use replan_schemas::{
    BuildRecord, InputStatus, OutputFileMap, SourceSummary,
};
use tracing::warn;

use crate::jobs::{CompileJobGroup, Job, JobExit, JobId};
use crate::remarks::Remarks;
use crate::PlanOptions;

/// What the scheduler decided after one job-finished event.
#[derive(Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Newly released jobs (possibly none, with others still running).
    NewJobs(Vec<Job>),
    /// Nothing is running and nothing was released: the compile phase is
    /// over.
    BuildComplete,
    /// The job failed; no new work is released and the driver decides the
    /// build's fate.
    JobFailed,
}

/// The scheduler's mutable state. Only touched through the critical
/// section in [`PlannerState`](crate::PlannerState).
#[derive(Debug)]
pub(crate) struct WaveState {
    options: PlanOptions,
    graph: ModuleDepGraph,
    output_map: OutputFileMap,
    skipped_groups: IndexMap<PathBuf, CompileJobGroup>,
    unfinished: BTreeSet<JobId>,
    remarks: Remarks,
    /// Input mtimes observed at planning time; written back into the
    /// updated record so a mid-build edit still rebuilds next time.
    observed_mtimes: HashMap<PathBuf, SystemTime>,
    build_start: SystemTime,
    inputs: Vec<PathBuf>,
    finished_inputs: BTreeSet<PathBuf>,
}

impl WaveState {
    #[expect(
        clippy::too_many_arguments,
        reason = "assembled once, by the first-wave planner"
    )]
    pub fn new(
        options: PlanOptions,
        graph: ModuleDepGraph,
        output_map: OutputFileMap,
        skipped_groups: IndexMap<PathBuf, CompileJobGroup>,
        unfinished: BTreeSet<JobId>,
        remarks: Remarks,
        observed_mtimes: HashMap<PathBuf, SystemTime>,
        build_start: SystemTime,
        inputs: Vec<PathBuf>,
    ) -> Self {
        WaveState {
            options,
            graph,
            output_map,
            skipped_groups,
            unfinished,
            remarks,
            observed_mtimes,
            build_start,
            inputs,
            finished_inputs: BTreeSet::new(),
        }
    }

    /// Handles one job-finished event: re-integrate each primary's fresh
    /// summary, trace the changes, and release whatever the trace
    /// discovered from the skipped set.
    pub fn job_finished(
        &mut self,
        finished: &Job,
        exit: JobExit,
    ) -> SchedulerEvent {
        self.unfinished.remove(&finished.id);
        self.remarks.lifecycle(format!(
            "Finished compile job for {}",
            describe_primaries(&finished.primaries)
        ));

        if !exit.is_success() {
            // Let the driver decide overall build fate; the record still
            // remembers which inputs did finish.
            return SchedulerEvent::JobFailed;
        }
        for primary in &finished.primaries {
            self.finished_inputs.insert(primary.clone());
        }

        let mut discovered: BTreeSet<PathBuf> = BTreeSet::new();
        let mut compile_everything = false;
        for primary in &finished.primaries {
            match self.sources_discovered_by(primary) {
                Ok(sources) => discovered.extend(sources),
                Err(err) => {
                    warn!(
                        input = %primary.display(),
                        error = %err,
                        "second-wave reintegration failed"
                    );
                    self.remarks.always(
                        "failed to read some dependency summaries; \
                         compiling everything",
                    );
                    compile_everything = true;
                }
            }
        }
        if compile_everything {
            discovered.extend(self.skipped_groups.keys().cloned());
        }
        for primary in &finished.primaries {
            discovered.remove(primary);
        }

        let mut new_jobs: Vec<Job> = Vec::new();
        for input in &discovered {
            // Inputs already released (or mandatory from the start) have
            // no skipped entry; that is not an error.
            let Some(group) = self.skipped_groups.shift_remove(input) else {
                continue;
            };
            self.remarks.incremental(
                &self.output_map,
                input,
                "Queuing because of dependencies discovered later:",
            );
            new_jobs.extend(group.jobs);
        }
        if !new_jobs.is_empty() {
            self.remarks.lifecycle(format!(
                "Added to TaskQueue: {} deferred compile job(s)",
                new_jobs.len()
            ));
        }
        for job in &new_jobs {
            self.unfinished.insert(job.id);
        }

        if new_jobs.is_empty() && self.unfinished.is_empty() {
            SchedulerEvent::BuildComplete
        } else {
            SchedulerEvent::NewJobs(new_jobs)
        }
    }

    /// Reads `primary`'s freshly emitted summary and expands its changes
    /// into the sources that must now compile.
    fn sources_discovered_by(
        &mut self,
        primary: &Path,
    ) -> anyhow::Result<BTreeSet<PathBuf>> {
        let summary_path = self
            .output_map
            .summary_path(primary)
            .ok_or_else(|| {
                anyhow!("no summary path reserved for {}", primary.display())
            })?
            .to_owned();
        let summary = SourceSummary::read(&summary_path).with_context(|| {
            format!("reading summary {}", summary_path.display())
        })?;
        let discovered = self.graph.sources_to_recompile_after(
            primary,
            &summary,
            &self.options.integration_options(),
        )?;
        Ok(discovered)
    }

    /// The record to persist for the next build.
    ///
    /// Finished inputs are up to date at the mtime observed when planning
    /// started; still-skipped inputs are up to date untouched; anything
    /// released but not finished must build again next time, cascading so
    /// its dependents are not lost.
    pub fn updated_record(&self) -> BuildRecord {
        let mut record = BuildRecord::new(self.build_start);
        for input in &self.inputs {
            let mtime = self
                .observed_mtimes
                .get(input)
                .copied()
                .unwrap_or(self.build_start);
            let status = if self.finished_inputs.contains(input)
                || self.skipped_groups.contains_key(input)
            {
                InputStatus::UpToDate
            } else {
                InputStatus::NeedsCascadingBuild
            };
            record.set_input(input.clone(), status, mtime);
        }
        record
    }

    /// Inputs still in the skipped set, in input order.
    pub fn skipped_inputs(&self) -> Vec<PathBuf> {
        self.skipped_groups.keys().cloned().collect()
    }

    pub fn drain_remarks(&mut self) -> Vec<String> {
        self.remarks.drain()
    }
}

/// Human-readable rendering of a job's primaries for lifecycle remarks.
fn describe_primaries(primaries: &[PathBuf]) -> String {
    primaries
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
