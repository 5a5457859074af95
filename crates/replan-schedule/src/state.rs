//! The critical section around scheduler state.
//!
//! Compile jobs run concurrently, but all planner state (the graph, the
//! skipped set, the unfinished set) is owned by one [`WaveState`] behind a
//! single mutex. Every job-finished event locks, mutates, and unlocks;
//! the observable behavior is as if events were processed one at a time in
//! arrival order. The workload does not justify anything finer-grained.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use indexmap::IndexMap;
use replan_graph::ModuleDepGraph;
use replan_schemas::{BuildRecord, OutputFileMap};

use crate::jobs::{CompileJobGroup, Job, JobExit, JobId};
use crate::remarks::Remarks;
use crate::second_wave::{SchedulerEvent, WaveState};
use crate::PlanOptions;

/// Thread-safe handle to the scheduler. The driver calls
/// [`job_finished`](PlannerState::job_finished) from wherever its jobs
/// complete; serialization happens here.
#[derive(Debug)]
pub struct PlannerState {
    inner: Mutex<WaveState>,
}

impl PlannerState {
    #[expect(
        clippy::too_many_arguments,
        reason = "assembled once, by the first-wave planner"
    )]
    pub(crate) fn new(
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
        PlannerState {
            inner: Mutex::new(WaveState::new(
                options,
                graph,
                output_map,
                skipped_groups,
                unfinished,
                remarks,
                observed_mtimes,
                build_start,
                inputs,
            )),
        }
    }

    /// Processes one job-finished event inside the critical section.
    pub fn job_finished(&self, finished: &Job, exit: JobExit) -> SchedulerEvent {
        self.lock().job_finished(finished, exit)
    }

    /// The build record to persist for the next build, reflecting what
    /// finished, what stayed skipped, and what still needs compiling.
    pub fn updated_record(&self) -> BuildRecord {
        self.lock().updated_record()
    }

    /// Inputs still in the skipped set.
    pub fn skipped_inputs(&self) -> Vec<PathBuf> {
        self.lock().skipped_inputs()
    }

    /// Remarks emitted since the last drain.
    pub fn drain_remarks(&self) -> Vec<String> {
        self.lock().drain_remarks()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WaveState> {
        self.inner.lock().expect("planner state mutex poisoned")
    }
}
