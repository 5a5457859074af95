//! Compile jobs as the planner sees them.
//!
//! The planner decides *what* must compile; forming command lines, batching,
//! and launching subprocesses belong to the driver. A [`Job`] is therefore
//! just an id plus the primary inputs it covers, and a [`CompileJobGroup`]
//! is the set of jobs released together when an input leaves the skipped
//! set.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Identity of a job within one build.
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
)]
#[serde(transparent)]
pub struct JobId(pub u32);

/// One compile job over its primary inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Primary inputs this job compiles, in input order.
    pub primaries: Vec<PathBuf>,
}

impl Job {
    pub fn new(id: JobId, primaries: Vec<PathBuf>) -> Self {
        Job { id, primaries }
    }

    /// True if `input` is one of this job's primaries.
    pub fn compiles(&self, input: &Path) -> bool {
        self.primaries.iter().any(|p| p == input)
    }
}

/// The jobs released together for one skipped input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileJobGroup {
    pub jobs: Vec<Job>,
}

impl CompileJobGroup {
    pub fn new(jobs: Vec<Job>) -> Self {
        CompileJobGroup { jobs }
    }
}

/// How a compile job exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExit {
    Success,
    /// Non-success exit with the process status code, when one exists.
    Failed(Option<i32>),
}

impl JobExit {
    pub fn is_success(self) -> bool {
        matches!(self, JobExit::Success)
    }
}
