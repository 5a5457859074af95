//! Remark-level planner diagnostics.
//!
//! Everything the planner tells a human goes through here. Per-input
//! remarks carry a canonical suffix naming the compile they refer to:
//!
//! ```text
//! <message> {compile: <output-basename> <= <input-basename>}
//! ```
//!
//! The suffix is omitted when the output file map has no entry for the
//! input. Remarks are buffered for the driver to print and mirrored to
//! `tracing` so they land in structured logs as well.

use std::path::Path;

use replan_schemas::OutputFileMap;
use tracing::info;

/// Buffered remarks, gated by the planner's diagnostic flags.
#[derive(Debug, Default)]
pub struct Remarks {
    show_incremental: bool,
    show_job_lifecycle: bool,
    entries: Vec<String>,
}

impl Remarks {
    pub fn new(show_incremental: bool, show_job_lifecycle: bool) -> Self {
        Remarks {
            show_incremental,
            show_job_lifecycle,
            entries: Vec::new(),
        }
    }

    /// Emits a queuing/skipping/scheduling remark about `input`.
    /// Dropped unless `show_incremental` is set.
    pub fn incremental(
        &mut self,
        map: &OutputFileMap,
        input: &Path,
        message: &str,
    ) {
        if !self.show_incremental {
            return;
        }
        self.push(per_input_remark(map, input, message));
    }

    /// Emits a build-level incremental remark with no input suffix.
    /// Dropped unless `show_incremental` is set.
    pub fn incremental_general(&mut self, message: impl Into<String>) {
        if !self.show_incremental {
            return;
        }
        self.push(message.into());
    }

    /// Emits a per-job lifecycle remark.
    /// Dropped unless `show_job_lifecycle` is set.
    pub fn lifecycle(&mut self, message: impl Into<String>) {
        if !self.show_job_lifecycle {
            return;
        }
        self.push(message.into());
    }

    /// Emits a remark that is always reported, such as the reason
    /// incremental planning was disabled.
    pub fn always(&mut self, message: impl Into<String>) {
        self.push(message.into());
    }

    fn push(&mut self, remark: String) {
        info!(remark = %remark, "planner remark");
        self.entries.push(remark);
    }

    /// All remarks emitted so far, in order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Hands the buffered remarks to the caller, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.entries)
    }
}

/// Formats the canonical per-input remark.
fn per_input_remark(
    map: &OutputFileMap,
    input: &Path,
    message: &str,
) -> String {
    let input_name = basename(input);
    match map.object_path(input) {
        Some(object) => {
            format!(
                "{message} {{compile: {} <= {input_name}}}",
                basename(object)
            )
        }
        None => message.to_string(),
    }
}

fn basename(path: &Path) -> std::borrow::Cow<'_, str> {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy())
}
