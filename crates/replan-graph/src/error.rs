//! Error types for the replan-graph crate.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::{Path, PathBuf};

/// Error type for dependency-graph operations.
///
/// Captures failures during summary integration and tracing. Uses the
/// canonical struct pattern with backtrace capture and `is_xxx()` helper
/// methods; the kind enum stays private so the public API is stable.
///
/// The planner never aborts a build for a graph problem in release mode:
/// callers classify the error, report why, and fall back to rebuilding
/// everything.
#[derive(Debug)]
pub struct GraphError {
    kind: GraphErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum GraphErrorKind {
    /// A summary's contents violate the summary contract (for example,
    /// duplicate definition keys). The provider must be recompiled so a
    /// fresh summary is emitted.
    MalformedSummary { provider: PathBuf, detail: String },
    /// An internal graph invariant failed. Assertion-class: fatal in debug
    /// builds, downgraded to a full rebuild in release.
    InvariantViolated { detail: String },
}

impl GraphError {
    pub(crate) fn new(kind: GraphErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// A malformed-summary error for `provider`.
    pub fn malformed_summary(
        provider: impl Into<PathBuf>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(GraphErrorKind::MalformedSummary {
            provider: provider.into(),
            detail: detail.into(),
        })
    }

    /// An invariant-violation error.
    ///
    /// Callers downgrade this to a full rebuild; it must never abort the
    /// build in release mode.
    pub fn invariant_violated(detail: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::InvariantViolated {
            detail: detail.into(),
        })
    }

    /// Returns true if this error is a malformed summary.
    pub fn is_malformed_summary(&self) -> bool {
        matches!(self.kind, GraphErrorKind::MalformedSummary { .. })
    }

    /// Returns true if this error is an internal invariant violation.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self.kind, GraphErrorKind::InvariantViolated { .. })
    }

    /// The provider whose summary was malformed, when applicable.
    pub fn malformed_provider(&self) -> Option<&Path> {
        match &self.kind {
            GraphErrorKind::MalformedSummary { provider, .. } => Some(provider),
            GraphErrorKind::InvariantViolated { .. } => None,
        }
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErrorKind::MalformedSummary { provider, detail } => {
                write!(
                    f,
                    "malformed dependency summary {}: {detail}",
                    provider.display()
                )
            }
            GraphErrorKind::InvariantViolated { detail } => {
                write!(f, "dependency graph invariant violated: {detail}")
            }
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for GraphError {}
