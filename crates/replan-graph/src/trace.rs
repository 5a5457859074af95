//! The tracer: transitive expansion of changed defs into affected sources.
//!
//! Given a set of changed def nodes, the tracer walks `uses_by_def`
//! breadth-first, skipping nodes already traced in this build, and marks
//! every node it reaches. The traced-set guard both breaks use/def cycles
//! and prevents re-scheduling work that an earlier trace already implied;
//! the integrator selectively clears the flag when a changed def
//! invalidates that reasoning.
//!
//! Traversal order is users-in-(provider, key)-order, which makes the
//! output deterministic. That is a correctness requirement: trace results
//! become scheduling order surfaced to humans.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use replan_schemas::DependencyKey;
use tracing::debug;

use crate::error::GraphError;
use crate::integrate::{Integration, IntegrationOptions};
use crate::node::NodeId;
use crate::ModuleDepGraph;

/// The outcome of one trace: the nodes newly reached and the sources that
/// own them.
#[derive(Debug, Default)]
pub struct Trace {
    /// Newly traced nodes, in visit order.
    pub nodes: Vec<NodeId>,
    /// Source files owning the traced nodes, sorted by path.
    pub sources: BTreeSet<PathBuf>,
}

/// Work item: a node plus whether it entered as a seed.
///
/// Seeds may be expectation nodes (an external dependency has no provider);
/// a *dependent* without a provider is an invariant violation, because every
/// use edge is anchored to a source-file node.
type WorkItem = (NodeId, bool);

impl ModuleDepGraph {
    /// Sources whose compiles depend, transitively, on `source`'s defs.
    ///
    /// Used for speculative scheduling of cascading changes: the source's
    /// own summary has not been re-read yet, so every current def seeds the
    /// trace. The source itself is excluded from the result. Unknown
    /// sources have no defs and therefore no dependents.
    pub fn dependent_sources_of(
        &mut self,
        source: &Path,
    ) -> Result<BTreeSet<PathBuf>, GraphError> {
        let Some(provider) = self.provider_for_source(source) else {
            return Ok(BTreeSet::new());
        };
        let seeds = self.finder.provider_nodes_sorted(provider);
        let mut trace = self.trace_from(seeds, Vec::new())?;
        trace.sources.remove(source);
        debug!(
            source = %source.display(),
            dependents = trace.sources.len(),
            "traced dependents"
        );
        Ok(trace.sources)
    }

    /// Sources affected by a change to the external module file `external`.
    ///
    /// Seeds the trace from the interface-aspect expectation node for the
    /// external dependency; if no source uses it, nothing is affected.
    pub fn externally_affected_sources(
        &mut self,
        external: &Path,
    ) -> Result<BTreeSet<PathBuf>, GraphError> {
        let key = DependencyKey::external_depend(external);
        let Some(id) = self.finder.node_for(&key, None) else {
            return Ok(BTreeSet::new());
        };
        let trace = self.trace_from(vec![id], Vec::new())?;
        Ok(trace.sources)
    }

    /// Re-integrates `source`'s freshly emitted summary and expands the
    /// changed defs into the sources that must now compile.
    ///
    /// This is the second-wave query: the compile for `source` just
    /// finished, its summary is authoritative, and any def it changed pulls
    /// that def's users out of the skipped set. The compiled source itself
    /// is excluded from the result.
    pub fn sources_to_recompile_after(
        &mut self,
        source: &Path,
        summary: &replan_schemas::SourceSummary,
        options: &IntegrationOptions,
    ) -> Result<BTreeSet<PathBuf>, GraphError> {
        let integration = self.integrate(source, summary, options)?;
        let mut trace = self.trace_changes(&integration)?;
        trace.sources.remove(source);
        Ok(trace.sources)
    }

    /// Expands an integration's delta: changed live defs seed the trace,
    /// and users of removed defs enter the work list directly (the def
    /// itself no longer exists to trace through).
    pub fn trace_changes(
        &mut self,
        integration: &Integration,
    ) -> Result<Trace, GraphError> {
        let seeds: Vec<NodeId> = integration.changed.iter().copied().collect();
        let mut orphaned_users: Vec<NodeId> = Vec::new();
        for key in &integration.removed_keys {
            orphaned_users.extend(self.finder.ordered_uses_of(key));
        }
        self.trace_from(seeds, orphaned_users)
    }

    /// Breadth-first expansion over `uses_by_def` from `seeds`, with
    /// `users` appended to the initial work list as non-seed items.
    ///
    /// Every reached node that was not already traced is marked traced and
    /// reported; tracing the same seeds twice therefore yields nothing the
    /// second time.
    pub(crate) fn trace_from(
        &mut self,
        seeds: Vec<NodeId>,
        users: Vec<NodeId>,
    ) -> Result<Trace, GraphError> {
        let mut work: VecDeque<WorkItem> = seeds
            .into_iter()
            .map(|id| (id, true))
            .chain(users.into_iter().map(|id| (id, false)))
            .collect();
        let mut trace = Trace::default();

        while let Some((id, is_seed)) = work.pop_front() {
            if !self.traced.insert(id) {
                continue;
            }
            let Some(node) = self.arena.get(id) else {
                return Err(GraphError::invariant_violated(
                    "trace reached a freed node",
                ));
            };
            let key = node.key.clone();
            match node.provider {
                Some(provider) => {
                    trace
                        .sources
                        .insert(self.source_for_provider(provider).to_owned());
                }
                None if is_seed => {}
                None => {
                    return Err(GraphError::invariant_violated(format!(
                        "dependent `{key}` has no provider"
                    )));
                }
            }
            trace.nodes.push(id);
            work.extend(self.finder.ordered_uses_of(&key).map(|u| (u, false)));
        }
        Ok(trace)
    }
}
