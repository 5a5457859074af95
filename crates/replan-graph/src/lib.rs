//! The module dependency graph.
//!
//! A persistent, incrementally updated multigraph of declaration-level
//! dependencies across one module's sources. Summaries emitted by previous
//! compiles are integrated into the graph; the tracer answers the only
//! question the scheduler asks: given these changed declarations, which
//! sources must recompile?
//!
//! The graph lives entirely in memory and is rebuilt from summaries at the
//! start of every build; only the build record and the summaries themselves
//! persist across runs.

mod dot;
mod error;
mod finder;
mod integrate;
mod node;
mod trace;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};

pub use error::GraphError;
pub use integrate::{Integration, IntegrationOptions, IntegrationStats};
pub use node::{Node, NodeId, ProviderId};
pub use trace::Trace;

use finder::NodeFinder;
use node::NodeArena;

/// The module dependency graph: nodes, indices, traced state, and the
/// source ↔ provider mapping.
///
/// Ownership is deliberately coarse: the scheduler owns the graph and
/// mutates it only inside its critical section; the workload does not
/// justify finer-grained sharing.
#[derive(Debug, Default)]
pub struct ModuleDepGraph {
    pub(crate) arena: NodeArena,
    pub(crate) finder: NodeFinder,
    /// Nodes visited by the tracer in the current build. Monotonic except
    /// for the integrator's selective clearing.
    pub(crate) traced: HashSet<NodeId>,
    /// Summary paths, interned in first-seen (input) order.
    pub(crate) providers: IndexSet<PathBuf>,
    /// source path → provider id. One-to-one with `source_of`.
    pub(crate) provider_of: IndexMap<PathBuf, ProviderId>,
    /// provider id → source path.
    pub(crate) source_of: IndexMap<ProviderId, PathBuf>,
    /// Every external module file any summary has mentioned.
    pub(crate) externals: IndexSet<PathBuf>,
}

impl ModuleDepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` as the origin of the summary at `summary_path`,
    /// returning the provider id for that summary.
    ///
    /// The mapping is one-to-one in both directions; re-registering the
    /// same pair is idempotent, while claiming an already-claimed summary
    /// path (or re-pointing a source at a different summary) is an
    /// invariant violation.
    pub fn register_source(
        &mut self,
        source: &Path,
        summary_path: &Path,
    ) -> Result<ProviderId, GraphError> {
        if let Some(&existing) = self.provider_of.get(source) {
            if self.summary_path(existing) != summary_path {
                return Err(GraphError::invariant_violated(format!(
                    "source {} re-registered with summary {}, already bound \
                     to {}",
                    source.display(),
                    summary_path.display(),
                    self.summary_path(existing).display()
                )));
            }
            return Ok(existing);
        }

        let (index, fresh) = self.providers.insert_full(summary_path.to_owned());
        if !fresh {
            return Err(GraphError::invariant_violated(format!(
                "summary {} claimed by two sources",
                summary_path.display()
            )));
        }
        let provider = ProviderId(
            u32::try_from(index).expect("provider count exceeds u32::MAX"),
        );
        self.provider_of.insert(source.to_owned(), provider);
        self.source_of.insert(provider, source.to_owned());
        Ok(provider)
    }

    /// The provider id registered for `source`, if any.
    pub fn provider_for_source(&self, source: &Path) -> Option<ProviderId> {
        self.provider_of.get(source).copied()
    }

    /// The source registered as `provider`'s origin.
    ///
    /// Provider ids only come from [`register_source`], so the lookup
    /// cannot miss.
    ///
    /// [`register_source`]: ModuleDepGraph::register_source
    pub fn source_for_provider(&self, provider: ProviderId) -> &Path {
        self.source_of
            .get(&provider)
            .expect("provider id minted without a source registration")
    }

    /// The summary path interned as `provider`.
    pub fn summary_path(&self, provider: ProviderId) -> &Path {
        self.providers
            .get_index(provider.index())
            .expect("provider id minted without an interned summary path")
    }

    /// Every external module file mentioned by any integrated summary, in
    /// first-seen order.
    pub fn external_dependencies(&self) -> impl Iterator<Item = &Path> {
        self.externals.iter().map(PathBuf::as_path)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// The node behind `id`, while it is live.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    /// True once the tracer has visited `id` in this build.
    pub fn is_traced(&self, id: NodeId) -> bool {
        self.traced.contains(&id)
    }

    /// Checks every graph invariant:
    ///
    /// - the finder's indices agree with the arena (one node per
    ///   `(key, provider)`, provider defs indexed under their provider)
    /// - source ↔ provider is a bijection
    /// - the traced set only contains live nodes
    pub fn verify(&self) -> Result<(), GraphError> {
        self.finder.verify(&self.arena)?;

        if self.provider_of.len() != self.source_of.len()
            || self.provider_of.len() != self.providers.len()
        {
            return Err(GraphError::invariant_violated(format!(
                "source/provider maps disagree: {} sources, {} providers, \
                 {} summaries",
                self.provider_of.len(),
                self.source_of.len(),
                self.providers.len()
            )));
        }
        for (source, provider) in &self.provider_of {
            if self.source_of.get(provider) != Some(source) {
                return Err(GraphError::invariant_violated(format!(
                    "source {} and {provider} are not mutually mapped",
                    source.display()
                )));
            }
        }

        for id in &self.traced {
            if self.arena.get(*id).is_none() {
                return Err(GraphError::invariant_violated(
                    "traced set contains a freed node",
                ));
            }
        }
        Ok(())
    }
}
