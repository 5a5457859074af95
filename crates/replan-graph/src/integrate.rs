//! Summary integration: merging a per-source summary into the graph.
//!
//! Integration reconciles the graph's view of one provider with a freshly
//! parsed summary: new defs are created, fingerprint changes are applied,
//! defs the summary no longer lists are removed, and use edges are recorded.
//! The result is the set of changed nodes the tracer expands into the
//! sources that must recompile.
//!
//! Integration is commutative per provider: each provider's defs are
//! reconciled independently, so concurrent completions integrate to the
//! same final graph regardless of arrival order.

use std::collections::{BTreeSet, HashMap, HashSet};

use replan_schemas::{Aspect, DependencyKey, Fingerprint, SourceSummary};
use serde::Serialize;
use tracing::debug;

use crate::error::GraphError;
use crate::node::{Node, NodeId, ProviderId};
use crate::ModuleDepGraph;

/// Debug switches honored after every integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrationOptions {
    /// Capture a Graphviz snapshot of the graph after integrating.
    pub emit_dot_after_integration: bool,
    /// Re-verify all graph invariants after integrating.
    pub verify_after_integration: bool,
}

/// Counts of what one integration did, for remarks and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationStats {
    /// Defs the summary listed that the graph had not seen for this provider.
    pub added: usize,
    /// Defs whose fingerprint differs from the graph's copy.
    pub changed: usize,
    /// Defs the graph had for this provider that the summary no longer lists.
    pub removed: usize,
}

impl IntegrationStats {
    /// True when the summary matched the graph exactly.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

/// The outcome of integrating one summary.
///
/// `changed` holds the live changed def nodes (added or refingerprinted);
/// removed defs no longer have nodes, so they are carried as keys and the
/// tracer seeds their users directly.
#[derive(Debug)]
pub struct Integration {
    pub provider: ProviderId,
    pub stats: IntegrationStats,
    pub(crate) changed: BTreeSet<NodeId>,
    pub(crate) removed_keys: BTreeSet<DependencyKey>,
    /// Graphviz snapshot, when `emit_dot_after_integration` was set.
    pub dot: Option<String>,
}

impl Integration {
    /// True when the summary matched the graph exactly (no trace needed).
    pub fn is_unchanged(&self) -> bool {
        self.stats.is_unchanged()
    }
}

impl ModuleDepGraph {
    /// Integrates `summary` for the registered source `source`.
    ///
    /// The source must have been registered with [`register_source`]
    /// beforehand; integration of an unknown source is an invariant
    /// violation, not a recoverable condition.
    ///
    /// On success, the graph's defs for the provider equal exactly the
    /// summary's definitions, and the returned [`Integration`] describes
    /// the delta. A malformed summary (duplicate definition keys) leaves
    /// the graph untouched and returns [`GraphError::malformed_summary`].
    ///
    /// [`register_source`]: ModuleDepGraph::register_source
    pub fn integrate(
        &mut self,
        source: &std::path::Path,
        summary: &SourceSummary,
        options: &IntegrationOptions,
    ) -> Result<Integration, GraphError> {
        let Some(provider) = self.provider_for_source(source) else {
            return Err(GraphError::invariant_violated(format!(
                "integrating unregistered source {}",
                source.display()
            )));
        };
        let summary_path = self.summary_path(provider).to_owned();

        // Validate before mutating: a malformed summary must leave the
        // graph exactly as it was.
        let current = validated_definitions(source, summary, &summary_path)?;

        let mut prior: HashMap<DependencyKey, NodeId> = self
            .finder
            .nodes_for_provider(provider)
            .cloned()
            .unwrap_or_default();

        let mut stats = IntegrationStats::default();
        let mut changed: BTreeSet<NodeId> = BTreeSet::new();
        let mut changed_keys: BTreeSet<DependencyKey> = BTreeSet::new();

        for (key, fingerprint) in current {
            match prior.remove(&key) {
                Some(id) => {
                    let node = self.arena.get_mut(id).ok_or_else(|| {
                        GraphError::invariant_violated(format!(
                            "provider index for `{key}` points at a freed node"
                        ))
                    })?;
                    if node.fingerprint != fingerprint {
                        node.fingerprint = fingerprint;
                        // Un-trace the changed def itself: a traced seed is
                        // skipped by the tracer, which would strand its
                        // (cleared) users below.
                        self.traced.remove(&id);
                        changed.insert(id);
                        changed_keys.insert(key);
                        stats.changed += 1;
                    }
                }
                None => {
                    // A local def supersedes any expectation for the key;
                    // uses are indexed by key, so existing users keep
                    // pointing at the new def.
                    if let Some(expectation) = self.finder.node_for(&key, None)
                    {
                        self.remove_node(expectation)?;
                    }
                    let node =
                        Node::new(key.clone(), fingerprint, Some(provider));
                    let id = self.arena.alloc(node.clone());
                    self.finder.insert(id, &node)?;
                    changed.insert(id);
                    changed_keys.insert(key);
                    stats.added += 1;
                }
            }
        }

        // Whatever is left in `prior` was dropped by this summary.
        let mut removed_keys: BTreeSet<DependencyKey> = BTreeSet::new();
        for (key, id) in prior {
            self.remove_node(id)?;
            removed_keys.insert(key);
            stats.removed += 1;
        }

        self.record_uses(source, provider, summary)?;

        // A changed def invalidates earlier tracing conclusions about its
        // users: those may have short-circuited on "already traced" while
        // the def looked unchanged. Re-open exactly that neighborhood.
        for key in changed_keys.iter().chain(removed_keys.iter()) {
            let users: Vec<NodeId> =
                self.finder.ordered_uses_of(key).collect();
            for user in users {
                self.traced.remove(&user);
            }
        }

        // Debug builds verify unconditionally; release builds only on
        // request.
        if options.verify_after_integration || cfg!(debug_assertions) {
            self.verify()?;
        }
        let dot = options.emit_dot_after_integration.then(|| self.to_dot());

        debug!(
            source = %source.display(),
            added = stats.added,
            changed = stats.changed,
            removed = stats.removed,
            "summary integrated"
        );

        Ok(Integration {
            provider,
            stats,
            changed,
            removed_keys,
            dot,
        })
    }

    /// Records `summary`'s uses as edges from the provider's own
    /// source-file node, creating expectation nodes for unknown keys.
    fn record_uses(
        &mut self,
        source: &std::path::Path,
        provider: ProviderId,
        summary: &SourceSummary,
    ) -> Result<(), GraphError> {
        let own_key =
            DependencyKey::source_file_provide(Aspect::Interface, source);
        let own_id = self
            .finder
            .node_for(&own_key, Some(provider))
            .ok_or_else(|| {
                GraphError::invariant_violated(format!(
                    "source-file node missing for {}",
                    source.display()
                ))
            })?;
        let own_node = self
            .arena
            .get(own_id)
            .cloned()
            .ok_or_else(|| {
                GraphError::invariant_violated(
                    "source-file node freed while in use",
                )
            })?;

        for use_key in &summary.uses {
            if !self.finder.has_key(use_key) {
                let expectation = Node::new(use_key.clone(), None, None);
                let id = self.arena.alloc(expectation.clone());
                self.finder.insert(id, &expectation)?;
            }
            if let Some(path) = use_key.as_external_depend() {
                self.externals.insert(path.to_owned());
            }
            self.finder.record_use(use_key.clone(), own_id, &own_node);
        }
        Ok(())
    }

    /// Removes a node from the arena, all finder indices, and the traced set.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.arena.get(id).cloned().ok_or_else(|| {
            GraphError::invariant_violated("removing an already-freed node")
        })?;
        self.finder.remove(id, &node);
        self.arena.remove(id);
        self.traced.remove(&id);
        Ok(())
    }
}

/// Validates and normalizes a summary's definition list.
///
/// Rejects duplicate definition keys, and appends the provider's own
/// source-file def when the summary omits it so every use edge has a user
/// to attach to.
fn validated_definitions(
    source: &std::path::Path,
    summary: &SourceSummary,
    summary_path: &std::path::Path,
) -> Result<Vec<(DependencyKey, Option<Fingerprint>)>, GraphError> {
    let mut seen: HashSet<&DependencyKey> = HashSet::new();
    let mut current: Vec<(DependencyKey, Option<Fingerprint>)> =
        Vec::with_capacity(summary.definitions.len() + 1);
    for decl in &summary.definitions {
        if !seen.insert(&decl.key) {
            return Err(GraphError::malformed_summary(
                summary_path,
                format!("duplicate definition for key `{}`", decl.key),
            ));
        }
        current.push((decl.key.clone(), decl.fingerprint.clone()));
    }

    let own_key = DependencyKey::source_file_provide(Aspect::Interface, source);
    if !seen.contains(&own_key) {
        current.push((own_key, None));
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::{Path, PathBuf};

    use proptest::prelude::*;
    use replan_schemas::DefinedDecl;

    use super::*;

    /// Builds a summary whose first definition is the source's own
    /// source-file def, like a real compiler emits.
    fn summary_for(
        source: &str,
        defs: &[(&str, &str)],
        uses: &[DependencyKey],
    ) -> SourceSummary {
        let mut definitions = vec![DefinedDecl::new(
            DependencyKey::source_file_provide(Aspect::Interface, source),
            None,
        )];
        definitions.extend(defs.iter().map(|(name, fp)| {
            DefinedDecl::new(
                DependencyKey::top_level(Aspect::Interface, *name),
                Some(Fingerprint::from(*fp)),
            )
        }));
        SourceSummary {
            definitions,
            uses: uses.to_vec(),
        }
    }

    fn top(name: &str) -> DependencyKey {
        DependencyKey::top_level(Aspect::Interface, name)
    }

    /// Registers `source` and integrates `summary`, panicking on error.
    fn integrate(
        graph: &mut ModuleDepGraph,
        source: &str,
        summary: &SourceSummary,
    ) -> Integration {
        graph
            .register_source(
                Path::new(source),
                Path::new(&format!("{source}.deps.json")),
            )
            .expect("register");
        graph
            .integrate(Path::new(source), summary, &IntegrationOptions::default())
            .expect("integrate")
    }

    /// Content-level view of a graph: nodes as
    /// `(owner source, key) → fingerprint` and edges as
    /// `(def key, user source, user key)`. Independent of id allocation
    /// order, so graphs built in different orders can be compared.
    type NodeView = BTreeMap<(Option<PathBuf>, String), Option<Fingerprint>>;
    type EdgeView = BTreeSet<(String, Option<PathBuf>, String)>;

    fn snapshot(graph: &ModuleDepGraph) -> (NodeView, EdgeView) {
        let owner = |provider: Option<ProviderId>| {
            provider.map(|p| graph.source_for_provider(p).to_owned())
        };
        let nodes: NodeView = graph
            .arena
            .iter()
            .map(|(_, node)| {
                (
                    (owner(node.provider), node.key.to_string()),
                    node.fingerprint.clone(),
                )
            })
            .collect();
        let mut edges: EdgeView = BTreeSet::new();
        for key in graph.finder.used_keys() {
            for user in graph.finder.ordered_uses_of(key) {
                let user_node = graph.arena.get(user).expect("live user");
                edges.insert((
                    key.to_string(),
                    owner(user_node.provider),
                    user_node.key.to_string(),
                ));
            }
        }
        (nodes, edges)
    }

    // =====================================================================
    // First integration
    // =====================================================================

    /// After integrating, the provider's node set equals exactly the
    /// summary's definitions.
    #[test]
    fn provider_nodes_equal_summary_definitions() {
        let mut graph = ModuleDepGraph::new();
        let summary =
            summary_for("A.swift", &[("foo", "f1"), ("bar", "b1")], &[]);
        let integration = integrate(&mut graph, "A.swift", &summary);

        assert_eq!(integration.stats.added, 3);
        let provider = graph
            .provider_for_source(Path::new("A.swift"))
            .expect("registered");
        let keys: BTreeSet<DependencyKey> = graph
            .finder
            .nodes_for_provider(provider)
            .expect("has defs")
            .keys()
            .cloned()
            .collect();
        let expected: BTreeSet<DependencyKey> =
            summary.definitions.iter().map(|d| d.key.clone()).collect();
        assert_eq!(keys, expected);
        graph.verify().expect("verify");
    }

    /// A summary that omits its own source-file def still gets one, so use
    /// edges always have an anchor.
    #[test]
    fn own_source_file_def_is_implied() {
        let mut graph = ModuleDepGraph::new();
        let summary = SourceSummary {
            definitions: vec![DefinedDecl::new(top("foo"), None)],
            uses: vec![],
        };
        integrate(&mut graph, "A.swift", &summary);

        let own_key =
            DependencyKey::source_file_provide(Aspect::Interface, "A.swift");
        let provider = graph
            .provider_for_source(Path::new("A.swift"))
            .expect("registered");
        assert!(graph.finder.node_for(&own_key, Some(provider)).is_some());
    }

    // =====================================================================
    // Reintegration
    // =====================================================================

    /// Reintegrating an identical summary changes nothing.
    #[test]
    fn identical_summary_is_unchanged() {
        let mut graph = ModuleDepGraph::new();
        let summary = summary_for("A.swift", &[("foo", "f1")], &[]);
        integrate(&mut graph, "A.swift", &summary);

        let again = graph
            .integrate(
                Path::new("A.swift"),
                &summary,
                &IntegrationOptions::default(),
            )
            .expect("reintegrate");
        assert!(again.is_unchanged());
        assert!(again.changed.is_empty());
        assert!(again.removed_keys.is_empty());
    }

    /// A fingerprint change replaces the stored fingerprint and reports
    /// the node as changed.
    #[test]
    fn fingerprint_change_is_reported() {
        let mut graph = ModuleDepGraph::new();
        integrate(
            &mut graph,
            "A.swift",
            &summary_for("A.swift", &[("foo", "f1")], &[]),
        );

        let updated = graph
            .integrate(
                Path::new("A.swift"),
                &summary_for("A.swift", &[("foo", "f2")], &[]),
                &IntegrationOptions::default(),
            )
            .expect("reintegrate");
        assert_eq!(updated.stats.changed, 1);
        assert_eq!(updated.stats.added, 0);
        assert_eq!(updated.changed.len(), 1);

        let id = *updated.changed.iter().next().expect("one change");
        assert_eq!(
            graph.node(id).expect("live").fingerprint,
            Some(Fingerprint::from("f2"))
        );
    }

    /// Defs dropped by the new summary are removed from the graph.
    #[test]
    fn dropped_defs_are_removed() {
        let mut graph = ModuleDepGraph::new();
        integrate(
            &mut graph,
            "A.swift",
            &summary_for("A.swift", &[("foo", "f1"), ("bar", "b1")], &[]),
        );
        let before = graph.node_count();

        let updated = graph
            .integrate(
                Path::new("A.swift"),
                &summary_for("A.swift", &[("foo", "f1")], &[]),
                &IntegrationOptions::default(),
            )
            .expect("reintegrate");
        assert_eq!(updated.stats.removed, 1);
        assert_eq!(updated.removed_keys.iter().next(), Some(&top("bar")));
        assert_eq!(graph.node_count(), before - 1);
        graph.verify().expect("verify");
    }

    // =====================================================================
    // Malformed summaries
    // =====================================================================

    /// Duplicate definition keys are rejected and leave the graph intact.
    #[test]
    fn duplicate_definitions_rejected_without_mutation() {
        let mut graph = ModuleDepGraph::new();
        integrate(
            &mut graph,
            "A.swift",
            &summary_for("A.swift", &[("foo", "f1")], &[]),
        );
        let before = graph.node_count();

        let malformed = SourceSummary {
            definitions: vec![
                DefinedDecl::new(top("dup"), Some(Fingerprint::from("x"))),
                DefinedDecl::new(top("dup"), Some(Fingerprint::from("y"))),
            ],
            uses: vec![],
        };
        let err = graph
            .integrate(
                Path::new("A.swift"),
                &malformed,
                &IntegrationOptions::default(),
            )
            .expect_err("must reject");
        assert!(err.is_malformed_summary());
        assert_eq!(
            err.malformed_provider(),
            Some(Path::new("A.swift.deps.json"))
        );
        assert_eq!(graph.node_count(), before);
        graph.verify().expect("verify");
    }

    // =====================================================================
    // Expectations
    // =====================================================================

    /// A use of an unknown key creates an expectation node; a later local
    /// def supersedes it while keeping the recorded users.
    #[test]
    fn expectation_superseded_by_local_def() {
        let mut graph = ModuleDepGraph::new();
        integrate(
            &mut graph,
            "main.swift",
            &summary_for("main.swift", &[], &[top("foo")]),
        );
        assert!(graph.finder.node_for(&top("foo"), None).is_some());

        integrate(
            &mut graph,
            "A.swift",
            &summary_for("A.swift", &[("foo", "f1")], &[]),
        );
        assert!(
            graph.finder.node_for(&top("foo"), None).is_none(),
            "expectation should be superseded"
        );
        let a = graph
            .provider_for_source(Path::new("A.swift"))
            .expect("registered");
        assert!(graph.finder.node_for(&top("foo"), Some(a)).is_some());
        assert_eq!(
            graph.finder.ordered_uses_of(&top("foo")).count(),
            1,
            "main's use edge must survive the supersede"
        );
        graph.verify().expect("verify");
    }

    /// External-dependency uses are registered in the externals set.
    #[test]
    fn external_uses_are_registered() {
        let mut graph = ModuleDepGraph::new();
        let external = DependencyKey::external_depend("/lib/Foo.module");
        integrate(
            &mut graph,
            "B.swift",
            &summary_for("B.swift", &[], &[external]),
        );
        let externals: Vec<&Path> = graph.external_dependencies().collect();
        assert_eq!(externals, vec![Path::new("/lib/Foo.module")]);
    }

    // =====================================================================
    // Traced-flag clearing
    // =====================================================================

    /// Reintegrating a changed def clears the traced flag on that def's
    /// users, re-opening exactly the invalidated neighborhood.
    #[test]
    fn changed_def_clears_users_traced_flag() {
        let mut graph = ModuleDepGraph::new();
        integrate(
            &mut graph,
            "A.swift",
            &summary_for("A.swift", &[("foo", "f1")], &[]),
        );
        integrate(
            &mut graph,
            "main.swift",
            &summary_for("main.swift", &[], &[top("foo")]),
        );

        // Trace once: main's source-file node becomes traced.
        graph
            .dependent_sources_of(Path::new("A.swift"))
            .expect("trace");
        let main_provider = graph
            .provider_for_source(Path::new("main.swift"))
            .expect("registered");
        let main_node = graph
            .finder
            .node_for(
                &DependencyKey::source_file_provide(
                    Aspect::Interface,
                    "main.swift",
                ),
                Some(main_provider),
            )
            .expect("main source-file node");
        assert!(graph.is_traced(main_node));

        // Reintegrate A with a changed fingerprint: main's flag clears.
        graph
            .integrate(
                Path::new("A.swift"),
                &summary_for("A.swift", &[("foo", "f2")], &[]),
                &IntegrationOptions::default(),
            )
            .expect("reintegrate");
        assert!(!graph.is_traced(main_node));
    }

    // =====================================================================
    // Debug switches
    // =====================================================================

    /// The dot snapshot is captured only when requested.
    #[test]
    fn dot_snapshot_on_request() {
        let mut graph = ModuleDepGraph::new();
        graph
            .register_source(Path::new("A.swift"), Path::new("A.deps.json"))
            .expect("register");
        let summary = summary_for("A.swift", &[("foo", "f1")], &[]);

        let quiet = graph
            .integrate(
                Path::new("A.swift"),
                &summary,
                &IntegrationOptions::default(),
            )
            .expect("integrate");
        assert!(quiet.dot.is_none());

        let verbose = graph
            .integrate(
                Path::new("A.swift"),
                &summary,
                &IntegrationOptions {
                    emit_dot_after_integration: true,
                    verify_after_integration: true,
                },
            )
            .expect("integrate");
        let dot = verbose.dot.expect("snapshot requested");
        assert!(dot.contains("digraph"));
        assert!(dot.contains("foo"));
    }

    // =====================================================================
    // Properties
    // =====================================================================

    /// Fixed fixture: three summaries over a shared key pool, with both
    /// defs and cross-file uses.
    fn fixture() -> Vec<(String, SourceSummary)> {
        vec![
            (
                "main.swift".to_string(),
                summary_for(
                    "main.swift",
                    &[("m", "m1")],
                    &[top("a"), top("b")],
                ),
            ),
            (
                "A.swift".to_string(),
                summary_for("A.swift", &[("a", "a1")], &[top("b")]),
            ),
            (
                "B.swift".to_string(),
                summary_for("B.swift", &[("b", "b1")], &[]),
            ),
        ]
    }

    proptest! {
        /// Integrating the same set of summaries in any order produces the
        /// same graph content.
        #[test]
        fn integration_is_order_independent(
            order in Just(vec![0usize, 1, 2]).prop_shuffle(),
        ) {
            let fixture = fixture();

            let mut reference = ModuleDepGraph::new();
            for (source, summary) in &fixture {
                integrate(&mut reference, source, summary);
            }

            let mut shuffled = ModuleDepGraph::new();
            for &i in &order {
                let (source, summary) = &fixture[i];
                integrate(&mut shuffled, source, summary);
            }

            prop_assert_eq!(snapshot(&shuffled), snapshot(&reference));
            shuffled.verify().expect("verify");
        }
    }
}
