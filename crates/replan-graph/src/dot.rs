//! Graphviz snapshot of the dependency graph.
//!
//! Emitted after integration when `emit_dot_after_integration` is set, and
//! by the CLI's `dot` subcommand. Rendering goes through petgraph's `Dot`
//! writer; node iteration and edge enumeration are sorted so the same graph
//! always renders the same text.

use std::collections::HashMap;

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::node::NodeId;
use crate::ModuleDepGraph;

impl ModuleDepGraph {
    /// Renders the current graph as Graphviz source.
    ///
    /// Nodes are labeled `key` plus the owning source's file name (or
    /// `<expectation>`), with the fingerprint when one is known. Edges run
    /// def → user.
    pub fn to_dot(&self) -> String {
        let mut dot_graph: DiGraph<String, ()> = DiGraph::new();
        let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();

        for (id, node) in self.arena.iter() {
            let owner = match node.provider {
                Some(provider) => {
                    let source = self.source_for_provider(provider);
                    source
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| source.display().to_string())
                }
                None => "<expectation>".to_string(),
            };
            let label = match &node.fingerprint {
                Some(fingerprint) => {
                    format!("{}\\n{owner} [{fingerprint}]", node.key)
                }
                None => format!("{}\\n{owner}", node.key),
            };
            index_of.insert(id, dot_graph.add_node(label));
        }

        let mut used_keys: Vec<_> = self.finder.used_keys().collect();
        used_keys.sort();
        for key in used_keys {
            let defs: Vec<NodeId> = self.finder.nodes_with_key(key).collect();
            for def in defs {
                for user in self.finder.ordered_uses_of(key) {
                    dot_graph.add_edge(index_of[&def], index_of[&user], ());
                }
            }
        }

        format!("{:?}", Dot::with_config(&dot_graph, &[Config::EdgeNoLabel]))
    }
}
