//! The node finder: every index the graph keeps over its nodes.
//!
//! Three indices answer the queries integration and tracing need:
//!
//! - `by_provider`: provider → (key → node), the set of defs a summary owns
//! - `by_key`: key → (provider → node), all nodes sharing a key
//! - `uses_by_def`: def key → user nodes, ordered by (provider, key)
//!
//! `uses_by_def` ordering is the determinism backbone: the tracer visits
//! users in exactly this order, and that order surfaces in scheduling
//! output. A fourth, private index (`uses_of_node`) records which keys each
//! node uses so removal can clean its edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use replan_schemas::DependencyKey;

use crate::error::GraphError;
use crate::node::{Node, NodeArena, NodeId, ProviderId};

/// Sort key placing users in deterministic (provider, key) order.
type UserOrder = (Option<ProviderId>, DependencyKey);

#[derive(Debug, Default)]
pub(crate) struct NodeFinder {
    by_provider: HashMap<ProviderId, HashMap<DependencyKey, NodeId>>,
    by_key: HashMap<DependencyKey, BTreeMap<Option<ProviderId>, NodeId>>,
    uses_by_def: HashMap<DependencyKey, BTreeMap<UserOrder, NodeId>>,
    uses_of_node: HashMap<NodeId, BTreeSet<DependencyKey>>,
}

impl NodeFinder {
    /// Adds `node` to all indices.
    ///
    /// Fails if a node with the same `(key, provider)` identity is already
    /// indexed (at most one node per pair).
    pub fn insert(&mut self, id: NodeId, node: &Node) -> Result<(), GraphError> {
        let per_key = self.by_key.entry(node.key.clone()).or_default();
        if per_key.contains_key(&node.provider) {
            return Err(GraphError::invariant_violated(format!(
                "second node for key `{}` of {:?}",
                node.key, node.provider
            )));
        }
        per_key.insert(node.provider, id);

        if let Some(provider) = node.provider {
            self.by_provider
                .entry(provider)
                .or_default()
                .insert(node.key.clone(), id);
        }
        Ok(())
    }

    /// Removes `node` from all indices, including any use edges it recorded.
    pub fn remove(&mut self, id: NodeId, node: &Node) {
        if let Some(per_key) = self.by_key.get_mut(&node.key) {
            per_key.remove(&node.provider);
            if per_key.is_empty() {
                self.by_key.remove(&node.key);
            }
        }
        if let Some(provider) = node.provider
            && let Some(defs) = self.by_provider.get_mut(&provider)
        {
            defs.remove(&node.key);
            if defs.is_empty() {
                self.by_provider.remove(&provider);
            }
        }
        if let Some(used_keys) = self.uses_of_node.remove(&id) {
            let order = (node.provider, node.key.clone());
            for def_key in used_keys {
                if let Some(users) = self.uses_by_def.get_mut(&def_key) {
                    users.remove(&order);
                    if users.is_empty() {
                        self.uses_by_def.remove(&def_key);
                    }
                }
            }
        }
    }

    /// Records that `user` uses `def_key`. Idempotent per (def, user) pair.
    pub fn record_use(
        &mut self,
        def_key: DependencyKey,
        user_id: NodeId,
        user: &Node,
    ) {
        self.uses_by_def
            .entry(def_key.clone())
            .or_default()
            .insert((user.provider, user.key.clone()), user_id);
        self.uses_of_node.entry(user_id).or_default().insert(def_key);
    }

    /// The defs currently owned by `provider`, keyed by dependency key.
    pub fn nodes_for_provider(
        &self,
        provider: ProviderId,
    ) -> Option<&HashMap<DependencyKey, NodeId>> {
        self.by_provider.get(&provider)
    }

    /// The defs of `provider`, sorted by key for deterministic seeding.
    pub fn provider_nodes_sorted(&self, provider: ProviderId) -> Vec<NodeId> {
        let Some(defs) = self.by_provider.get(&provider) else {
            return Vec::new();
        };
        let mut entries: Vec<(&DependencyKey, NodeId)> =
            defs.iter().map(|(key, id)| (key, *id)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// The node for `(key, provider)`, if one exists.
    pub fn node_for(
        &self,
        key: &DependencyKey,
        provider: Option<ProviderId>,
    ) -> Option<NodeId> {
        self.by_key.get(key)?.get(&provider).copied()
    }

    /// True if any node (def or expectation) carries `key`.
    pub fn has_key(&self, key: &DependencyKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Users of `key`, in (provider, key) order. Deterministic.
    pub fn ordered_uses_of(
        &self,
        key: &DependencyKey,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.uses_by_def
            .get(key)
            .into_iter()
            .flat_map(|users| users.values().copied())
    }

    /// All def keys with at least one recorded user. Dot rendering only.
    pub fn used_keys(&self) -> impl Iterator<Item = &DependencyKey> {
        self.uses_by_def.keys()
    }

    /// Every node carrying `key`, defs and expectation alike, in provider
    /// order.
    pub fn nodes_with_key(
        &self,
        key: &DependencyKey,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.by_key
            .get(key)
            .into_iter()
            .flat_map(|per_provider| per_provider.values().copied())
    }

    /// Checks index invariants against the arena:
    ///
    /// 1. at most one node per `(key, provider)` (structural: map shape)
    /// 2. every provider node is indexed by exactly its provider
    /// 3. every index entry points at a live node with matching fields
    pub fn verify(&self, arena: &NodeArena) -> Result<(), GraphError> {
        let mut indexed = 0usize;
        for (key, per_provider) in &self.by_key {
            for (provider, id) in per_provider {
                indexed += 1;
                let Some(node) = arena.get(*id) else {
                    return Err(GraphError::invariant_violated(format!(
                        "by_key entry for `{key}` points at a freed node"
                    )));
                };
                if node.key != *key || node.provider != *provider {
                    return Err(GraphError::invariant_violated(format!(
                        "by_key entry for `{key}` of {provider:?} \
                         disagrees with node `{}` of {:?}",
                        node.key, node.provider
                    )));
                }
                if let Some(provider) = provider {
                    let in_provider_index = self
                        .by_provider
                        .get(provider)
                        .and_then(|defs| defs.get(key))
                        == Some(id);
                    if !in_provider_index {
                        return Err(GraphError::invariant_violated(format!(
                            "node `{key}` of {provider} missing from its \
                             provider index"
                        )));
                    }
                }
            }
        }
        if indexed != arena.len() {
            return Err(GraphError::invariant_violated(format!(
                "{} live nodes but {indexed} by_key entries",
                arena.len()
            )));
        }
        for (key, users) in &self.uses_by_def {
            for ((provider, user_key), id) in users {
                let Some(node) = arena.get(*id) else {
                    return Err(GraphError::invariant_violated(format!(
                        "user of `{key}` points at a freed node"
                    )));
                };
                if node.provider != *provider || node.key != *user_key {
                    return Err(GraphError::invariant_violated(format!(
                        "user of `{key}` indexed under a stale identity"
                    )));
                }
            }
        }
        Ok(())
    }
}
