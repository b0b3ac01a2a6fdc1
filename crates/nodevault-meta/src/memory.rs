use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::query::{FindOptions, Query};
use crate::store::NodeStore;
use crate::{Node, PreAuth, StoreResult};

/// In-memory node store.
///
/// Intended for tests and embedding. Descriptors live in a `BTreeMap`
/// keyed by identifier, so native order matches [`crate::LmdbNodeStore`].
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    preauth: RwLock<BTreeMap<String, PreAuth>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node descriptors currently stored.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn upsert(&self, node: &Node) -> StoreResult<()> {
        self.nodes.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn find(&self, query: &Query, options: FindOptions) -> StoreResult<Vec<Node>> {
        let nodes = self.nodes.read();
        if let Some(keys) = query.keys() {
            return Ok(options.apply(keys.into_iter().filter_map(|k| nodes.get(k).cloned())));
        }
        Ok(options.apply(nodes.values().filter(|n| query.matches(n)).cloned()))
    }

    fn find_one(&self, query: &Query) -> StoreResult<Option<Node>> {
        let nodes = self.nodes.read();
        if let Some(id) = query.exact_id() {
            return Ok(nodes.get(id).cloned());
        }
        Ok(nodes.values().find(|n| query.matches(n)).cloned())
    }

    fn delete(&self, query: &Query) -> StoreResult<usize> {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|_, n| !query.matches(n));
        Ok(before - nodes.len())
    }

    fn drop_nodes(&self) -> StoreResult<()> {
        self.nodes.write().clear();
        Ok(())
    }

    fn upsert_preauth(&self, preauth: &PreAuth) -> StoreResult<()> {
        self.preauth
            .write()
            .insert(preauth.id.clone(), preauth.clone());
        Ok(())
    }

    fn find_preauth(&self, id: &str) -> StoreResult<Option<PreAuth>> {
        Ok(self.preauth.read().get(id).cloned())
    }

    fn delete_preauth(&self, id: &str) -> StoreResult<()> {
        self.preauth.write().remove(id);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNodeStore")
            .field("node_count", &self.len())
            .finish()
    }
}
