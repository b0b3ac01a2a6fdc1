use crate::query::{FindOptions, Query};
use crate::{Node, PreAuth, StoreResult};

/// Document store holding node descriptors.
///
/// All implementations must satisfy these invariants:
/// - The node identifier is unique: `upsert` inserts or fully replaces the
///   descriptor stored under `node.id`.
/// - `find` makes no promise that results follow any requested id order.
/// - `find_one` returns the first match in store-native order.
/// - Each call acquires its own session/transaction and releases it on
///   every exit path.
pub trait NodeStore: Send + Sync {
    /// Insert or replace the descriptor keyed by `node.id`.
    fn upsert(&self, node: &Node) -> StoreResult<()>;

    /// All matches, paginated when `options` carries both limit and offset.
    fn find(&self, query: &Query, options: FindOptions) -> StoreResult<Vec<Node>>;

    /// First match, if any.
    fn find_one(&self, query: &Query) -> StoreResult<Option<Node>>;

    /// Remove every match. Returns the number removed.
    fn delete(&self, query: &Query) -> StoreResult<usize>;

    /// Remove every node descriptor.
    fn drop_nodes(&self) -> StoreResult<()>;

    fn upsert_preauth(&self, preauth: &PreAuth) -> StoreResult<()>;

    fn find_preauth(&self, id: &str) -> StoreResult<Option<PreAuth>>;

    fn delete_preauth(&self, id: &str) -> StoreResult<()>;

    /// Look up a single node by identifier.
    fn get(&self, id: &str) -> StoreResult<Option<Node>> {
        self.find_one(&Query::Id(id.to_string()))
    }
}
