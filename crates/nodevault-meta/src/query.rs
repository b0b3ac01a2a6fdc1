//! Predicate language for find, find-one and delete.

use crate::Node;

/// Predicate over stored node descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every node
    All,
    /// Exactly the node with this identifier
    Id(String),
    /// Any node whose identifier is in the list; result order is not
    /// tied to list order
    IdIn(Vec<String>),
    /// Nodes whose virtual-parts list contains the identifier
    VirtualPart(String),
    /// Nodes carrying the tag
    Tag(String),
    /// Nodes owned by the principal
    Owner(String),
    /// Nodes readable by the principal, or public ones
    Readable(String),
    /// Nodes with a linkage of any relation pointing at the identifier
    LinkedTo(String),
    /// Conjunction
    And(Vec<Query>),
}

impl Query {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Query::All => true,
            Query::Id(id) => node.id == *id,
            Query::IdIn(ids) => ids.iter().any(|id| *id == node.id),
            Query::VirtualPart(id) => node.file.virtual_parts.iter().any(|p| p == id),
            Query::Tag(tag) => node.tags.iter().any(|t| t == tag),
            Query::Owner(principal) => node.acl.owner == *principal,
            Query::Readable(principal) => node.acl.is_public() || node.acl.can_read(principal),
            Query::LinkedTo(id) => node
                .linkages
                .iter()
                .any(|l| l.ids.iter().any(|linked| linked == id)),
            Query::And(all) => all.iter().all(|q| q.matches(node)),
        }
    }

    /// The single key this query is pinned to, if any.
    pub(crate) fn exact_id(&self) -> Option<&str> {
        match self {
            Query::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Keys to fetch directly instead of scanning, in key order without
    /// duplicates. `None` when the query is not pinned to identifiers.
    pub(crate) fn keys(&self) -> Option<Vec<&str>> {
        let mut keys: Vec<&str> = match self {
            Query::Id(id) => vec![id.as_str()],
            Query::IdIn(ids) => ids.iter().map(String::as_str).collect(),
            _ => return None,
        };
        keys.sort_unstable();
        keys.dedup();
        Some(keys)
    }
}

/// Optional pagination for [`crate::NodeStore::find`].
///
/// Applied only when both `limit` and `offset` are set; otherwise the
/// query returns every match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FindOptions {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub(crate) fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => items.skip(offset).take(limit).collect(),
            _ => items.collect(),
        }
    }
}
