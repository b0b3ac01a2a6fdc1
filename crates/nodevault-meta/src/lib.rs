//! # nodevault-meta
//!
//! Node descriptors and the metadata store that persists them.
//!
//! A [`Node`] is the document describing one stored object: its identity,
//! file descriptor, index catalog, access record and relationships. The
//! [`NodeStore`] trait is the contract the node engine needs from a
//! document store:
//!
//! - upsert keyed by the unique node identifier
//! - predicate queries ([`Query`]) with optional pagination
//! - predicate deletes
//! - a small side collection for [`PreAuth`] tokens
//!
//! ## Storage Backends
//!
//! - [`LmdbNodeStore`]: LMDB-backed, persistent, one transaction per call
//! - [`MemoryNodeStore`]: `BTreeMap` behind a lock, for tests and embedding

pub mod acl;
pub mod lmdb;
pub mod memory;
pub mod query;
pub mod store;

pub use acl::{Acl, Rights};
pub use lmdb::LmdbNodeStore;
pub use memory::MemoryNodeStore;
pub use query::{FindOptions, Query};
pub use store::NodeStore;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from metadata store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no reachable metadata store at {address:?} within {timeout:?}")]
    Unreachable { address: PathBuf, timeout: Duration },

    #[error("failed to establish identifier index: {0}")]
    IndexInit(String),

    #[error("Entry not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Sentinel stored in `last_modified` until the first modification.
pub const NEVER_MODIFIED: &str = "-";

/// Relation type marking a node as derived from the linked ids.
pub const PARENT_RELATION: &str = "parent";

/// Catalog entry for one index over a node's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    #[serde(rename = "index_type")]
    pub index_type: String,
    pub total_units: u64,
    #[serde(rename = "average_unit_size")]
    pub avg_unit_size: u64,
}

/// Typed relationship to other nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linkage {
    #[serde(rename = "relation")]
    pub relation: String,
    pub ids: Vec<String>,
    /// How the relationship was derived, e.g. a transform name
    #[serde(default)]
    pub operation: String,
}

/// Content descriptor of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFile {
    pub name: String,
    pub size: u64,
    /// Algorithm name → lowercase hex digest
    pub checksum: BTreeMap<String, String>,
    /// Set only when the node wraps a file living outside the data root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub format: String,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Ordered ids whose content is concatenated; empty unless virtual
    pub virtual_parts: Vec<String>,
}

/// Stored descriptor of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub file: NodeFile,
    /// Opaque to the engine
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub indexes: HashMap<String, IndexInfo>,
    #[serde(default)]
    pub acl: Acl,
    #[serde(default)]
    pub version_parts: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub revisions: Vec<Node>,
    #[serde(default, rename = "linkage")]
    pub linkages: Vec<Linkage>,
    #[serde(default)]
    pub created_on: String,
    #[serde(default = "never_modified")]
    pub last_modified: String,
}

fn never_modified() -> String {
    NEVER_MODIFIED.to_string()
}

impl Node {
    /// Fresh node with a new random identifier and empty containers.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Empty node with a caller-chosen identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: String::new(),
            file: NodeFile::default(),
            attributes: serde_json::Value::Null,
            indexes: HashMap::new(),
            acl: Acl::default(),
            version_parts: BTreeMap::new(),
            tags: Vec::new(),
            revisions: Vec::new(),
            linkages: Vec::new(),
            created_on: String::new(),
            last_modified: never_modified(),
        }
    }

    /// Whether any part of the file descriptor has been populated.
    pub fn has_file(&self) -> bool {
        !self.file.name.is_empty()
            || self.file.size != 0
            || !self.file.checksum.is_empty()
            || self.file.path.is_some()
    }

    /// Whether any linkage marks this node as derived.
    pub fn has_parent(&self) -> bool {
        self.linkages.iter().any(|l| l.relation == PARENT_RELATION)
    }

    /// Extension of the display name including the dot, or empty.
    pub fn file_ext(&self) -> String {
        std::path::Path::new(&self.file.name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Copy of this node suitable for the revision list.
    pub fn snapshot(&self) -> Node {
        let mut snap = self.clone();
        snap.revisions.clear();
        snap
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Short-lived authorization token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAuth {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub node_id: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}
