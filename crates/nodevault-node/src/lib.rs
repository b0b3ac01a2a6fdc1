//! # nodevault-node
//!
//! Storage engine for nodes: opaque, possibly very large files kept on a
//! local filesystem, checksummed on ingest, indexed in fixed or named
//! chunks, and optionally composed from other nodes without copying bytes.
//!
//! ## Directory Layout
//!
//! ```text
//! <data_path>/
//! └── ab/
//!     └── cd/
//!         └── ef/
//!             └── abcdef01-...-id/
//!                 ├── abcdef01-...-id.data   # content (absent when virtual)
//!                 ├── abcdef01-...-id.json   # descriptor sidecar
//!                 ├── parts/                 # multi-part upload staging
//!                 └── idx/
//!                     └── <name>.idx         # materialized indexes
//! ```
//!
//! ## Components
//!
//! - [`layout`]: id → directory sharding
//! - [`checksum`]: single-pass MD5 + SHA-1 streaming
//! - [`NodeManager`]: node lifecycle, ingestion pipelines, deletion
//! - [`index`]: size index, stored indexes, virtualized indexes
//! - [`reader`]: random-access readers over plain and composed content
//! - [`PartGate`]: serializes multi-part upload coordination

pub mod checksum;
pub mod gate;
pub mod index;
pub mod ingest;
pub mod layout;
pub mod manager;
pub mod parts;
pub mod reader;
pub mod upload;

pub use checksum::{checksum_file, checksum_reader, Checksummer};
pub use gate::{PartGate, PartPermit};
pub use index::{size_index_info, Index, StoredIndex, VirtualIndex, SIZE_INDEX};
pub use layout::{is_valid_id, is_valid_index_name, NodeLayout};
pub use manager::NodeManager;
pub use parts::{PartFile, PartsList};
pub use reader::{ContentReader, FileReader, MultiReader, ReaderAt, SequentialReader};
pub use upload::{FormFile, UploadRequest};

pub use nodevault_meta::{IndexInfo, Linkage, Node, NodeFile, NodeStore};

use std::io;
use std::path::PathBuf;

use nodevault_meta::StoreError;
use thiserror::Error;

/// Errors from node operations
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node not found: {0}")]
    NotFound(String),

    /// Deletion refused: another node lists this one as a virtual part.
    #[error("node referenced: {0}")]
    NodeReferenced(String),

    #[error("invalid node id: {0:?}")]
    InvalidId(String),

    #[error("file already set on node {0}")]
    FileAlreadySet(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("multi-part upload not started for node {0}")]
    PartsNotStarted(String),

    #[error("part {part} out of range, node expects {count} parts")]
    PartOutOfRange { part: usize, count: usize },

    #[error("cannot compose part {part}: {source}")]
    Composition {
        part: String,
        #[source]
        source: Box<NodeError>,
    },

    #[error("virtual composition cycle through node {0}")]
    CompositionCycle(String),

    #[error("index {index} not found for node {node}")]
    IndexNotFound { node: String, index: String },

    #[error("corrupt index {path:?}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },
}

impl NodeError {
    /// The node or index being addressed does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NodeError::NotFound(_)
                | NodeError::IndexNotFound { .. }
                | NodeError::Store(StoreError::NotFound(_))
        )
    }

    /// Deletion was blocked by a virtual-part reference.
    pub fn is_referenced(&self) -> bool {
        matches!(self, NodeError::NodeReferenced(_))
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_distinct() {
        let referenced = NodeError::NodeReferenced("abcdef".into());
        let missing = NodeError::NotFound("abcdef".into());
        let io = NodeError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));

        assert!(referenced.is_referenced() && !referenced.is_not_found());
        assert!(missing.is_not_found() && !missing.is_referenced());
        assert!(!io.is_not_found() && !io.is_referenced());
    }

    #[test]
    fn test_composition_error_keeps_source() {
        let err = NodeError::Composition {
            part: "p1".into(),
            source: Box::new(NodeError::NotFound("p1".into())),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "node not found: p1");
    }
}
