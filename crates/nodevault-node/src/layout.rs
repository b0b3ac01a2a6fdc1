//! Deterministic on-disk placement of node directories.
//!
//! The first six characters of the identifier pick three two-character
//! directory levels, then a leaf directory named after the full id:
//! `base/ab/cd/ef/abcdef...`. This keeps fan-out per directory bounded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nodevault_meta::Node;

/// Content file extension
const DATA_EXT: &str = "data";
/// Descriptor sidecar extension
const DESCRIPTOR_EXT: &str = "json";
/// Materialized index extension
const INDEX_EXT: &str = "idx";

/// Whether `id` can be sharded: at least six characters, all ASCII
/// alphanumerics or `-`.
pub fn is_valid_id(id: &str) -> bool {
    id.len() >= 6 && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Whether `name` can name an index file under `idx/`: non-empty, ASCII
/// alphanumerics, `-` or `_`.
pub fn is_valid_index_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Temp path next to `path` for write-then-rename.
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".tmp.{}.{}", std::process::id(), seq));
    path.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct NodeLayout {
    base: PathBuf,
}

impl NodeLayout {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `base/xx/xx/xx/id`
    pub fn node_dir(&self, id: &str) -> PathBuf {
        let l1 = id.get(0..2).unwrap_or("_");
        let l2 = id.get(2..4).unwrap_or("_");
        let l3 = id.get(4..6).unwrap_or("_");
        self.base.join(l1).join(l2).join(l3).join(id)
    }

    pub fn index_dir(&self, id: &str) -> PathBuf {
        self.node_dir(id).join("idx")
    }

    pub fn parts_dir(&self, id: &str) -> PathBuf {
        self.node_dir(id).join("parts")
    }

    /// Canonical content location, ignoring any path override.
    pub fn data_file(&self, id: &str) -> PathBuf {
        self.node_dir(id).join(format!("{}.{}", id, DATA_EXT))
    }

    pub fn descriptor_file(&self, id: &str) -> PathBuf {
        self.node_dir(id).join(format!("{}.{}", id, DESCRIPTOR_EXT))
    }

    pub fn index_file(&self, id: &str, name: &str) -> PathBuf {
        self.index_dir(id).join(format!("{}.{}", name, INDEX_EXT))
    }

    /// Where the node's bytes live: the override when set, else `data_file`.
    ///
    /// Prefer [`crate::NodeManager::reader`] for content access; virtual
    /// nodes have no file at this path.
    pub fn file_path(&self, node: &Node) -> PathBuf {
        match &node.file.path {
            Some(path) => path.clone(),
            None => self.data_file(&node.id),
        }
    }

    /// Create the node directory and its index subdirectory.
    ///
    /// Existing directories are not an error; any other failure is.
    pub fn mkdir(&self, id: &str) -> io::Result<()> {
        fs::create_dir_all(self.node_dir(id))?;
        fs::create_dir_all(self.index_dir(id))
    }

    /// Remove the node directory recursively. A missing directory is fine.
    pub fn rmdir(&self, id: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.node_dir(id)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
