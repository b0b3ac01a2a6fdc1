//! Node lifecycle: creation, persistence, lookup, composition, deletion.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use nodevault_config::{log_node_debug, log_node_info, log_node_warn, Config};
use nodevault_meta::{FindOptions, LmdbNodeStore, Linkage, Node, NodeStore, Query};
use serde::Serialize;

use crate::checksum::checksum_reader;
use crate::gate::PartGate;
use crate::layout::{is_valid_id, tmp_sibling, NodeLayout};
use crate::reader::{ContentReader, FileReader, MultiReader, ReaderAt};
use crate::upload::FormFile;
use crate::{NodeError, Result};

/// Owns everything needed to operate on nodes: the metadata store, the
/// on-disk layout, ingest tunables and the multi-part gate.
pub struct NodeManager {
    store: Arc<dyn NodeStore>,
    layout: NodeLayout,
    chunk_size: u64,
    read_buffer: usize,
    part_gate: PartGate,
}

impl NodeManager {
    pub fn new(config: &Config, store: Arc<dyn NodeStore>) -> Self {
        Self {
            store,
            layout: NodeLayout::new(&config.storage.data_path),
            chunk_size: config.storage.chunk_size.max(1),
            read_buffer: config.ingest.read_buffer_size.max(1),
            part_gate: PartGate::new(),
        }
    }

    /// Connect to the LMDB store named in `config` and build a manager on it.
    pub fn open(config: &Config) -> Result<Self> {
        let store = LmdbNodeStore::connect(&config.store)?;
        Ok(Self::new(config, Arc::new(store)))
    }

    pub fn store(&self) -> &dyn NodeStore {
        &*self.store
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn read_buffer(&self) -> usize {
        self.read_buffer
    }

    pub fn part_gate(&self) -> &PartGate {
        &self.part_gate
    }

    /// Fresh node with its directory created. Not yet persisted.
    pub fn new_node(&self) -> Result<Node> {
        let node = Node::new();
        self.layout.mkdir(&node.id)?;
        Ok(node)
    }

    /// Stamp, version and persist `node`: descriptor sidecar first, then
    /// the store.
    pub fn save(&self, node: &mut Node) -> Result<()> {
        if !is_valid_id(&node.id) {
            return Err(NodeError::InvalidId(node.id.clone()));
        }
        let now = chrono::Utc::now().to_rfc3339();
        if node.created_on.is_empty() {
            node.created_on = now;
        } else {
            node.last_modified = now;
        }

        update_version(node)?;
        let changed = node
            .revisions
            .last()
            .map_or(true, |r| r.version != node.version);
        if changed {
            node.revisions.push(node.snapshot());
        }

        self.write_descriptor(node)?;
        self.store.upsert(node)?;
        log_node_debug!(
            "saved node",
            id = node.id.as_str(),
            version = node.version.as_str()
        );
        Ok(())
    }

    fn write_descriptor(&self, node: &Node) -> Result<()> {
        self.layout.mkdir(&node.id)?;
        let path = self.layout.descriptor_file(&node.id);
        let tmp = tmp_sibling(&path);
        let bytes = serde_json::to_vec_pretty(node)?;
        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(&bytes)?;
            f.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Node> {
        if !is_valid_id(id) {
            return Err(NodeError::InvalidId(id.to_string()));
        }
        self.store
            .get(id)?
            .ok_or_else(|| NodeError::NotFound(id.to_string()))
    }

    /// Read a node straight from its descriptor sidecar, bypassing the store.
    pub fn load_from_disk(&self, id: &str) -> Result<Node> {
        if !is_valid_id(id) {
            return Err(NodeError::InvalidId(id.to_string()));
        }
        let bytes = match fs::read(self.layout.descriptor_file(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(NodeError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Random-access reader over the node's logical content.
    ///
    /// Virtual nodes resolve their parts recursively, in declared order.
    pub fn reader(&self, node: &Node) -> Result<ContentReader> {
        let mut visiting = Vec::new();
        self.resolve(node, &mut visiting)
    }

    fn resolve(&self, node: &Node, visiting: &mut Vec<String>) -> Result<ContentReader> {
        if visiting.iter().any(|id| id == &node.id) {
            return Err(NodeError::CompositionCycle(node.id.clone()));
        }
        if !node.file.is_virtual {
            let path = self.layout.file_path(node);
            return Ok(ContentReader::Direct(FileReader::open(path)?));
        }

        let found = self.store.find(
            &Query::IdIn(node.file.virtual_parts.clone()),
            FindOptions::default(),
        )?;
        let by_id: HashMap<String, Node> = found.into_iter().map(|n| (n.id.clone(), n)).collect();

        visiting.push(node.id.clone());
        let mut parts = Vec::with_capacity(node.file.virtual_parts.len());
        for part_id in &node.file.virtual_parts {
            let part = by_id.get(part_id).ok_or_else(|| NodeError::Composition {
                part: part_id.clone(),
                source: Box::new(NodeError::NotFound(part_id.clone())),
            })?;
            let reader = self.resolve(part, visiting).map_err(|e| match e {
                e @ NodeError::CompositionCycle(_) => e,
                e @ NodeError::Composition { .. } => e,
                e => NodeError::Composition {
                    part: part_id.clone(),
                    source: Box::new(e),
                },
            })?;
            parts.push(reader);
        }
        visiting.pop();

        Ok(ContentReader::Composite(MultiReader::new(parts)))
    }

    /// Turn `node` into a virtual node over `ids`, then persist.
    ///
    /// The node must not hold content yet. Every part must resolve and the
    /// composition must be acyclic; on failure `node` is left unchanged.
    pub fn set_virtual_parts(&self, node: &mut Node, ids: Vec<String>) -> Result<()> {
        if node.has_file() {
            return Err(NodeError::FileAlreadySet(node.id.clone()));
        }
        if ids.is_empty() {
            return Err(NodeError::InvalidParam(
                "virtual node needs at least one source".to_string(),
            ));
        }
        let mut candidate = node.clone();
        candidate.file.is_virtual = true;
        candidate.file.virtual_parts = ids;
        candidate.file.path = None;

        let content = self.reader(&candidate)?;
        let (checksum, size) = checksum_reader(content.sequential(), self.read_buffer)?;
        if candidate.file.name.is_empty() {
            candidate.file.name = candidate.id.clone();
        }
        candidate.file.size = size;
        candidate.file.checksum = checksum;
        debug_assert_eq!(size, content.size());

        self.save(&mut candidate)?;
        log_node_info!(
            "virtual node composed",
            id = candidate.id.as_str(),
            parts = candidate.file.virtual_parts.len(),
            size = size
        );
        *node = candidate;
        Ok(())
    }

    pub fn set_file_format(&self, node: &mut Node, format: &str) -> Result<()> {
        node.file.format = format.to_string();
        self.save(node)
    }

    /// Replace attributes with the JSON document in `attr`.
    pub fn set_attributes(&self, node: &mut Node, attr: &FormFile) -> Result<()> {
        let bytes = fs::read(&attr.path)?;
        node.attributes = serde_json::from_slice(&bytes)?;
        self.save(node)
    }

    /// Append tags not already present.
    pub fn add_tags<S: AsRef<str>>(&self, node: &mut Node, tags: &[S]) -> Result<()> {
        for tag in tags {
            let tag = tag.as_ref().trim();
            if !tag.is_empty() && !node.tags.iter().any(|t| t == tag) {
                node.tags.push(tag.to_string());
            }
        }
        self.save(node)
    }

    pub fn add_linkage(&self, node: &mut Node, linkage: Linkage) -> Result<()> {
        if linkage.relation.is_empty() {
            return Err(NodeError::InvalidParam("linkage relation is empty".to_string()));
        }
        node.linkages.push(linkage);
        self.save(node)
    }

    /// Delete a node unless another node composes it.
    ///
    /// The metadata record goes first, then the directory. A crash in
    /// between leaves an orphan directory, never a dangling record.
    pub fn delete(&self, node: &Node) -> Result<()> {
        if !is_valid_id(&node.id) {
            return Err(NodeError::InvalidId(node.id.clone()));
        }
        if let Some(referrer) = self.store.find_one(&Query::VirtualPart(node.id.clone()))? {
            log_node_warn!(
                "delete refused, node is a virtual part",
                id = node.id.as_str(),
                referrer = referrer.id.as_str()
            );
            return Err(NodeError::NodeReferenced(node.id.clone()));
        }
        self.store.delete(&Query::Id(node.id.clone()))?;
        self.layout.rmdir(&node.id)?;
        log_node_info!("node deleted", id = node.id.as_str());
        Ok(())
    }
}

fn component_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Recompute per-component digests and the overall version.
fn update_version(node: &mut Node) -> Result<()> {
    let indexes: BTreeMap<_, _> = node.indexes.iter().collect();
    let mut parts = BTreeMap::new();
    parts.insert("file".to_string(), component_digest(&node.file)?);
    parts.insert("attributes".to_string(), component_digest(&node.attributes)?);
    parts.insert("indexes".to_string(), component_digest(&indexes)?);
    parts.insert("acl".to_string(), component_digest(&node.acl)?);
    parts.insert("tags".to_string(), component_digest(&node.tags)?);
    parts.insert("linkage".to_string(), component_digest(&node.linkages)?);

    let mut hasher = blake3::Hasher::new();
    for (name, digest) in &parts {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    node.version = hasher.finalize().to_hex().to_string();
    node.version_parts = parts;
    Ok(())
}
