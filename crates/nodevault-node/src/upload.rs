//! Upload requests: the parameter and file maps an API layer hands to the
//! engine, and their translation into node operations.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use nodevault_config::{log_node_info, log_node_warn};
use nodevault_meta::{Acl, Linkage, Node, Query};

use crate::manager::NodeManager;
use crate::{NodeError, Result};

/// A file already written to a temporary location by the upload handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFile {
    pub name: String,
    pub path: PathBuf,
    /// Digests computed while receiving, if any
    pub checksum: BTreeMap<String, String>,
}

impl FormFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            checksum: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub params: HashMap<String, String>,
    pub files: HashMap<String, FormFile>,
}

impl UploadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn file(mut self, key: impl Into<String>, file: FormFile) -> Self {
        self.files.insert(key.into(), file);
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| NodeError::InvalidParam(format!("{} must be a non-negative integer, got {:?}", key, value)))
}

impl NodeManager {
    /// Create a node owned by `owner` (anonymous when `None`), apply the
    /// request, and persist.
    pub fn create_node(&self, owner: Option<&str>, req: &UploadRequest) -> Result<Node> {
        let mut node = self.new_node()?;
        node.acl = match owner {
            Some(principal) if !principal.is_empty() => Acl::for_owner(principal),
            _ => Acl::default(),
        };
        let applied = self
            .update(&mut node, req)
            .and_then(|_| self.save(&mut node));
        if let Err(e) = applied {
            self.discard(&node.id);
            return Err(e);
        }
        log_node_info!("node created", id = node.id.as_str());
        Ok(node)
    }

    /// Remove whatever a failed creation left behind: record and directory.
    fn discard(&self, id: &str) {
        if let Err(e) = self.store().delete(&Query::Id(id.to_string())) {
            log_node_warn!(
                "failed to roll back node record",
                id = id,
                error = tracing::field::display(&e)
            );
        }
        if let Err(e) = self.layout().rmdir(id) {
            log_node_warn!(
                "failed to roll back node directory",
                id = id,
                error = tracing::field::display(&e)
            );
        }
    }

    /// Apply an upload request to an existing node.
    ///
    /// At most one content source may be given: `upload` file, `type=virtual`,
    /// `path`, or `parts`. Content cannot be replaced once set; only the
    /// fragments of a started multi-part upload (`part` + `upload`) may follow.
    pub fn update(&self, node: &mut Node, req: &UploadRequest) -> Result<()> {
        let part = req.get("part");
        let upload = req.files.get("upload");
        let is_virtual = req.get("type") == Some("virtual");

        let sources = [
            upload.is_some() && part.is_none(),
            is_virtual,
            req.get("path").is_some(),
            req.get("parts").is_some(),
        ];
        if sources.iter().filter(|s| **s).count() > 1 {
            return Err(NodeError::InvalidParam(
                "more than one content source in request".to_string(),
            ));
        }
        if sources.iter().any(|s| *s) && node.has_file() {
            return Err(NodeError::FileAlreadySet(node.id.clone()));
        }

        if let (Some(file), None) = (upload, part) {
            self.set_file(node, file)?;
        }

        if is_virtual {
            let source = req
                .get("source")
                .ok_or_else(|| NodeError::InvalidParam("virtual node requires source".to_string()))?;
            self.set_virtual_parts(node, split_list(source))?;
        }

        if let Some(path) = req.get("path") {
            self.set_file_from_path(node, std::path::Path::new(path))?;
        }

        if let Some(count) = req.get("parts") {
            let count = parse_count("parts", count)?;
            self.start_parts(node, count)?;
        }

        if let Some(n) = part {
            let n = parse_count("part", n)?;
            let file = upload
                .ok_or_else(|| NodeError::InvalidParam("part requires an upload file".to_string()))?;
            self.add_part(node, n, file)?;
        }

        if let Some(attr) = req.files.get("attributes") {
            self.set_attributes(node, attr)?;
        }

        if let Some(format) = req.get("format") {
            self.set_file_format(node, format)?;
        }

        if let Some(tags) = req.get("tags") {
            self.add_tags(node, &split_list(tags))?;
        }

        if let Some(relation) = req.get("linkage") {
            let ids = req
                .get("linkage_ids")
                .map(split_list)
                .unwrap_or_default();
            if ids.is_empty() {
                return Err(NodeError::InvalidParam("linkage requires linkage_ids".to_string()));
            }
            self.add_linkage(
                node,
                Linkage {
                    relation: relation.to_string(),
                    ids,
                    operation: req.get("linkage_operation").unwrap_or_default().to_string(),
                },
            )?;
        }

        Ok(())
    }
}
