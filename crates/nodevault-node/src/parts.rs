//! Multi-part uploads.
//!
//! A node expecting `count` fragments keeps them under `parts/` as
//! `parts/0 .. parts/<count-1>` next to a `parts.json` progress record.
//! Once every fragment is present they are concatenated into the data
//! file and the staging directory is removed. All of this runs under the
//! manager's [`PartGate`](crate::PartGate).

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use nodevault_config::{log_ingest_debug, log_ingest_info};
use nodevault_meta::Node;
use serde::{Deserialize, Serialize};

use crate::layout::tmp_sibling;
use crate::manager::NodeManager;
use crate::upload::FormFile;
use crate::{NodeError, Result};

const PARTS_FILE: &str = "parts.json";

/// Received fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartFile {
    pub name: String,
    #[serde(default)]
    pub checksum: BTreeMap<String, String>,
}

/// Progress of a multi-part upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartsList {
    /// Fragments expected
    pub count: usize,
    /// Fragments received
    pub length: usize,
    pub parts: Vec<Option<PartFile>>,
}

impl PartsList {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            length: 0,
            parts: vec![None; count],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.length == self.count
    }

    /// Part numbers still outstanding
    pub fn missing(&self) -> Vec<usize> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

impl NodeManager {
    fn parts_file(&self, node: &Node) -> PathBuf {
        self.layout().parts_dir(&node.id).join(PARTS_FILE)
    }

    fn write_parts_list(&self, node: &Node, list: &PartsList) -> Result<()> {
        let path = self.parts_file(node);
        let tmp = tmp_sibling(&path);
        let bytes = serde_json::to_vec(list)?;
        let written = fs::File::create(&tmp).and_then(|mut f| f.write_all(&bytes));
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn read_parts_list(&self, node: &Node) -> Result<PartsList> {
        match fs::read(self.parts_file(node)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(NodeError::PartsNotStarted(node.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Prepare `node` to receive `count` fragments. An upload already in
    /// progress is not restarted.
    pub fn start_parts(&self, node: &Node, count: usize) -> Result<PartsList> {
        if count == 0 {
            return Err(NodeError::InvalidParam("parts count must be positive".to_string()));
        }
        if node.has_file() {
            return Err(NodeError::FileAlreadySet(node.id.clone()));
        }
        let _permit = self.part_gate().acquire();
        if self.parts_file(node).is_file() {
            return Err(NodeError::InvalidParam(format!(
                "multi-part upload already started on {}",
                node.id
            )));
        }
        fs::create_dir_all(self.layout().parts_dir(&node.id))?;
        let list = PartsList::new(count);
        self.write_parts_list(node, &list)?;
        log_ingest_debug!("multi-part upload started", id = node.id.as_str(), count = count);
        Ok(list)
    }

    /// Record fragment `n` (0-based). The fragment that completes the set
    /// triggers assembly into the data file.
    pub fn add_part(&self, node: &mut Node, n: usize, file: &FormFile) -> Result<PartsList> {
        let _permit = self.part_gate().acquire();
        let mut list = self.read_parts_list(node)?;
        if n >= list.count {
            return Err(NodeError::PartOutOfRange {
                part: n,
                count: list.count,
            });
        }

        let dest = self.layout().parts_dir(&node.id).join(n.to_string());
        if let Err(rename_err) = fs::rename(&file.path, &dest) {
            log_ingest_debug!(
                "part rename failed, copying instead",
                error = tracing::field::display(&rename_err)
            );
            fs::copy(&file.path, &dest)?;
            fs::remove_file(&file.path)?;
        }
        if list.parts[n].is_none() {
            list.length += 1;
        }
        list.parts[n] = Some(PartFile {
            name: file.name.clone(),
            checksum: file.checksum.clone(),
        });
        self.write_parts_list(node, &list)?;

        if list.is_complete() {
            self.set_file_from_parts(node, list.count)?;
            fs::remove_dir_all(self.layout().parts_dir(&node.id))?;
            log_ingest_info!("multi-part upload complete", id = node.id.as_str(), count = list.count);
        }
        Ok(list)
    }

    /// Current progress of a multi-part upload.
    pub fn parts_status(&self, node: &Node) -> Result<PartsList> {
        self.read_parts_list(node)
    }
}
