//! Chunk indexes over node content.
//!
//! An index splits a node's bytes into numbered units, each an
//! `(offset, length)` record. Two sources exist:
//!
//! - stored: a binary file under `idx/<name>.idx`, little-endian `u64`
//!   offset/length pairs, 16 bytes per unit
//! - virtual: computed on demand from the content by a built-in algorithm
//!   looked up by name (`size`, `line`)
//!
//! The `size` index is always available and never needs scanning.

use std::fs;
use std::io::Write;
use std::path::Path;

use nodevault_config::log_index_debug;
use nodevault_meta::{IndexInfo, Node};
use once_cell::sync::OnceCell;

use crate::layout::{is_valid_index_name, tmp_sibling};
use crate::manager::NodeManager;
use crate::reader::{ContentReader, ReaderAt};
use crate::{NodeError, Result};

pub const SIZE_INDEX: &str = "size";
pub const LINE_INDEX: &str = "line";

/// Bytes per stored record
const RECORD_LEN: usize = 16;

/// Index names computable from content alone.
const VIRTUAL_INDEXES: &[&str] = &[SIZE_INDEX, LINE_INDEX];

pub fn has_virtual(name: &str) -> bool {
    VIRTUAL_INDEXES.contains(&name)
}

/// Catalog entry for the fixed-window size index.
pub fn size_index_info(size: u64, chunk_size: u64) -> IndexInfo {
    IndexInfo {
        index_type: SIZE_INDEX.to_string(),
        total_units: size.div_ceil(chunk_size.max(1)),
        avg_unit_size: chunk_size,
    }
}

/// A numbered partition of a node's bytes.
pub trait Index: Send + Sync {
    fn index_type(&self) -> &str;

    fn total_units(&self) -> Result<u64>;

    /// `(offset, length)` of unit `n` (0-based).
    fn part(&self, n: u64) -> Result<(u64, u64)>;

    /// All unit records in order.
    fn records(&self) -> Result<Vec<(u64, u64)>>;

    /// Byte span covering units `from..to`.
    fn range(&self, from: u64, to: u64) -> Result<(u64, u64)> {
        if from >= to {
            return Err(NodeError::InvalidParam(format!(
                "empty unit range {}..{}",
                from, to
            )));
        }
        let (start, _) = self.part(from)?;
        let (last_off, last_len) = self.part(to - 1)?;
        last_off
            .checked_add(last_len)
            .and_then(|end| end.checked_sub(start))
            .map(|len| (start, len))
            .ok_or_else(|| {
                NodeError::InvalidParam(format!(
                    "units {}..{} do not form a contiguous byte span",
                    from, to
                ))
            })
    }

    fn info(&self) -> Result<IndexInfo> {
        let records = self.records()?;
        let total: u64 = records.iter().map(|(_, len)| len).sum();
        let units = records.len() as u64;
        Ok(IndexInfo {
            index_type: self.index_type().to_string(),
            total_units: units,
            avg_unit_size: if units == 0 { 0 } else { total / units },
        })
    }
}

fn check_index_name(name: &str) -> Result<()> {
    if is_valid_index_name(name) {
        Ok(())
    } else {
        Err(NodeError::InvalidParam(format!("invalid index name {:?}", name)))
    }
}

fn unit_out_of_range(n: u64, total: u64) -> NodeError {
    NodeError::InvalidParam(format!("unit {} out of range, index has {}", n, total))
}

/// Index loaded from its on-disk binary form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIndex {
    index_type: String,
    records: Vec<(u64, u64)>,
}

impl StoredIndex {
    pub fn new(index_type: impl Into<String>, records: Vec<(u64, u64)>) -> Self {
        Self {
            index_type: index_type.into(),
            records,
        }
    }

    pub fn load(path: &Path, index_type: &str) -> Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() % RECORD_LEN != 0 {
            return Err(NodeError::CorruptIndex {
                path: path.to_path_buf(),
                reason: format!("length {} is not a multiple of {}", bytes.len(), RECORD_LEN),
            });
        }
        let records: Vec<(u64, u64)> = bytes
            .chunks_exact(RECORD_LEN)
            .map(|rec| {
                let mut off = [0u8; 8];
                let mut len = [0u8; 8];
                off.copy_from_slice(&rec[..8]);
                len.copy_from_slice(&rec[8..]);
                (u64::from_le_bytes(off), u64::from_le_bytes(len))
            })
            .collect();

        // Units must be in byte order and must not overlap.
        let mut prev_end = 0u64;
        for (n, (off, len)) in records.iter().enumerate() {
            let end = off.checked_add(*len);
            match end {
                Some(end) if *off >= prev_end => prev_end = end,
                _ => {
                    return Err(NodeError::CorruptIndex {
                        path: path.to_path_buf(),
                        reason: format!("unit {} at ({}, {}) is out of order", n, off, len),
                    })
                }
            }
        }
        Ok(Self::new(index_type, records))
    }

    /// Write records to `path` via a temp file and rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::with_capacity(self.records.len() * RECORD_LEN);
        for (off, len) in &self.records {
            buf.extend_from_slice(&off.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }
        let tmp = tmp_sibling(path);
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Index for StoredIndex {
    fn index_type(&self) -> &str {
        &self.index_type
    }

    fn total_units(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    fn part(&self, n: u64) -> Result<(u64, u64)> {
        self.records
            .get(n as usize)
            .copied()
            .ok_or_else(|| unit_out_of_range(n, self.records.len() as u64))
    }

    fn records(&self) -> Result<Vec<(u64, u64)>> {
        Ok(self.records.clone())
    }
}

enum VirtualKind {
    Size { chunk_size: u64 },
    Line { read_buffer: usize },
}

/// Index computed from content by a built-in algorithm.
pub struct VirtualIndex {
    name: String,
    kind: VirtualKind,
    content: ContentReader,
    records: OnceCell<Vec<(u64, u64)>>,
}

impl VirtualIndex {
    /// `None` when `name` has no built-in algorithm.
    pub fn new(
        name: &str,
        content: ContentReader,
        chunk_size: u64,
        read_buffer: usize,
    ) -> Option<Self> {
        let kind = match name {
            SIZE_INDEX => VirtualKind::Size {
                chunk_size: chunk_size.max(1),
            },
            LINE_INDEX => VirtualKind::Line {
                read_buffer: read_buffer.max(1),
            },
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            kind,
            content,
            records: OnceCell::new(),
        })
    }

    fn line_records(&self, read_buffer: usize) -> Result<Vec<(u64, u64)>> {
        log_index_debug!("scanning for line records", size = self.content.size());
        let size = self.content.size();
        let mut records = Vec::new();
        let mut window = vec![0u8; read_buffer];
        let mut start = 0u64;
        let mut pos = 0u64;
        while pos < size {
            let n = self.content.read_at(&mut window, pos)?;
            if n == 0 {
                break;
            }
            for (i, b) in window[..n].iter().enumerate() {
                if *b == b'\n' {
                    let end = pos + i as u64 + 1;
                    records.push((start, end - start));
                    start = end;
                }
            }
            pos += n as u64;
        }
        if start < pos {
            records.push((start, pos - start));
        }
        Ok(records)
    }

    fn cached(&self) -> Result<&Vec<(u64, u64)>> {
        self.records.get_or_try_init(|| match self.kind {
            VirtualKind::Size { chunk_size } => {
                let size = self.content.size();
                let units = size.div_ceil(chunk_size);
                Ok((0..units)
                    .map(|n| {
                        let off = n * chunk_size;
                        (off, chunk_size.min(size - off))
                    })
                    .collect())
            }
            VirtualKind::Line { read_buffer } => self.line_records(read_buffer),
        })
    }
}

impl Index for VirtualIndex {
    fn index_type(&self) -> &str {
        &self.name
    }

    fn total_units(&self) -> Result<u64> {
        match self.kind {
            VirtualKind::Size { chunk_size } => Ok(self.content.size().div_ceil(chunk_size)),
            VirtualKind::Line { .. } => Ok(self.cached()?.len() as u64),
        }
    }

    fn part(&self, n: u64) -> Result<(u64, u64)> {
        match self.kind {
            VirtualKind::Size { chunk_size } => {
                let size = self.content.size();
                let total = size.div_ceil(chunk_size);
                if n >= total {
                    return Err(unit_out_of_range(n, total));
                }
                let off = n * chunk_size;
                Ok((off, chunk_size.min(size - off)))
            }
            VirtualKind::Line { .. } => {
                let records = self.cached()?;
                records
                    .get(n as usize)
                    .copied()
                    .ok_or_else(|| unit_out_of_range(n, records.len() as u64))
            }
        }
    }

    fn records(&self) -> Result<Vec<(u64, u64)>> {
        Ok(self.cached()?.clone())
    }

    fn info(&self) -> Result<IndexInfo> {
        match self.kind {
            VirtualKind::Size { chunk_size } => {
                Ok(size_index_info(self.content.size(), chunk_size))
            }
            VirtualKind::Line { .. } => {
                let units = self.cached()?.len() as u64;
                let size = self.content.size();
                Ok(IndexInfo {
                    index_type: self.name.clone(),
                    total_units: units,
                    avg_unit_size: if units == 0 { 0 } else { size / units },
                })
            }
        }
    }
}

impl NodeManager {
    /// `size` always exists; any other name needs a stored index file.
    pub fn has_index(&self, node: &Node, name: &str) -> bool {
        name == SIZE_INDEX
            || (is_valid_index_name(name) && self.layout().index_file(&node.id, name).is_file())
    }

    /// Stored index if materialized, else a virtual one, else not found.
    pub fn index(&self, node: &Node, name: &str) -> Result<Box<dyn Index>> {
        check_index_name(name)?;
        let path = self.layout().index_file(&node.id, name);
        if path.is_file() {
            log_index_debug!("loading stored index", node = node.id.as_str(), index = name);
            return Ok(Box::new(StoredIndex::load(&path, name)?));
        }
        if has_virtual(name) {
            let content = self.reader(node)?;
            if let Some(index) =
                VirtualIndex::new(name, content, self.chunk_size(), self.read_buffer())
            {
                return Ok(Box::new(index));
            }
        }
        Err(NodeError::IndexNotFound {
            node: node.id.clone(),
            index: name.to_string(),
        })
    }

    /// Record index metadata on the descriptor and persist.
    pub fn set_index_info(&self, node: &mut Node, name: &str, info: IndexInfo) -> Result<()> {
        check_index_name(name)?;
        node.indexes.insert(name.to_string(), info);
        self.save(node)
    }

    /// Compute a virtualizable index, write it under `idx/`, and record it.
    pub fn materialize_index(&self, node: &mut Node, name: &str) -> Result<IndexInfo> {
        if !has_virtual(name) {
            return Err(NodeError::IndexNotFound {
                node: node.id.clone(),
                index: name.to_string(),
            });
        }
        let content = self.reader(node)?;
        let index = VirtualIndex::new(name, content, self.chunk_size(), self.read_buffer())
            .ok_or_else(|| NodeError::IndexNotFound {
                node: node.id.clone(),
                index: name.to_string(),
            })?;
        let stored = StoredIndex::new(name, index.records()?);
        let info = index.info()?;

        self.layout().mkdir(&node.id)?;
        stored.write(&self.layout().index_file(&node.id, name))?;
        log_index_debug!(
            "materialized index",
            node = node.id.as_str(),
            index = name,
            units = info.total_units
        );
        self.set_index_info(node, name, info.clone())?;
        Ok(info)
    }
}
