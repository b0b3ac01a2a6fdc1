//! Ingestion pipelines: bytes in, checksummed and indexed node out.
//!
//! Each pipeline ends with a full persist of the descriptor. Any stat,
//! open or read failure aborts before that persist and surfaces the
//! underlying I/O error unchanged.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use nodevault_config::{log_ingest_debug, log_ingest_info};
use nodevault_meta::Node;

use crate::checksum::{checksum_file, Checksummer};
use crate::index::{size_index_info, SIZE_INDEX};
use crate::layout::tmp_sibling;
use crate::manager::NodeManager;
use crate::upload::FormFile;
use crate::Result;

/// Rename, falling back to copy + remove when `from` and `to` sit on
/// different filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log_ingest_debug!(
                "rename failed, copying instead",
                error = tracing::field::display(&rename_err)
            );
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

impl NodeManager {
    /// Move an uploaded file into the node's data path.
    ///
    /// Uses the upload's precomputed checksums when present, otherwise
    /// streams the moved file once to compute them.
    pub fn set_file(&self, node: &mut Node, file: &FormFile) -> Result<()> {
        let meta = fs::metadata(&file.path)?;
        self.layout().mkdir(&node.id)?;
        let dest = self.layout().data_file(&node.id);
        move_file(&file.path, &dest)?;

        node.file.name = file.name.clone();
        node.file.size = meta.len();
        node.file.path = None;
        node.file.checksum = if file.checksum.is_empty() {
            checksum_file(&dest, self.read_buffer())?.0
        } else {
            file.checksum.clone()
        };
        node.indexes.insert(
            SIZE_INDEX.to_string(),
            size_index_info(node.file.size, self.chunk_size()),
        );
        self.save(node)?;
        log_ingest_info!(
            "file stored",
            id = node.id.as_str(),
            size = node.file.size
        );
        Ok(())
    }

    /// Point the node at an existing file without copying it.
    pub fn set_file_from_path(&self, node: &mut Node, path: &Path) -> Result<()> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )
            .into());
        }
        let (checksum, size) = checksum_file(path, self.read_buffer())?;

        node.file.name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        node.file.size = size;
        node.file.checksum = checksum;
        node.file.path = Some(path.to_path_buf());
        node.indexes.insert(
            SIZE_INDEX.to_string(),
            size_index_info(size, self.chunk_size()),
        );
        self.save(node)?;
        log_ingest_info!(
            "file adopted",
            id = node.id.as_str(),
            path = tracing::field::display(path.display())
        );
        Ok(())
    }

    /// Concatenate `parts/0 .. parts/<count-1>` into the data file,
    /// checksumming in the same pass.
    pub fn set_file_from_parts(&self, node: &mut Node, count: usize) -> Result<()> {
        let parts_dir = self.layout().parts_dir(&node.id);
        let dest = self.layout().data_file(&node.id);
        let tmp = tmp_sibling(&dest);

        let assembled = (|| -> io::Result<Checksummer> {
            let mut out = File::create(&tmp)?;
            let mut sums = Checksummer::new();
            let mut buffer = vec![0u8; self.read_buffer()];
            for i in 0..count {
                let mut part = File::open(parts_dir.join(i.to_string()))?;
                loop {
                    let n = match part.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    };
                    out.write_all(&buffer[..n])?;
                    sums.update(&buffer[..n]);
                }
            }
            out.sync_all()?;
            fs::rename(&tmp, &dest)?;
            Ok(sums)
        })();
        let sums = match assembled {
            Ok(sums) => sums,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };

        let size = fs::metadata(&dest)?.len();
        node.file.name = node.id.clone();
        node.file.size = size;
        node.file.path = None;
        node.file.checksum = sums.finish();
        node.indexes.insert(
            SIZE_INDEX.to_string(),
            size_index_info(size, self.chunk_size()),
        );
        self.save(node)?;
        log_ingest_info!(
            "parts assembled",
            id = node.id.as_str(),
            parts = count,
            size = size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{checksum_reader, MD5, SHA1};
    use crate::reader::ReaderAt;
    use nodevault_config::testing::TestEnvironment;
    use nodevault_meta::MemoryNodeStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn manager(env: &TestEnvironment) -> NodeManager {
        NodeManager::new(&env.config(), Arc::new(MemoryNodeStore::new()))
    }

    #[test]
    fn test_set_file_moves_and_indexes() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let upload = env.upload("reads.fq", &[b'A'; 40]).unwrap();

        let mut sums = BTreeMap::new();
        sums.insert(MD5.to_string(), "precomputed".to_string());
        let form = FormFile {
            name: "reads.fq".into(),
            path: upload.clone(),
            checksum: sums,
        };
        mgr.set_file(&mut node, &form).unwrap();

        assert!(!upload.exists());
        assert!(mgr.layout().data_file(&node.id).is_file());
        assert_eq!(node.file.name, "reads.fq");
        assert_eq!(node.file.size, 40);
        assert_eq!(node.file.checksum[MD5], "precomputed");
        let size = &node.indexes[SIZE_INDEX];
        assert_eq!(size.total_units, 3);
        assert_eq!(size.avg_unit_size, 16);
    }

    #[test]
    fn test_set_file_computes_missing_checksums() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let upload = env.upload("x", b"hello world").unwrap();

        mgr.set_file(&mut node, &FormFile::new("x", upload)).unwrap();
        assert_eq!(node.file.checksum[SHA1], "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_set_file_missing_upload_persists_nothing() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let missing = env.upload_dir.join("nope");

        let err = mgr.set_file(&mut node, &FormFile::new("nope", missing)).unwrap_err();
        assert!(matches!(err, crate::NodeError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(mgr.get(&node.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_file_from_path_adopts() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let data: Vec<u8> = (0..30_000u32).map(|i| (i * 7) as u8).collect();
        let path = env.upload("big.bin", &data).unwrap();

        mgr.set_file_from_path(&mut node, &path).unwrap();
        let (expected, _) = checksum_reader(&data[..], 64).unwrap();
        assert_eq!(node.file.checksum, expected);
        assert_eq!(node.file.size, 30_000);
        assert_eq!(node.file.path.as_deref(), Some(path.as_path()));
        assert!(path.exists());
        assert!(!mgr.layout().data_file(&node.id).exists());

        let reader = mgr.reader(&node).unwrap();
        assert_eq!(reader.read_range(29_998, 10).unwrap(), &data[29_998..]);
    }

    #[test]
    fn test_set_file_from_parts_concatenates() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let parts_dir = mgr.layout().parts_dir(&node.id);
        fs::create_dir_all(&parts_dir).unwrap();
        fs::write(parts_dir.join("0"), b"hello ").unwrap();
        fs::write(parts_dir.join("1"), b"world").unwrap();

        mgr.set_file_from_parts(&mut node, 2).unwrap();
        assert_eq!(
            fs::read(mgr.layout().data_file(&node.id)).unwrap(),
            b"hello world"
        );
        assert_eq!(node.file.name, node.id);
        assert_eq!(node.file.checksum[MD5], "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_set_file_from_parts_missing_part() {
        let env = TestEnvironment::new().unwrap();
        let mgr = manager(&env);
        let mut node = mgr.new_node().unwrap();
        let parts_dir = mgr.layout().parts_dir(&node.id);
        fs::create_dir_all(&parts_dir).unwrap();
        fs::write(parts_dir.join("0"), b"only").unwrap();

        assert!(mgr.set_file_from_parts(&mut node, 2).is_err());
        assert!(!mgr.layout().data_file(&node.id).exists());
    }
}
