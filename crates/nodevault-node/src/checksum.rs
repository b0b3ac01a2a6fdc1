//! Single-pass MD5 + SHA-1 over a byte stream.
//!
//! Both digests are fed from the same fixed-size buffer so a file of any
//! size is read exactly once and never held in memory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use sha1::Sha1;

pub const MD5: &str = "md5";
pub const SHA1: &str = "sha1";

/// Accumulates both digests over whatever is fed to it.
#[derive(Clone, Default)]
pub struct Checksummer {
    md5: Md5,
    sha1: Sha1,
    bytes: u64,
}

impl Checksummer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes seen so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Algorithm name → lowercase hex digest
    pub fn finish(self) -> BTreeMap<String, String> {
        let mut sums = BTreeMap::new();
        sums.insert(MD5.to_string(), hex::encode(self.md5.finalize()));
        sums.insert(SHA1.to_string(), hex::encode(self.sha1.finalize()));
        sums
    }
}

/// Drain `reader` through a `buf_size` buffer, returning digests and the
/// number of bytes read. Read errors abort and are returned as-is.
pub fn checksum_reader<R: Read>(
    mut reader: R,
    buf_size: usize,
) -> io::Result<(BTreeMap<String, String>, u64)> {
    let mut sums = Checksummer::new();
    let mut buffer = vec![0u8; buf_size.max(1)];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sums.update(&buffer[..n]);
    }
    let bytes = sums.bytes();
    Ok((sums.finish(), bytes))
}

pub fn checksum_file(
    path: &Path,
    buf_size: usize,
) -> io::Result<(BTreeMap<String, String>, u64)> {
    checksum_reader(File::open(path)?, buf_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let (sums, n) = checksum_reader(&b"hello world"[..], 4).unwrap();
        assert_eq!(n, 11);
        assert_eq!(sums[MD5], "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(sums[SHA1], "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_empty_input() {
        let (sums, n) = checksum_reader(io::empty(), 16).unwrap();
        assert_eq!(n, 0);
        assert_eq!(sums[MD5], "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(sums[SHA1], "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_buffer_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (a, _) = checksum_reader(&data[..], 7).unwrap();
        let (b, _) = checksum_reader(&data[..], 10240).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut sums = Checksummer::new();
        sums.update(b"hello ");
        sums.update(b"world");
        let (one_shot, _) = checksum_reader(&b"hello world"[..], 64).unwrap();
        assert_eq!(sums.finish(), one_shot);
    }
}
