//! Random-access readers over node content.
//!
//! A plain node is read straight from its file. A virtual node is read
//! through a [`MultiReader`] that maps an absolute offset onto the
//! concatenation of its parts without ever materializing that stream.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Positional reads against a fixed-size byte source.
pub trait ReaderAt: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns 0 at or past the end; never errors for being out of range.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total number of bytes addressable.
    fn size(&self) -> u64;

    /// Read `len` bytes at `offset`, truncated to what exists.
    fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let size = self.size();
        if offset >= size {
            return Ok(Vec::new());
        }
        let want = len.min((size - offset) as usize);
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A single file on disk.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    size: u64,
}

impl FileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ReaderAt for FileReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.size - offset) as usize);
        loop {
            #[cfg(unix)]
            let res = std::os::unix::fs::FileExt::read_at(&self.file, &mut buf[..want], offset);
            #[cfg(windows)]
            let res = std::os::windows::fs::FileExt::seek_read(&self.file, &mut buf[..want], offset);
            match res {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Logical concatenation of part readers.
#[derive(Debug)]
pub struct MultiReader {
    parts: Vec<ContentReader>,
    /// Absolute offset at which each part begins
    starts: Vec<u64>,
    size: u64,
}

impl MultiReader {
    pub fn new(parts: Vec<ContentReader>) -> Self {
        let mut starts = Vec::with_capacity(parts.len());
        let mut size = 0u64;
        for part in &parts {
            starts.push(size);
            size += part.size();
        }
        Self {
            parts,
            starts,
            size,
        }
    }

    /// Index of the part holding absolute `offset`. Empty parts are skipped.
    fn locate(&self, offset: u64) -> usize {
        // Last part starting at or before `offset`
        let idx = self.starts.partition_point(|&s| s <= offset);
        idx.saturating_sub(1)
    }
}

impl ReaderAt for MultiReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let mut filled = 0usize;
        let mut pos = offset;
        let mut idx = self.locate(offset);
        while filled < buf.len() && idx < self.parts.len() {
            let part = &self.parts[idx];
            let local = pos - self.starts[idx];
            if local >= part.size() {
                idx += 1;
                continue;
            }
            let n = part.read_at(&mut buf[filled..], local)?;
            if n == 0 {
                // Part shrank underneath us; move on rather than spin.
                idx += 1;
                continue;
            }
            filled += n;
            pos += n as u64;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Reader capability of a node: direct file access or composition.
#[derive(Debug)]
pub enum ContentReader {
    Direct(FileReader),
    Composite(MultiReader),
}

impl ContentReader {
    pub fn is_composite(&self) -> bool {
        matches!(self, ContentReader::Composite(_))
    }

    /// Sequential `io::Read` view starting at offset 0.
    pub fn sequential(&self) -> SequentialReader<'_> {
        SequentialReader::new(self)
    }
}

impl ReaderAt for ContentReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self {
            ContentReader::Direct(r) => r.read_at(buf, offset),
            ContentReader::Composite(r) => r.read_at(buf, offset),
        }
    }

    fn size(&self) -> u64 {
        match self {
            ContentReader::Direct(r) => r.size(),
            ContentReader::Composite(r) => r.size(),
        }
    }
}

/// Cursor over any [`ReaderAt`].
pub struct SequentialReader<'a> {
    inner: &'a dyn ReaderAt,
    pos: u64,
}

impl<'a> SequentialReader<'a> {
    pub fn new(inner: &'a dyn ReaderAt) -> Self {
        Self { inner, pos: 0 }
    }
}

impl Read for SequentialReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_part(dir: &TempDir, name: &str, data: &[u8]) -> ContentReader {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        ContentReader::Direct(FileReader::open(&path).unwrap())
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_file_reader_truncates_at_end() {
        let dir = TempDir::new().unwrap();
        let r = file_part(&dir, "a", b"0123456789");
        assert_eq!(r.size(), 10);
        assert_eq!(r.read_range(7, 10).unwrap(), b"789");
        assert!(r.read_range(10, 4).unwrap().is_empty());
        assert!(r.read_range(99, 4).unwrap().is_empty());
    }

    #[test]
    fn test_read_across_boundary() {
        let dir = TempDir::new().unwrap();
        let a = pattern(10, 0);
        let b = pattern(20, 100);
        let multi = MultiReader::new(vec![file_part(&dir, "a", &a), file_part(&dir, "b", &b)]);
        assert_eq!(multi.size(), 30);

        let mut expected = a[5..].to_vec();
        expected.extend_from_slice(&b[..15]);
        assert_eq!(multi.read_range(5, 20).unwrap(), expected);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let dir = TempDir::new().unwrap();
        let multi = MultiReader::new(vec![
            file_part(&dir, "a", b"abc"),
            file_part(&dir, "b", b"def"),
        ]);
        assert_eq!(multi.read_range(4, 100).unwrap(), b"ef");
        assert!(multi.read_range(6, 1).unwrap().is_empty());
    }

    #[test]
    fn test_empty_parts_are_skipped() {
        let dir = TempDir::new().unwrap();
        let multi = MultiReader::new(vec![
            file_part(&dir, "a", b"ab"),
            file_part(&dir, "e", b""),
            file_part(&dir, "b", b"cd"),
        ]);
        assert_eq!(multi.read_range(0, 4).unwrap(), b"abcd");
        assert_eq!(multi.read_range(2, 1).unwrap(), b"c");
    }

    #[test]
    fn test_nested_composition() {
        let dir = TempDir::new().unwrap();
        let inner = MultiReader::new(vec![
            file_part(&dir, "a", b"hello "),
            file_part(&dir, "b", b"brave "),
        ]);
        let outer = MultiReader::new(vec![
            ContentReader::Composite(inner),
            file_part(&dir, "c", b"world"),
        ]);
        assert_eq!(outer.read_range(0, 64).unwrap(), b"hello brave world");
        assert_eq!(outer.read_range(4, 6).unwrap(), b"o brav");
    }

    #[test]
    fn test_sequential_reader() {
        let dir = TempDir::new().unwrap();
        let content = ContentReader::Composite(MultiReader::new(vec![
            file_part(&dir, "a", b"abc"),
            file_part(&dir, "b", b"defg"),
        ]));
        let mut out = Vec::new();
        content.sequential().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefg");
    }
}
