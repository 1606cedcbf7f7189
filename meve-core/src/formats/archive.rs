//! Read/patch access to zip-based containers.
//!
//! [`ArchivePart`] is the narrow surface the OOXML codec needs: read a part,
//! stage a replacement, and serialize. [`ZipArchivePart`] rewrites only the
//! staged parts; every other entry is raw-copied with its original
//! compression, so untouched parts stay byte-identical.

use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{MeveError, Result};

/// Upper bound on a single part read into memory.
pub const MAX_PART_BYTES: u64 = 8 * 1024 * 1024;

/// A container made of named parts.
pub trait ArchivePart {
    /// Contents of `path`, or `None` if the part does not exist.
    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Stage new contents for `path`, replacing or adding the part.
    fn write(&mut self, path: &str, bytes: Vec<u8>);

    /// Whether `path` exists (staged parts included).
    fn contains(&self, path: &str) -> bool;

    /// Serialize the container with all staged writes applied.
    fn finish(self) -> Result<Vec<u8>>
    where
        Self: Sized;
}

/// [`ArchivePart`] over an in-memory zip.
pub struct ZipArchivePart<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    /// Staged writes in the order they were made.
    staged: Vec<(String, Vec<u8>)>,
}

impl<'a> ZipArchivePart<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self {
            archive,
            staged: Vec::new(),
        })
    }

    fn staged(&self, path: &str) -> Option<&Vec<u8>> {
        self.staged
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, bytes)| bytes)
    }
}

impl ArchivePart for ZipArchivePart<'_> {
    fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.staged(path) {
            return Ok(Some(bytes.clone()));
        }
        let file = match self.archive.by_name(path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        file.take(MAX_PART_BYTES + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > MAX_PART_BYTES {
            return Err(MeveError::SizeExceeded {
                size: buf.len(),
                max: MAX_PART_BYTES as usize,
            });
        }
        Ok(Some(buf))
    }

    fn write(&mut self, path: &str, bytes: Vec<u8>) {
        match self.staged.iter_mut().find(|(name, _)| name == path) {
            Some((_, existing)) => *existing = bytes,
            None => self.staged.push((path.to_string(), bytes)),
        }
    }

    fn contains(&self, path: &str) -> bool {
        self.staged(path).is_some() || self.archive.index_for_name(path).is_some()
    }

    fn finish(self) -> Result<Vec<u8>> {
        let Self {
            mut archive,
            staged,
        } = self;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut written = vec![false; staged.len()];

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            let name = file.name().to_string();
            match staged.iter().position(|(path, _)| *path == name) {
                Some(slot) => {
                    // Rewrite in place to keep entry order stable.
                    drop(file);
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(&staged[slot].1)?;
                    written[slot] = true;
                }
                None => writer.raw_copy_file(file)?,
            }
        }

        let mut added = 0usize;
        for ((path, bytes), done) in staged.iter().zip(&written) {
            if !done {
                writer.start_file(path.as_str(), options)?;
                writer.write_all(bytes)?;
                added += 1;
            }
        }

        let out = writer.finish()?.into_inner();
        debug!(
            entries = archive.len() + added,
            replaced = written.iter().filter(|w| **w).count(),
            added,
            "Rewrote zip container"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn names(bytes: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        archive.file_names().map(str::to_string).collect::<Vec<_>>()
    }

    #[test]
    fn test_read_existing_and_missing() {
        let zip = build_zip(&[("a.txt", b"alpha")]);
        let mut part = ZipArchivePart::open(&zip).unwrap();
        assert_eq!(part.read("a.txt").unwrap().as_deref(), Some(&b"alpha"[..]));
        assert_eq!(part.read("missing").unwrap(), None);
        assert!(part.contains("a.txt"));
        assert!(!part.contains("missing"));
    }

    #[test]
    fn test_staged_write_visible_to_read() {
        let zip = build_zip(&[("a.txt", b"alpha")]);
        let mut part = ZipArchivePart::open(&zip).unwrap();
        part.write("a.txt", b"beta".to_vec());
        assert_eq!(part.read("a.txt").unwrap().as_deref(), Some(&b"beta"[..]));
    }

    #[test]
    fn test_finish_replaces_and_appends() {
        let zip = build_zip(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);
        let mut part = ZipArchivePart::open(&zip).unwrap();
        part.write("a.txt", b"ALPHA".to_vec());
        part.write("c.txt", b"charlie".to_vec());
        let out = part.finish().unwrap();

        assert_eq!(names(&out), vec!["a.txt", "b.txt", "c.txt"]);
        let mut reread = ZipArchivePart::open(&out).unwrap();
        assert_eq!(reread.read("a.txt").unwrap().unwrap(), b"ALPHA");
        assert_eq!(reread.read("b.txt").unwrap().unwrap(), b"bravo");
        assert_eq!(reread.read("c.txt").unwrap().unwrap(), b"charlie");
    }

    #[test]
    fn test_untouched_entry_keeps_compression() {
        let zip = build_zip(&[("keep.bin", &[7u8; 512])]);
        let mut part = ZipArchivePart::open(&zip).unwrap();
        part.write("new.xml", b"<x/>".to_vec());
        let out = part.finish().unwrap();
        let mut archive = ZipArchive::new(Cursor::new(out.as_slice())).unwrap();
        let kept = archive.by_name("keep.bin").unwrap();
        assert_eq!(kept.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(ZipArchivePart::open(b"PK\x03\x04garbage").is_err());
    }
}
