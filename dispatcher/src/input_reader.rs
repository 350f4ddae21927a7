use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::DispatcherError;

/// Sequential, byte-addressable reader over the input file.
///
/// Opened in binary mode deliberately: text-mode position APIs do not
/// represent true byte offsets on every platform, and the dispatcher's
/// crash-recovery heuristic (spec.md §4.1.2) depends on offsets being
/// exact byte counts.
pub struct InputReader {
    reader: BufReader<File>,
    path: PathBuf,
    position: u64,
    total_len: u64,
}

impl InputReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DispatcherError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| DispatcherError::OpenInput {
            path: path.clone(),
            source,
        })?;
        let total_len = file
            .metadata()
            .map_err(|source| DispatcherError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        Ok(Self {
            reader: BufReader::new(file),
            path,
            position: 0,
            total_len,
        })
    }

    /// Seek to a previously-recorded byte offset (e.g. from a checkpoint).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), DispatcherError> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.position = offset;
        Ok(())
    }

    /// Current byte offset of the reader.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads the next line. Returns `(content, offset)` where `content` has
    /// its trailing `\n` stripped and `offset` is the byte position
    /// immediately after that terminator (or immediately after the last
    /// byte read, if the file has no trailing newline). Returns `None` at
    /// EOF.
    pub fn read_line(&mut self) -> Result<Option<(String, u64)>, DispatcherError> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.position += n as u64;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let content = String::from_utf8_lossy(&buf).into_owned();
        Ok(Some((content, self.position)))
    }

    /// Bytes left unread in the input file.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_len.saturating_sub(self.position)
    }
}
