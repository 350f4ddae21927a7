use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::DispatcherError;

/// Append-only, byte-addressable writer for result lines.
pub struct OutputWriter {
    file: File,
    path: PathBuf,
    position: u64,
}

impl OutputWriter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DispatcherError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DispatcherError::OpenOutput {
                path: path.clone(),
                source,
            })?;
        let position = file
            .metadata()
            .map_err(|source| DispatcherError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        Ok(Self {
            file,
            path,
            position,
        })
    }

    /// Current length of the output file in bytes.
    pub fn byte_len(&self) -> u64 {
        self.position
    }

    /// Appends raw bytes and flushes immediately. Every prefix-flush must
    /// end with a flush so the crash-recovery byte-count heuristic
    /// (spec.md §4.1.2) always sees a consistent file length.
    pub fn append(&mut self, data: &[u8]) -> Result<(), DispatcherError> {
        self.file
            .write_all(data)
            .map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.file
            .flush()
            .map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Reads every complete line starting at `offset` through EOF. Used
    /// only during recovery to count results written after the last
    /// checkpoint (spec.md §4.1.2).
    pub fn read_lines_from(&self, offset: u64) -> Result<Vec<String>, DispatcherError> {
        let mut file = File::open(&self.path).map_err(|source| DispatcherError::Io {
            path: self.path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
        let reader = BufReader::new(file);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| DispatcherError::Io {
                path: self.path.clone(),
                source,
            })?;
            lines.push(line);
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_byte_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = OutputWriter::open(&path).unwrap();
        assert_eq!(writer.byte_len(), 0);

        writer.append(b"A\n").unwrap();
        assert_eq!(writer.byte_len(), 2);
        writer.append(b"BB\n").unwrap();
        assert_eq!(writer.byte_len(), 5);
    }

    #[test]
    fn reopening_an_existing_file_picks_up_its_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        {
            let mut writer = OutputWriter::open(&path).unwrap();
            writer.append(b"A\nB\n").unwrap();
        }
        let writer = OutputWriter::open(&path).unwrap();
        assert_eq!(writer.byte_len(), 4);
    }

    #[test]
    fn read_lines_from_returns_only_lines_after_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = OutputWriter::open(&path).unwrap();
        writer.append(b"A\nB\nC\n").unwrap();

        let lines = writer.read_lines_from(2).unwrap();
        assert_eq!(lines, vec!["B".to_string(), "C".to_string()]);
    }
}
