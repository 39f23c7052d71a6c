// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-store
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Errors from journal operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O operation on the journal file failed.
    #[error("journal i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("journal record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An append-only JSONL journal of records of type `T`.
///
/// The journal owns its file handle; callers provide single-writer
/// discipline (one journal instance behind one lock per shard).
#[derive(Debug)]
pub struct JsonlJournal<T> {
    path: PathBuf,
    file: File,
    _record: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonlJournal<T> {
    /// Open (or create) the journal at `path` and recover its contents.
    ///
    /// Recovery reads records from offset zero and stops at the first line
    /// that does not parse; anything past that point is a torn append and is
    /// truncated away so the next append lands on a record boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be opened or truncated.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<T>), StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut records = Vec::new();
        let mut durable_len: u64 = 0;
        let mut torn = false;

        if path.exists() {
            let data = std::fs::read(&path)?;
            for chunk in data.split_inclusive(|b| *b == b'\n') {
                // A chunk without its terminating newline is a torn append,
                // whether or not its bytes happen to parse.
                if chunk.last() != Some(&b'\n') {
                    torn = true;
                    break;
                }
                match serde_json::from_slice::<T>(&chunk[..chunk.len() - 1]) {
                    Ok(record) => {
                        durable_len += chunk.len() as u64;
                        records.push(record);
                    }
                    Err(_) => {
                        torn = true;
                        break;
                    }
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if torn {
            warn!(
                path = %path.display(),
                durable_records = records.len(),
                "discarding torn journal tail"
            );
            file.set_len(durable_len)?;
            file.seek(SeekFrom::End(0))?;
        }

        Ok((
            Self {
                path,
                file,
                _record: PhantomData,
            },
            records,
        ))
    }

    /// Durably append one record: write, flush, fsync.
    ///
    /// The record must only be made visible to readers after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure; on failure the
    /// caller must treat the record as not written.
    pub fn append(&mut self, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
        label: String,
    }

    fn row(n: u32) -> Row {
        Row {
            n,
            label: format!("row-{n}"),
        }
    }

    #[test]
    fn append_then_reopen_recovers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let (mut journal, existing) = JsonlJournal::<Row>::open(&path).unwrap();
            assert!(existing.is_empty());
            for n in 0..5 {
                journal.append(&row(n)).unwrap();
            }
        }

        let (_, recovered) = JsonlJournal::<Row>::open(&path).unwrap();
        assert_eq!(recovered.len(), 5);
        assert_eq!(recovered[4], row(4));
    }

    #[test]
    fn torn_tail_is_discarded_and_append_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let (mut journal, _) = JsonlJournal::<Row>::open(&path).unwrap();
            journal.append(&row(1)).unwrap();
            journal.append(&row(2)).unwrap();
        }

        // Simulate a crash mid-append: half a record, no trailing newline.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"n\":3,\"lab").unwrap();
        }

        let (mut journal, recovered) = JsonlJournal::<Row>::open(&path).unwrap();
        assert_eq!(recovered.len(), 2);

        journal.append(&row(3)).unwrap();
        drop(journal);

        let (_, recovered) = JsonlJournal::<Row>::open(&path).unwrap();
        assert_eq!(recovered, vec![row(1), row(2), row(3)]);
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/journal.jsonl");
        let (mut journal, _) = JsonlJournal::<Row>::open(&path).unwrap();
        journal.append(&row(7)).unwrap();
        assert!(path.exists());
    }
}
