//! Append-only file tailing
//!
//! Tracks a byte offset into a growing session log and hands back only the
//! newly appended bytes on each poll. Truncation (the file shrinking under
//! us) resets the offset so the whole file is re-read.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Result of one tail poll.
#[derive(Debug)]
pub struct TailRead {
    /// Newly appended bytes since the last poll (possibly empty)
    pub bytes: Vec<u8>,
    /// True when the file shrank and reading restarted from the beginning
    pub truncated: bool,
}

/// Incremental reader over one append-only file.
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
}

impl FileTailer {
    /// Tail `path` starting from the beginning.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
        }
    }

    /// Tail `path` starting from `offset` (resume case).
    pub fn from_offset(path: &Path, offset: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            offset,
        }
    }

    /// Current byte offset (everything before it has been returned).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read everything appended since the last poll.
    pub fn read_new(&mut self) -> Result<TailRead> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let len = file.metadata()?.len();

        let truncated = len < self.offset;
        if truncated {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                len = len,
                "file truncated, re-reading from start"
            );
            self.offset = 0;
        }

        if len == self.offset {
            return Ok(TailRead {
                bytes: Vec::new(),
                truncated,
            });
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut bytes)?;
        self.offset += bytes.len() as u64;

        Ok(TailRead { bytes, truncated })
    }
}
