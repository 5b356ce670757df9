//! Append-only log of the agent's output.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// The `.agent-output.jsonl` sink.
///
/// Opened in append mode, so every run adds to the same file. Each line is
/// written with a single `write_all` and flushed before the next is read.
#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    file: File,
    lines_written: u64,
}

impl OutputLog {
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file,
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Append `line` plus a newline and flush.
    pub async fn append_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        self.file.write_all(&buf).await?;
        self.file.flush().await?;
        self.lines_written += 1;
        Ok(())
    }
}
