//! Staging artifacts: newline-delimited record files handed to the loader.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tracing::warn;

use crate::error::Result;

/// Artifact path for one destination table.
pub fn artifact_path(dir: &Path, namespace: &str, table: &str) -> PathBuf {
    dir.join(format!("{namespace}_{table}_final.jsonl"))
}

/// Append-only writer for one table's staging artifact.
pub struct StagingFile {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl StagingFile {
    /// Create the artifact, truncating a leftover from an earlier run.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = %path.display(), "truncating stale staging artifact");
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one record per line.
    pub async fn append<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.writer.write_all(line.as_ref().as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.records += 1;
        }
        Ok(())
    }

    /// Flush and close, returning the path and the record count.
    pub async fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        Ok((self.path, self.records))
    }

    /// Close and delete the artifact.
    pub async fn discard(self) -> Result<()> {
        let (path, _) = self.finish().await?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}

/// Reads an artifact back in bounded chunks.
pub struct StagingReader {
    lines: Lines<BufReader<File>>,
}

impl StagingReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }

    /// Up to `max` non-blank lines; empty at end of file.
    pub async fn next_chunk(&mut self, max: usize) -> Result<Vec<String>> {
        let mut chunk = Vec::with_capacity(max.min(4096));
        while chunk.len() < max {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => chunk.push(line),
                None => break,
            }
        }
        Ok(chunk)
    }
}
