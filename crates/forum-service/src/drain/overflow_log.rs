//! Append-only JSON-lines file for batches the dead-letter consumer gave up on.
//!
//! Each line is one [`DeadLetterRecord`]. A replay first moves the file to a
//! `.replaying` sibling and only deletes it once every record was retried or
//! appended back, so a crash mid-replay loses nothing. A replay left over from
//! a crash is picked up by the next one. Lines that do not parse go to a
//! `.quarantine` sibling.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::dead_letter::DeadLetterRecord;

#[derive(Debug, Error)]
pub enum OverflowLogError {
    #[error("overflow log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("overflow log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OverflowLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    replay: Arc<Mutex<()>>,
}

/// Records taken out for a replay. They stay on disk until [`Replay::finish`].
#[derive(Debug)]
pub struct Replay {
    pub records: Vec<DeadLetterRecord>,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl Replay {
    /// Drop the replayed file once every record is settled
    pub async fn finish(self) -> Result<(), OverflowLogError> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("overflow"));
    name.push(suffix);
    path.with_file_name(name)
}

async fn read_optional(path: &Path) -> Result<String, OverflowLogError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

async fn append_synced(path: &Path, contents: &[u8]) -> Result<(), OverflowLogError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(contents).await?;
    file.sync_data().await?;
    Ok(())
}

impl OverflowLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
            replay: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replaying_path(&self) -> PathBuf {
        sibling(&self.path, ".replaying")
    }

    pub fn quarantine_path(&self) -> PathBuf {
        sibling(&self.path, ".quarantine")
    }

    pub async fn append(&self, record: &DeadLetterRecord) -> Result<(), OverflowLogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        append_synced(&self.path, line.as_bytes()).await
    }

    /// Move the log aside and hand out its records, together with any replay a
    /// crash left unfinished. One replay runs at a time.
    pub async fn begin_replay(&self) -> Result<Replay, OverflowLogError> {
        let guard = Arc::clone(&self.replay).lock_owned().await;
        let replaying = self.replaying_path();
        {
            let _guard = self.lock.lock().await;
            let fresh = read_optional(&self.path).await?;
            if !fresh.is_empty() {
                append_synced(&replaying, fresh.as_bytes()).await?;
            }
            match fs::remove_file(&self.path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        let contents = read_optional(&replaying).await?;
        let mut records = Vec::new();
        let mut quarantined = String::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeadLetterRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        path = %replaying.display(),
                        line = index + 1,
                        error = %e,
                        "Quarantining malformed overflow log line"
                    );
                    quarantined.push_str(line);
                    quarantined.push('\n');
                }
            }
        }
        if !quarantined.is_empty() {
            append_synced(&self.quarantine_path(), quarantined.as_bytes()).await?;
        }

        Ok(Replay {
            records,
            path: replaying,
            _guard: guard,
        })
    }

    /// Records currently waiting in the log, without removing them
    pub async fn records(&self) -> Result<Vec<DeadLetterRecord>, OverflowLogError> {
        let _guard = self.lock.lock().await;
        let contents = read_optional(&self.path).await?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(OverflowLogError::from))
            .collect()
    }

    /// Records currently in the file, without removing them
    pub async fn count(&self) -> Result<usize, OverflowLogError> {
        let _guard = self.lock.lock().await;
        let contents = read_optional(&self.path).await?;
        Ok(contents.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

#[cfg(test)]
pub(crate) fn temp_log() -> OverflowLog {
    OverflowLog::new(std::env::temp_dir().join(format!("forum-overflow-{}.jsonl", uuid::Uuid::new_v4())))
}
