//! Append-only JSONL files with advisory locking.
//!
//! Backs the event journal, the event archive and bus history overflow.
//! Lines are only ever appended; nothing here truncates or rewrites a file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use fs2::FileExt;

const MAX_LOCK_RETRIES: usize = 10;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct JsonlFile {
    path: PathBuf,
}

impl JsonlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize `records` and append them under an exclusive lock.
    pub async fn append<T: Serialize>(&self, records: &[T]) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| io::Error::other(format!("failed to serialize record: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::append_locked(&path, buf.as_bytes()))
            .await
            .map_err(|e| io::Error::other(format!("journal writer task failed: {e}")))?
    }

    fn append_locked(path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path)?;

        for _ in 0..MAX_LOCK_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    file.seek(SeekFrom::End(0))?;
                    let result = file.write_all(bytes).and_then(|_| file.flush());
                    let _ = FileExt::unlock(&file);
                    return result;
                }
                Err(_) => std::thread::sleep(LOCK_RETRY_SLEEP),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("could not acquire exclusive lock on {:?}", path),
        ))
    }

    /// Read every record. Malformed lines are skipped with a warning.
    pub async fn read_all<T: DeserializeOwned + Send + 'static>(&self) -> io::Result<Vec<T>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_blocking(&path))
            .await
            .map_err(|e| io::Error::other(format!("journal reader task failed: {e}")))?
    }

    fn read_blocking<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(path)?;
        FileExt::lock_shared(&file)?;
        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed line {} in {:?}: {}", lineno + 1, path, e),
            }
        }
        let _ = FileExt::unlock(&file);
        debug!("Read {} records from {:?}", records.len(), path);
        Ok(records)
    }
}
