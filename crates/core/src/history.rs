use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub username: String,
    pub query: String,
    pub response: String,
    pub asked_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn now(username: impl Into<String>, query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            query: query.into(),
            response: response.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Append-only JSON-lines log of answered questions.
pub struct HistoryLog {
    path: PathBuf,
    append: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, entry: &HistoryEntry) -> Result<(), IngestError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.append.lock().await;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Newest first. Lines that fail to parse are skipped.
    pub async fn recent(&self, username: &str, limit: usize) -> Result<Vec<HistoryEntry>, IngestError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut entries: Vec<HistoryEntry> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(path = %self.path.display(), %error, "skipping corrupt history line");
                    None
                }
            })
            .filter(|entry| entry.username == username)
            .collect();

        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_log_reads_as_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let log = HistoryLog::new(dir.path().join("history.jsonl"));
        assert!(log.recent("ada", 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn recent_is_per_user_and_newest_first() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let log = HistoryLog::new(dir.path().join("nested").join("history.jsonl"));

        log.record(&HistoryEntry::now("ada", "first?", "one")).await?;
        log.record(&HistoryEntry::now("bob", "other?", "two")).await?;
        log.record(&HistoryEntry::now("ada", "second?", "three")).await?;
        log.record(&HistoryEntry::now("ada", "third?", "four")).await?;

        let recent = log.recent("ada", 2).await?;
        let queries: Vec<_> = recent.iter().map(|entry| entry.query.as_str()).collect();
        assert_eq!(queries, vec!["third?", "second?"]);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("history.jsonl");
        tokio::fs::write(&path, "not json\n").await?;

        let log = HistoryLog::new(&path);
        log.record(&HistoryEntry::now("ada", "q?", "a")).await?;

        assert_eq!(log.recent("ada", 10).await?.len(), 1);
        Ok(())
    }
}
