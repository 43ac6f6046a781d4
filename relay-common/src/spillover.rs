use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const DAY_FORMAT: &str = "%d-%m-%y";

/// The two journal categories: publish spillover and consumer-side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Accesses,
    AccessErrors,
}

impl LogCategory {
    fn prefix(self) -> &'static str {
        match self {
            LogCategory::Accesses => "accesses",
            LogCategory::AccessErrors => "access_errors",
        }
    }
}

/// Spillover file write/read failures have no further fallback: callers log
/// them as an operational alert and move on.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("spillover file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("spillover entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ReplayOutcome {
    pub total: usize,
    pub replayed: usize,
    pub deleted: bool,
}

/// Append-only journal of JSON lines, one file per calendar day per category
/// (`accesses_<DD-MM-YY>.log`, `access_errors_<DD-MM-YY>.log`).
#[derive(Debug, Clone)]
pub struct SpilloverStore {
    dir: PathBuf,
}

impl SpilloverStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, category: LogCategory, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.log", category.prefix(), day.format(DAY_FORMAT)))
    }

    /// Append one record to the day's file, creating directories as needed.
    /// The file is closed before returning, nothing survives only in memory.
    pub async fn append(
        &self,
        category: LogCategory,
        day: NaiveDate,
        entry: &Value,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(category, day))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Files of the given category whose embedded day strictly precedes
    /// `today`, oldest first. Today's file stays untouched: the publisher may
    /// still be appending to it.
    pub async fn list_pending(
        &self,
        category: LogCategory,
        today: NaiveDate,
    ) -> Result<Vec<(NaiveDate, PathBuf)>, StorageError> {
        let mut pending = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(pending),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(day) = parse_day(&name.to_string_lossy(), category.prefix()) {
                if day < today {
                    pending.push((day, entry.path()));
                }
            }
        }

        pending.sort_by_key(|(day, _)| *day);
        Ok(pending)
    }

    /// Attempt `publish` for every line of the file. The file is deleted only
    /// if every line succeeded; on a mixed outcome it is kept whole, and the
    /// lines that already went through will be re-sent on the next pass
    /// (duplicates are expected downstream).
    pub async fn replay<F, Fut>(
        &self,
        path: &Path,
        mut publish: F,
    ) -> Result<ReplayOutcome, StorageError>
    where
        F: FnMut(Value) -> Fut,
        Fut: Future<Output = bool>,
    {
        let content = fs::read_to_string(path).await?;
        let mut total = 0usize;
        let mut replayed = 0usize;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            total += 1;
            match serde_json::from_str::<Value>(line) {
                Ok(entry) => {
                    if publish(entry).await {
                        replayed += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        "unreadable spillover line in {}, keeping file: {}",
                        path.display(),
                        err
                    );
                }
            }
        }

        let deleted = replayed == total;
        if deleted {
            fs::remove_file(path).await?;
        }
        Ok(ReplayOutcome {
            total,
            replayed,
            deleted,
        })
    }

    /// Age-based retention: remove files of the category older than
    /// `retention_days` before `today`. Returns how many were removed.
    pub async fn purge_older_than(
        &self,
        category: LogCategory,
        today: NaiveDate,
        retention_days: u32,
    ) -> Result<usize, StorageError> {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);
        let mut removed = 0usize;
        for (day, path) in self.list_pending(category, today).await? {
            if day < cutoff {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_day(name: &str, prefix: &str) -> Option<NaiveDate> {
    let day = name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".log")?;
    NaiveDate::parse_from_str(day, DAY_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(year: i32, month: u32, dom: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, dom).unwrap()
    }

    #[tokio::test]
    async fn append_writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path().join("logs"));
        let today = day(2024, 5, 6);

        store
            .append(LogCategory::Accesses, today, &json!({"profile": "voluntario"}))
            .await
            .unwrap();
        store
            .append(LogCategory::Accesses, today, &json!({"profile": "usuario"}))
            .await
            .unwrap();

        let path = store.file_path(LogCategory::Accesses, today);
        assert!(path.ends_with("accesses_06-05-24.log"));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"profile":"voluntario"}"#);
        assert_eq!(lines[1], r#"{"profile":"usuario"}"#);
    }

    #[tokio::test]
    async fn list_pending_skips_today_and_other_categories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path());
        let today = day(2024, 5, 6);

        store
            .append(LogCategory::Accesses, day(2024, 5, 4), &json!({"n": 1}))
            .await
            .unwrap();
        store
            .append(LogCategory::Accesses, day(2024, 5, 5), &json!({"n": 2}))
            .await
            .unwrap();
        store
            .append(LogCategory::Accesses, today, &json!({"n": 3}))
            .await
            .unwrap();
        store
            .append(LogCategory::AccessErrors, day(2024, 5, 4), &json!({"n": 4}))
            .await
            .unwrap();

        let pending = store
            .list_pending(LogCategory::Accesses, today)
            .await
            .unwrap();
        let days: Vec<NaiveDate> = pending.iter().map(|(day, _)| *day).collect();
        assert_eq!(days, vec![day(2024, 5, 4), day(2024, 5, 5)]);
    }

    #[tokio::test]
    async fn list_pending_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path().join("never-created"));
        let pending = store
            .list_pending(LogCategory::Accesses, day(2024, 5, 6))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn replay_deletes_the_file_only_on_full_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path());
        let yesterday = day(2024, 5, 5);
        for n in 0..5 {
            store
                .append(LogCategory::Accesses, yesterday, &json!({"n": n}))
                .await
                .unwrap();
        }
        let path = store.file_path(LogCategory::Accesses, yesterday);

        // 3 of 5 lines succeed: the file must survive, whole
        let outcome = store
            .replay(&path, |entry| {
                let ok = entry["n"].as_i64().unwrap() < 3;
                async move { ok }
            })
            .await
            .unwrap();
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.replayed, 3);
        assert!(!outcome.deleted);
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 5);

        // All lines succeed: the file is removed
        let outcome = store.replay(&path, |_| async { true }).await.unwrap();
        assert_eq!(outcome.replayed, 5);
        assert!(outcome.deleted);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn replay_keeps_a_file_with_unreadable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path());
        let yesterday = day(2024, 5, 5);
        store
            .append(LogCategory::Accesses, yesterday, &json!({"n": 1}))
            .await
            .unwrap();
        let path = store.file_path(LogCategory::Accesses, yesterday);
        std::fs::write(&path, "{\"n\":1}\nnot json\n").unwrap();

        let outcome = store.replay(&path, |_| async { true }).await.unwrap();
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.replayed, 1);
        assert!(!outcome.deleted);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::new(dir.path());
        let today = day(2024, 5, 6);
        let expired = day(2024, 3, 1);
        let recent = day(2024, 5, 1);

        store
            .append(LogCategory::AccessErrors, expired, &json!({"n": 1}))
            .await
            .unwrap();
        store
            .append(LogCategory::AccessErrors, recent, &json!({"n": 2}))
            .await
            .unwrap();

        let removed = store
            .purge_older_than(LogCategory::AccessErrors, today, 30)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!store.file_path(LogCategory::AccessErrors, expired).exists());
        assert!(store.file_path(LogCategory::AccessErrors, recent).exists());
    }
}
