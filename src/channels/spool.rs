//! Mail source backed by a spool directory of `.eml` files.
//!
//! The file stem is the message UID. Acknowledged messages are moved to `processed/`.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailparse::MailHeaderMap;

use super::MailSource;
use crate::error::TransportError;
use crate::models::RawMessage;

const PROCESSED_DIR: &str = "processed";
const EXTENSION: &str = "eml";

pub struct SpoolMailSource {
    dir: PathBuf,
}

impl SpoolMailSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn processed_dir(&self) -> PathBuf {
        self.dir.join(PROCESSED_DIR)
    }

    async fn scan(
        &self,
        dirs: &[PathBuf],
        sender: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let mut found = Vec::new();
        for dir in dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir != &self.dir => continue,
                Err(e) => return Err(io_error(dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let Some(uid) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                    continue;
                };
                let body = tokio::fs::read(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
                if sender_matches(&body, sender) {
                    found.push(RawMessage::new(uid, body));
                }
            }
        }

        found.sort_by(|a, b| uid_order(&a.uid, &b.uid));
        found.dedup_by(|a, b| a.uid == b.uid);
        let skip = found.len().saturating_sub(limit);
        Ok(found.split_off(skip))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> TransportError {
    let msg = format!("{}: {}", path.display(), e);
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            TransportError::Permanent(msg)
        }
        _ => TransportError::Transient(msg),
    }
}

/// Numeric UIDs sort numerically, anything else lexically after them
fn uid_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn sender_matches(raw: &[u8], sender: &str) -> bool {
    let wanted = sender.trim().to_lowercase();
    if wanted.is_empty() {
        return true;
    }
    let Ok((headers, _)) = mailparse::parse_headers(raw) else {
        return false;
    };
    headers
        .get_first_value("From")
        .map_or(false, |from| from.to_lowercase().contains(&wanted))
}

#[async_trait]
impl MailSource for SpoolMailSource {
    async fn fetch_unseen(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.scan(&[self.dir.clone()], sender, limit).await
    }

    async fn fetch_latest(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.scan(&[self.processed_dir(), self.dir.clone()], sender, limit)
            .await
    }

    async fn acknowledge(&self, uids: &[String]) -> Result<usize, TransportError> {
        let processed = self.processed_dir();
        tokio::fs::create_dir_all(&processed)
            .await
            .map_err(|e| io_error(&processed, e))?;

        let mut moved = 0;
        for uid in uids {
            let file = format!("{}.{}", uid, EXTENSION);
            let from = self.dir.join(&file);
            match tokio::fs::rename(&from, processed.join(&file)).await {
                Ok(()) => moved += 1,
                // already acknowledged, or fetched in latest mode from processed/
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&from, e)),
            }
        }
        Ok(moved)
    }
}
