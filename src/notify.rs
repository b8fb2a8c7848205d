//! Notification fan-out and read-state reconciliation.
//!
//! A request event produces one notification per recipient account. Unread
//! counts are always derived from the rows, never cached, so they cannot go
//! stale; mark-read is idempotent so replays from a flaky client do not
//! distort anything.

use std::path::{Path, PathBuf};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub account_id: String,
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub read: bool,
}

pub struct NotificationStore {
    path: PathBuf,
    rows: Mutex<Vec<Notification>>,
}

impl NotificationStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() { Vec::new() } else { serde_json::from_str(&raw)? }
        } else {
            Vec::new()
        };
        Ok(Self { path, rows: Mutex::new(rows) })
    }

    fn flush(&self, rows: &[Notification]) -> AppResult<()> {
        if let Some(dir) = self.path.parent() { std::fs::create_dir_all(dir).ok(); }
        let raw = serde_json::to_string(rows).map_err(|e| AppError::internal(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| {
            tracing::warn!("notification store write failed: {}", e);
            AppError::transient("notification store unavailable")
        })
    }

    /// One notification per recipient; returns how many were created.
    pub fn fan_out(&self, recipients: &[String], message: &str, request_id: Option<&str>) -> AppResult<usize> {
        if recipients.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp_millis();
        let mut rows = self.rows.lock();
        for account_id in recipients {
            rows.push(Notification {
                id: Uuid::new_v4().to_string(),
                account_id: account_id.clone(),
                message: message.to_string(),
                request_id: request_id.map(|s| s.to_string()),
                created_at: now,
                read: false,
            });
        }
        self.flush(&rows)?;
        Ok(recipients.len())
    }

    pub fn list_for(&self, account_id: &str) -> Vec<Notification> {
        let mut out: Vec<Notification> =
            self.rows.lock().iter().filter(|n| n.account_id == account_id).cloned().collect();
        out.sort_by_key(|n| std::cmp::Reverse(n.created_at));
        out
    }

    pub fn unread_count(&self, account_id: &str) -> usize {
        self.rows.lock().iter().filter(|n| n.account_id == account_id && !n.read).count()
    }

    /// Mark the given ids read for one account. Ids already read, unknown, or
    /// belonging to someone else are ignored; returns the number newly marked.
    pub fn mark_read(&self, account_id: &str, ids: &[String]) -> AppResult<usize> {
        let mut rows = self.rows.lock();
        let mut changed = 0usize;
        for n in rows.iter_mut() {
            if n.account_id == account_id && !n.read && ids.contains(&n.id) {
                n.read = true;
                changed += 1;
            }
        }
        if changed > 0 {
            self.flush(&rows)?;
        }
        Ok(changed)
    }
}
