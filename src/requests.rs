//! Document requests: the records organizations submit and staff work.
//!
//! Visibility is role-scoped at the query level: organization accounts only
//! ever list their own organization's requests, staff and administrators see
//! everything. Status moves forward only.

use std::path::{Path, PathBuf};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Submitted,
    InReview,
    Responded,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRequest {
    pub id: String,
    pub org_id: String,
    /// Account id of the submitting organization user.
    pub submitted_by: String,
    pub title: String,
    pub detail: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub responded_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct RequestStore {
    path: PathBuf,
    rows: Mutex<Vec<DocumentRequest>>,
}

impl RequestStore {
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

    fn flush(&self, rows: &[DocumentRequest]) -> AppResult<()> {
        if let Some(dir) = self.path.parent() { std::fs::create_dir_all(dir).ok(); }
        let raw = serde_json::to_string_pretty(rows).map_err(|e| AppError::internal(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| {
            tracing::warn!("request store write failed: {}", e);
            AppError::transient("request store unavailable")
        })
    }

    pub fn submit(&self, org_id: &str, submitted_by: &str, title: &str, detail: &str) -> AppResult<DocumentRequest> {
        if title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        let now = Utc::now().timestamp_millis();
        let req = DocumentRequest {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            submitted_by: submitted_by.to_string(),
            title: title.trim().to_string(),
            detail: detail.to_string(),
            status: RequestStatus::Submitted,
            response: None,
            responded_by: None,
            created_at: now,
            updated_at: now,
        };
        let mut rows = self.rows.lock();
        rows.push(req.clone());
        self.flush(&rows)?;
        Ok(req)
    }

    pub fn get(&self, id: &str) -> AppResult<DocumentRequest> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("request {}", id)))
    }

    /// Staff view: everything, newest first.
    pub fn list_all(&self) -> Vec<DocumentRequest> {
        let mut out = self.rows.lock().clone();
        out.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        out
    }

    /// Organization view: only their own requests.
    pub fn list_for_org(&self, org_id: &str) -> Vec<DocumentRequest> {
        let mut out: Vec<DocumentRequest> =
            self.rows.lock().iter().filter(|r| r.org_id == org_id).cloned().collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        out
    }

    pub fn begin_review(&self, id: &str) -> AppResult<DocumentRequest> {
        self.transition(id, |r| match r.status {
            RequestStatus::Submitted => {
                r.status = RequestStatus::InReview;
                Ok(())
            }
            other => Err(AppError::conflict(format!("cannot review a {:?} request", other))),
        })
    }

    pub fn respond(&self, id: &str, responder: &str, response: &str) -> AppResult<DocumentRequest> {
        if response.trim().is_empty() {
            return Err(AppError::validation("response text is required"));
        }
        self.transition(id, |r| match r.status {
            RequestStatus::Submitted | RequestStatus::InReview => {
                r.status = RequestStatus::Responded;
                r.response = Some(response.trim().to_string());
                r.responded_by = Some(responder.to_string());
                Ok(())
            }
            other => Err(AppError::conflict(format!("cannot respond to a {:?} request", other))),
        })
    }

    pub fn close(&self, id: &str) -> AppResult<DocumentRequest> {
        self.transition(id, |r| match r.status {
            RequestStatus::Closed => Err(AppError::conflict("request already closed".to_string())),
            _ => {
                r.status = RequestStatus::Closed;
                Ok(())
            }
        })
    }

    fn transition(
        &self,
        id: &str,
        f: impl FnOnce(&mut DocumentRequest) -> AppResult<()>,
    ) -> AppResult<DocumentRequest> {
        let mut rows = self.rows.lock();
        let Some(rec) = rows.iter_mut().find(|r| r.id == id) else {
            return Err(AppError::not_found(format!("request {}", id)));
        };
        f(rec)?;
        rec.updated_at = Utc::now().timestamp_millis();
        let out = rec.clone();
        self.flush(&rows)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, RequestStore) {
        let dir = tempdir().unwrap();
        let s = RequestStore::open(dir.path().join("requests.json")).unwrap();
        (dir, s)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let (_d, s) = store();
        let r = s.submit("org-1", "acct-1", "Tax certificate", "FY2025").unwrap();
        assert_eq!(r.status, RequestStatus::Submitted);

        let r = s.begin_review(&r.id).unwrap();
        assert_eq!(r.status, RequestStatus::InReview);
        // reviewing twice conflicts
        assert!(matches!(s.begin_review(&r.id), Err(AppError::Conflict { .. })));

        let r = s.respond(&r.id, "staff-1", "Attached.").unwrap();
        assert_eq!(r.status, RequestStatus::Responded);
        assert_eq!(r.responded_by.as_deref(), Some("staff-1"));

        let r = s.close(&r.id).unwrap();
        assert_eq!(r.status, RequestStatus::Closed);
        assert!(matches!(s.respond(&r.id, "staff-1", "x"), Err(AppError::Conflict { .. })));
        assert!(matches!(s.close(&r.id), Err(AppError::Conflict { .. })));
    }

    #[test]
    fn respond_straight_from_submitted_is_allowed() {
        let (_d, s) = store();
        let r = s.submit("org-1", "acct-1", "Registry extract", "").unwrap();
        let r = s.respond(&r.id, "staff-2", "Done").unwrap();
        assert_eq!(r.status, RequestStatus::Responded);
    }

    #[test]
    fn org_listing_is_scoped() {
        let (_d, s) = store();
        s.submit("org-1", "a", "one", "").unwrap();
        s.submit("org-2", "b", "two", "").unwrap();
        s.submit("org-1", "a", "three", "").unwrap();
        assert_eq!(s.list_all().len(), 3);
        let mine = s.list_for_org("org-1");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.org_id == "org-1"));
        assert!(s.list_for_org("org-9").is_empty());
    }

    #[test]
    fn empty_title_rejected() {
        let (_d, s) = store();
        assert!(matches!(
            s.submit("org-1", "a", "  ", "detail"),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requests.json");
        let id = {
            let s = RequestStore::open(&path).unwrap();
            s.submit("org-1", "a", "persisted", "").unwrap().id
        };
        let s = RequestStore::open(&path).unwrap();
        assert_eq!(s.get(&id).unwrap().title, "persisted");
    }
}
