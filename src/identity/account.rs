//! Account records and the account store.
//!
//! The store contract mirrors what the login flow needs: lookup by handle
//! and atomic partial updates (counter bumps, flag flips). The shipped
//! implementation keeps the whole table in memory behind a mutex and writes
//! it back to a JSON file on every mutation, which is plenty for the account
//! volumes this service sees.

use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::authorizer::{resolve_role, Role};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("handle already taken: {0}")]
    DuplicateHandle(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub id: String,
    pub display_name: String,
    pub handle: String,
    /// Argon2 PHC string; the plaintext never touches the store.
    pub password_hash: String,
    /// Administrator-issued temporary credential, hashed, with absolute
    /// expiry in ms since epoch. Honored only strictly before expiry.
    #[serde(default)]
    pub temp_password_hash: Option<String>,
    #[serde(default)]
    pub temp_expires_at: Option<i64>,
    /// Modern canonical role. Older rows carry only `legacy_role`.
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub legacy_role: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default)]
    pub locked_at: Option<i64>,
    #[serde(default)]
    pub last_login_at: Option<i64>,
    #[serde(default)]
    pub password_change_required: bool,
    #[serde(default)]
    pub org_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AccountRecord {
    /// Canonical role, derived; never trusts the legacy text verbatim.
    pub fn canonical_role(&self) -> Role {
        resolve_role(self.role, self.legacy_role.as_deref())
    }
}

/// Partial update applied atomically by the store. `None` leaves a field
/// untouched; the double-`Option` fields use `Some(None)` to clear.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub temp_password_hash: Option<Option<String>>,
    pub temp_expires_at: Option<Option<i64>>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub failed_attempts: Option<u32>,
    pub locked_at: Option<Option<i64>>,
    pub last_login_at: Option<i64>,
    pub password_change_required: Option<bool>,
    pub updated_at: Option<i64>,
}

impl AccountPatch {
    fn apply(self, rec: &mut AccountRecord) {
        if let Some(v) = self.display_name { rec.display_name = v; }
        if let Some(v) = self.password_hash { rec.password_hash = v; }
        if let Some(v) = self.temp_password_hash { rec.temp_password_hash = v; }
        if let Some(v) = self.temp_expires_at { rec.temp_expires_at = v; }
        if let Some(v) = self.role { rec.role = Some(v); }
        if let Some(v) = self.active { rec.active = v; }
        if let Some(v) = self.failed_attempts { rec.failed_attempts = v; }
        if let Some(v) = self.locked_at { rec.locked_at = v; }
        if let Some(v) = self.last_login_at { rec.last_login_at = Some(v); }
        if let Some(v) = self.password_change_required { rec.password_change_required = v; }
        if let Some(v) = self.updated_at { rec.updated_at = v; }
    }
}

pub trait AccountStore: Send + Sync {
    fn find_by_handle(&self, handle: &str) -> Result<Option<AccountRecord>, StoreError>;
    fn find_by_id(&self, id: &str) -> Result<Option<AccountRecord>, StoreError>;
    fn insert(&self, rec: AccountRecord) -> Result<(), StoreError>;
    /// Apply a partial update under the store lock and return the new record.
    fn update_by_id(&self, id: &str, patch: AccountPatch) -> Result<AccountRecord, StoreError>;
    fn list(&self) -> Result<Vec<AccountRecord>, StoreError>;
}

pub struct JsonAccountStore {
    path: PathBuf,
    rows: Mutex<Vec<AccountRecord>>,
}

impl JsonAccountStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() { Vec::new() } else { serde_json::from_str(&raw)? }
        } else {
            Vec::new()
        };
        Ok(Self { path, rows: Mutex::new(rows) })
    }

    fn flush(&self, rows: &[AccountRecord]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() { std::fs::create_dir_all(dir).ok(); }
        let raw = serde_json::to_string_pretty(rows)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl AccountStore for JsonAccountStore {
    fn find_by_handle(&self, handle: &str) -> Result<Option<AccountRecord>, StoreError> {
        let rows = self.rows.lock();
        Ok(rows.iter().find(|r| r.handle.eq_ignore_ascii_case(handle)).cloned())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<AccountRecord>, StoreError> {
        let rows = self.rows.lock();
        Ok(rows.iter().find(|r| r.id == id).cloned())
    }

    fn insert(&self, rec: AccountRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        if rows.iter().any(|r| r.handle.eq_ignore_ascii_case(&rec.handle)) {
            return Err(StoreError::DuplicateHandle(rec.handle));
        }
        rows.push(rec);
        self.flush(&rows)
    }

    fn update_by_id(&self, id: &str, patch: AccountPatch) -> Result<AccountRecord, StoreError> {
        let mut rows = self.rows.lock();
        let Some(rec) = rows.iter_mut().find(|r| r.id == id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        patch.apply(rec);
        let out = rec.clone();
        self.flush(&rows)?;
        Ok(out)
    }

    fn list(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Ok(self.rows.lock().clone())
    }
}
