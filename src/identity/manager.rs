//! The authentication lifecycle: login with lockout, temporary credentials,
//! password changes, and the administrator account operations.
//!
//! Earlier iterations of the application carried several divergent copies of
//! this flow; everything is consolidated here and the knobs live in
//! `AuthPolicy`. Login attempts are serialized per handle so two racing
//! attempts cannot both observe the same failed-attempt count.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::security::{hash_password, random_secret, verify_password, AuthPolicy};
use crate::tprintln;

use super::account::{AccountPatch, AccountRecord, AccountStore, StoreError};
use super::authorizer::Role;
use super::principal::{Attrs, Principal};
use super::session::{Session, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Administrator input for account creation. The initial credential is always
/// a temporary one generated here; there is no path that stores a
/// caller-chosen password without the owner changing it first.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub handle: String,
    pub role: Role,
    pub org_id: Option<String>,
}

pub struct AuthManager {
    store: Arc<dyn AccountStore>,
    pub sessions: SessionManager,
    pub policy: AuthPolicy,
    login_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn map_store_err(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound(id) => AppError::not_found(format!("account {}", id)),
        StoreError::DuplicateHandle(h) => AppError::conflict(format!("handle already taken: {}", h)),
        other => {
            warn!(target: "auth", "account store failure: {}", other);
            AppError::transient("account store unavailable")
        }
    }
}

impl AuthManager {
    pub fn new(store: Arc<dyn AccountStore>, sessions: SessionManager, policy: AuthPolicy) -> Self {
        Self { store, sessions, policy, login_locks: Mutex::new(HashMap::new()) }
    }

    pub fn now_ms() -> i64 { Utc::now().timestamp_millis() }

    fn account_lock(&self, handle: &str) -> Arc<Mutex<()>> {
        let mut m = self.login_locks.lock();
        m.entry(handle.to_ascii_lowercase()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        self.login_at(req, Self::now_ms())
    }

    /// The full login flow at an explicit instant (tests drive the clock).
    ///
    /// Order matters: validation before any store access, the inactive check
    /// before any counting, the temporary-credential path before the regular
    /// password, and only a definite password mismatch moves the counter.
    pub fn login_at(&self, req: &LoginRequest, now_ms: i64) -> AppResult<LoginResponse> {
        if req.handle.trim().is_empty() {
            return Err(AppError::validation("handle is required"));
        }
        if req.password.is_empty() {
            return Err(AppError::validation("password is required"));
        }

        let lock = self.account_lock(&req.handle);
        let _serialized = lock.lock();

        let Some(acct) = self.store.find_by_handle(req.handle.trim()).map_err(map_store_err)? else {
            // Unknown handle reports the same generic failure as a wrong
            // password, with no attempt count.
            return Err(AppError::invalid_credentials(None));
        };

        if !acct.active {
            return Err(AppError::AccountInactive);
        }

        // Temporary credential: only honored strictly before expiry. An
        // expired or mismatching one falls through to the regular password.
        if let (Some(temp_hash), Some(expires)) = (&acct.temp_password_hash, acct.temp_expires_at) {
            if now_ms < expires && verify_password(temp_hash, &req.password) {
                let updated = self
                    .store
                    .update_by_id(&acct.id, AccountPatch {
                        failed_attempts: Some(0),
                        last_login_at: Some(now_ms),
                        password_change_required: Some(true),
                        updated_at: Some(now_ms),
                        ..Default::default()
                    })
                    .map_err(map_store_err)?;
                info!(target: "auth", "temporary-credential login for {}", updated.handle);
                return Ok(self.open_session(&updated, req.ip.clone(), true, now_ms));
            }
        }

        if !verify_password(&acct.password_hash, &req.password) {
            let count = acct.failed_attempts + 1;
            if count >= self.policy.max_login_attempts {
                self.store
                    .update_by_id(&acct.id, AccountPatch {
                        failed_attempts: Some(count),
                        active: Some(false),
                        locked_at: Some(Some(now_ms)),
                        updated_at: Some(now_ms),
                        ..Default::default()
                    })
                    .map_err(map_store_err)?;
                warn!(target: "auth", "account {} locked after {} failed attempts", acct.handle, count);
                return Err(AppError::AccountLocked);
            }
            self.store
                .update_by_id(&acct.id, AccountPatch {
                    failed_attempts: Some(count),
                    updated_at: Some(now_ms),
                    ..Default::default()
                })
                .map_err(map_store_err)?;
            return Err(AppError::invalid_credentials(Some(self.policy.max_login_attempts - count)));
        }

        let updated = self
            .store
            .update_by_id(&acct.id, AccountPatch {
                failed_attempts: Some(0),
                last_login_at: Some(now_ms),
                updated_at: Some(now_ms),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        info!(target: "auth", "login ok for {}", updated.handle);
        let change_required = updated.password_change_required;
        Ok(self.open_session(&updated, req.ip.clone(), change_required, now_ms))
    }

    fn open_session(&self, acct: &AccountRecord, ip: Option<String>, change_required: bool, now_ms: i64) -> LoginResponse {
        let principal = Principal {
            account_id: acct.id.clone(),
            handle: acct.handle.clone(),
            display_name: acct.display_name.clone(),
            // Resolved once here and cached on the session for its lifetime.
            role: acct.canonical_role(),
            attrs: Attrs { org_id: acct.org_id.clone(), ip },
        };
        let session = self.sessions.issue(principal, change_required, now_ms);
        LoginResponse { session }
    }

    /// Current-session accessor; counts as user activity.
    pub fn current(&self, token: &str) -> Option<Session> {
        self.sessions.validate(token, Self::now_ms())
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.logout(token)
    }

    /// Change an account's password. Authorization (owner or administrator)
    /// is the caller's responsibility; this only performs the change.
    pub fn update_password(&self, account_id: &str, new_password: &str) -> AppResult<()> {
        self.update_password_at(account_id, new_password, Self::now_ms())
    }

    pub fn update_password_at(&self, account_id: &str, new_password: &str, now_ms: i64) -> AppResult<()> {
        if new_password.len() < 8 {
            return Err(AppError::validation("password must be at least 8 characters"));
        }
        let hash = hash_password(new_password).map_err(|e| {
            warn!(target: "auth", "password hash failure: {}", e);
            AppError::internal("hashing failed")
        })?;
        self.store
            .update_by_id(account_id, AccountPatch {
                password_hash: Some(hash),
                temp_password_hash: Some(None),
                temp_expires_at: Some(None),
                password_change_required: Some(false),
                failed_attempts: Some(0),
                updated_at: Some(now_ms),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        Ok(())
    }

    /// Reactivate a locked account: usable again, counter zeroed, lock stamp
    /// cleared. Administrator-only at the HTTP layer.
    pub fn unlock_account(&self, account_id: &str) -> AppResult<AccountRecord> {
        let rec = self
            .store
            .update_by_id(account_id, AccountPatch {
                active: Some(true),
                failed_attempts: Some(0),
                locked_at: Some(None),
                updated_at: Some(Self::now_ms()),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        info!(target: "auth", "account {} unlocked", rec.handle);
        Ok(rec)
    }

    /// Issue a temporary credential, returning the plaintext exactly once.
    pub fn issue_temp_credential(&self, account_id: &str) -> AppResult<String> {
        self.issue_temp_credential_at(account_id, Self::now_ms())
    }

    pub fn issue_temp_credential_at(&self, account_id: &str, now_ms: i64) -> AppResult<String> {
        let temp = random_secret();
        let hash = hash_password(&temp).map_err(|e| {
            warn!(target: "auth", "temp credential hash failure: {}", e);
            AppError::internal("hashing failed")
        })?;
        let rec = self
            .store
            .update_by_id(account_id, AccountPatch {
                temp_password_hash: Some(Some(hash)),
                temp_expires_at: Some(Some(now_ms + self.policy.temp_credential_ttl_ms())),
                updated_at: Some(now_ms),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        info!(target: "auth", "temporary credential issued for {}", rec.handle);
        Ok(temp)
    }

    /// Create an account with a generated temporary credential. The stored
    /// regular password is random and never revealed, so the first login has
    /// to go through the temporary-credential path and a password change.
    pub fn create_account(&self, new: NewAccount) -> AppResult<(AccountRecord, String)> {
        if new.handle.trim().is_empty() || new.display_name.trim().is_empty() {
            return Err(AppError::validation("handle and display name are required"));
        }
        let now_ms = Self::now_ms();
        let temp = random_secret();
        let unusable = hash_password(&random_secret()).map_err(|_| AppError::internal("hashing failed"))?;
        let temp_hash = hash_password(&temp).map_err(|_| AppError::internal("hashing failed"))?;
        let rec = AccountRecord {
            id: Uuid::new_v4().to_string(),
            display_name: new.display_name.trim().to_string(),
            handle: new.handle.trim().to_string(),
            password_hash: unusable,
            temp_password_hash: Some(temp_hash),
            temp_expires_at: Some(now_ms + self.policy.temp_credential_ttl_ms()),
            role: Some(new.role),
            legacy_role: None,
            active: true,
            failed_attempts: 0,
            locked_at: None,
            last_login_at: None,
            password_change_required: false,
            org_id: new.org_id,
            created_at: now_ms,
            updated_at: now_ms,
        };
        self.store.insert(rec.clone()).map_err(map_store_err)?;
        info!(target: "auth", "account created: {} ({})", rec.handle, rec.canonical_role());
        Ok((rec, temp))
    }

    pub fn set_role(&self, account_id: &str, role: Role) -> AppResult<AccountRecord> {
        let rec = self
            .store
            .update_by_id(account_id, AccountPatch {
                role: Some(role),
                updated_at: Some(Self::now_ms()),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        // A changed role must not live on in cached session records
        self.sessions.revoke_account(account_id);
        Ok(rec)
    }

    pub fn deactivate(&self, account_id: &str) -> AppResult<AccountRecord> {
        let rec = self
            .store
            .update_by_id(account_id, AccountPatch {
                active: Some(false),
                updated_at: Some(Self::now_ms()),
                ..Default::default()
            })
            .map_err(map_store_err)?;
        let dropped = self.sessions.revoke_account(account_id);
        tprintln!("deactivate {} dropped {} sessions", account_id, dropped);
        Ok(rec)
    }

    pub fn list_accounts(&self) -> AppResult<Vec<AccountRecord>> {
        self.store.list().map_err(map_store_err)
    }

    pub fn find_account(&self, account_id: &str) -> AppResult<Option<AccountRecord>> {
        self.store.find_by_id(account_id).map_err(map_store_err)
    }

    /// First-run bootstrap: seed a default administrator when the store has
    /// no administrator at all.
    pub fn ensure_default_admin(&self) -> AppResult<()> {
        let accounts = self.list_accounts()?;
        if accounts.iter().any(|a| a.canonical_role() == Role::Administrator && a.active) {
            return Ok(());
        }
        let now_ms = Self::now_ms();
        let hash = hash_password("docket").map_err(|_| AppError::internal("hashing failed"))?;
        let rec = AccountRecord {
            id: Uuid::new_v4().to_string(),
            display_name: "Administrator".into(),
            handle: "admin".into(),
            password_hash: hash,
            temp_password_hash: None,
            temp_expires_at: None,
            role: Some(Role::Administrator),
            legacy_role: None,
            active: true,
            failed_attempts: 0,
            locked_at: None,
            last_login_at: None,
            password_change_required: true,
            org_id: None,
            created_at: now_ms,
            updated_at: now_ms,
        };
        self.store.insert(rec).map_err(map_store_err)?;
        warn!(target: "auth", "seeded default administrator 'admin' (password change required on first login)");
        Ok(())
    }
}
