use std::collections::HashMap;
use std::path::PathBuf;
use parking_lot::RwLock;
use base64::Engine;
use serde::{Deserialize, Serialize};
use crate::tprintln;

use super::principal::Principal;

pub type SessionToken = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: SessionToken,
    /// Per-session CSRF secret, checked on mutating requests.
    pub csrf: String,
    pub principal: Principal,
    /// Set while a temporary-credential login has not been followed by a
    /// password change; gates everything except the change itself.
    #[serde(default)]
    pub password_change_required: bool,
    pub issued_at: i64,
    pub last_activity_at: i64,
}

fn gen_id() -> String {
    // 128-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Owns every live session. One instance lives on the server state and is
/// handed to whoever needs it; there is no process-global registry.
///
/// Idle expiry is deadline-based: `validate` refuses and removes a session
/// whose window has lapsed, and a background sweep evicts the rest. Between
/// the two, removal happens exactly once per token because eviction is a
/// single map `remove`.
pub struct SessionManager {
    pub idle_timeout_ms: i64,
    persist_path: Option<PathBuf>,
    inner: RwLock<HashMap<SessionToken, Session>>,
}

impl SessionManager {
    pub fn new(idle_timeout_ms: i64, persist_path: Option<PathBuf>) -> Self {
        let mut map = HashMap::new();
        if let Some(p) = &persist_path {
            if let Ok(raw) = std::fs::read_to_string(p) {
                if let Ok(rows) = serde_json::from_str::<Vec<Session>>(&raw) {
                    for s in rows { map.insert(s.token.clone(), s); }
                }
            }
        }
        Self { idle_timeout_ms, persist_path, inner: RwLock::new(map) }
    }

    #[cfg(test)]
    pub fn in_memory(idle_timeout_ms: i64) -> Self { Self::new(idle_timeout_ms, None) }

    fn persist(&self, map: &HashMap<SessionToken, Session>) {
        let Some(p) = &self.persist_path else { return; };
        if let Some(dir) = p.parent() { std::fs::create_dir_all(dir).ok(); }
        let rows: Vec<&Session> = map.values().collect();
        match serde_json::to_string(&rows) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(p, raw) {
                    tracing::warn!("session persist failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("session encode failed: {}", e),
        }
    }

    pub fn issue(&self, principal: Principal, password_change_required: bool, now_ms: i64) -> Session {
        let sess = Session {
            token: gen_id(),
            csrf: gen_id(),
            principal: principal.clone(),
            password_change_required,
            issued_at: now_ms,
            last_activity_at: now_ms,
        };
        let mut m = self.inner.write();
        m.insert(sess.token.clone(), sess.clone());
        self.persist(&m);
        tprintln!("session.issue user={} idle_ms={}", principal.handle, self.idle_timeout_ms);
        sess
    }

    /// Look up a session, treating the call as user activity: a live session
    /// has its idle clock reset, an expired one is evicted and None returned.
    pub fn validate(&self, token: &str, now_ms: i64) -> Option<Session> {
        let mut m = self.inner.write();
        let expired = match m.get_mut(token) {
            Some(s) if now_ms - s.last_activity_at <= self.idle_timeout_ms => {
                s.last_activity_at = now_ms;
                let out = s.clone();
                self.persist(&m);
                return Some(out);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(s) = m.remove(token) {
                self.persist(&m);
                tracing::info!(target: "auth", "session idle-expired for {}", s.principal.handle);
            }
        }
        None
    }

    /// Clear the forced-password-change flag after a successful change.
    pub fn clear_password_change(&self, token: &str) {
        let mut m = self.inner.write();
        if let Some(s) = m.get_mut(token) {
            s.password_change_required = false;
            self.persist(&m);
        }
    }

    /// Idempotent: returns true only for the call that actually removed it.
    pub fn logout(&self, token: &str) -> bool {
        let mut m = self.inner.write();
        let removed = m.remove(token).is_some();
        if removed {
            self.persist(&m);
        }
        removed
    }

    /// Drop every session belonging to an account (deactivation, role change).
    pub fn revoke_account(&self, account_id: &str) -> usize {
        let mut m = self.inner.write();
        let doomed: Vec<SessionToken> = m
            .values()
            .filter(|s| s.principal.account_id == account_id)
            .map(|s| s.token.clone())
            .collect();
        for t in &doomed { m.remove(t); }
        if !doomed.is_empty() { self.persist(&m); }
        tprintln!("session.revoke account={} count={}", account_id, doomed.len());
        doomed.len()
    }

    /// Evict every idle-expired session. Called from the background ticker.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut m = self.inner.write();
        let doomed: Vec<SessionToken> = m
            .values()
            .filter(|s| now_ms - s.last_activity_at > self.idle_timeout_ms)
            .map(|s| s.token.clone())
            .collect();
        for t in &doomed {
            if let Some(s) = m.remove(t) {
                tracing::info!(target: "auth", "session idle-expired for {}", s.principal.handle);
            }
        }
        if !doomed.is_empty() { self.persist(&m); }
        doomed.len()
    }

    pub fn active_count(&self) -> usize { self.inner.read().len() }
}
