//! Authentication lifecycle integration tests: lockout, temporary
//! credentials, password change, and idle expiry across the identity stack.

use std::sync::Arc;
use tempfile::tempdir;

use docket::error::AppError;
use docket::identity::{
    AccountRecord, AccountStore, AuthManager, JsonAccountStore, LoginRequest, NewAccount, Role,
    SessionManager,
};
use docket::security::AuthPolicy;

// Argon2 for generating PHC hashes in tests
use argon2::{Argon2, PasswordHasher};
use password_hash::SaltString;

fn phc_for(password: &str) -> String {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).expect("salt");
    let salt = SaltString::encode_b64(&salt_bytes).expect("salt b64");
    let argon2 = Argon2::default();
    argon2.hash_password(password.as_bytes(), &salt).unwrap().to_string()
}

fn record(handle: &str, password: &str) -> AccountRecord {
    AccountRecord {
        id: format!("id-{}", handle),
        display_name: handle.to_uppercase(),
        handle: handle.into(),
        password_hash: phc_for(password),
        temp_password_hash: None,
        temp_expires_at: None,
        role: None,
        legacy_role: Some("staff".into()),
        active: true,
        failed_attempts: 0,
        locked_at: None,
        last_login_at: None,
        password_change_required: false,
        org_id: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn manager(dir: &std::path::Path) -> (Arc<JsonAccountStore>, AuthManager) {
    let store = Arc::new(JsonAccountStore::open(dir.join("accounts.json")).unwrap());
    let sessions = SessionManager::new(AuthPolicy::default().idle_timeout_ms(), None);
    let mgr = AuthManager::new(store.clone(), sessions, AuthPolicy::default());
    (store, mgr)
}

fn login(mgr: &AuthManager, handle: &str, password: &str) -> Result<docket::identity::LoginResponse, AppError> {
    mgr.login_at(&LoginRequest { handle: handle.into(), password: password.into(), ip: None }, 1_000_000)
}

#[test]
fn wrong_password_counts_down_then_locks() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    store.insert(record("kim", "correct-horse")).unwrap();

    for expected_remaining in [4u32, 3, 2, 1] {
        let err = login(&mgr, "kim", "wrong").unwrap_err();
        assert_eq!(err, AppError::InvalidCredentials { attempts_remaining: Some(expected_remaining) });
    }
    // fifth failure trips the lockout
    let err = login(&mgr, "kim", "wrong").unwrap_err();
    assert_eq!(err, AppError::AccountLocked);

    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert!(!rec.active);
    assert_eq!(rec.failed_attempts, 5);
    assert!(rec.locked_at.is_some());

    // even the correct password is refused now, and does not count
    let err = login(&mgr, "kim", "correct-horse").unwrap_err();
    assert_eq!(err, AppError::AccountInactive);
    assert_eq!(store.find_by_handle("kim").unwrap().unwrap().failed_attempts, 5);
}

#[test]
fn lockout_scenario_from_counter_four() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "pw");
    rec.failed_attempts = 4;
    store.insert(rec).unwrap();

    let err = login(&mgr, "kim", "definitely-wrong").unwrap_err();
    assert_eq!(err, AppError::AccountLocked);
    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 5);
    assert!(!rec.active);
}

#[test]
fn successful_login_resets_counter_and_stamps_last_login() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "pw-ok");
    rec.failed_attempts = 3;
    store.insert(rec).unwrap();

    let resp = login(&mgr, "kim", "pw-ok").unwrap();
    assert_eq!(resp.session.principal.handle, "kim");
    assert_eq!(resp.session.principal.role, Role::User); // legacy "staff" resolves
    assert!(!resp.session.password_change_required);

    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 0);
    assert_eq!(rec.last_login_at, Some(1_000_000));
}

#[test]
fn unknown_handle_is_generic_invalid_credentials() {
    let dir = tempdir().unwrap();
    let (_store, mgr) = manager(dir.path());
    let err = login(&mgr, "nobody", "anything").unwrap_err();
    assert_eq!(err, AppError::InvalidCredentials { attempts_remaining: None });
}

#[test]
fn empty_fields_fail_validation_before_the_store() {
    let dir = tempdir().unwrap();
    let (_store, mgr) = manager(dir.path());
    assert!(matches!(login(&mgr, "", "pw"), Err(AppError::Validation { .. })));
    assert!(matches!(login(&mgr, "kim", ""), Err(AppError::Validation { .. })));
}

#[test]
fn valid_temp_credential_logs_in_and_forces_change() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "old-pw");
    rec.failed_attempts = 2;
    rec.temp_password_hash = Some(phc_for("abc123"));
    rec.temp_expires_at = Some(2_000_000); // after the test's now of 1_000_000
    store.insert(rec).unwrap();

    let resp = login(&mgr, "kim", "abc123").unwrap();
    assert!(resp.session.password_change_required);
    // explicit reset on temp success
    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 0);
    assert!(rec.password_change_required);
}

#[test]
fn expired_temp_credential_falls_through_to_password() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "real-pw");
    rec.temp_password_hash = Some(phc_for("abc123"));
    rec.temp_expires_at = Some(999_999); // strictly before the test's now
    store.insert(rec).unwrap();

    // the exact temp value no longer authenticates, and counts as a failure
    let err = login(&mgr, "kim", "abc123").unwrap_err();
    assert_eq!(err, AppError::InvalidCredentials { attempts_remaining: Some(4) });

    // the regular password still works
    let resp = login(&mgr, "kim", "real-pw").unwrap();
    assert!(!resp.session.password_change_required);
}

#[test]
fn expiry_boundary_is_strict() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "real-pw");
    rec.temp_password_hash = Some(phc_for("abc123"));
    rec.temp_expires_at = Some(1_000_000); // exactly now: not strictly before
    store.insert(rec).unwrap();

    let err = login(&mgr, "kim", "abc123").unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials { .. }));
}

#[test]
fn update_password_round_trip_clears_temp_fields() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    let mut rec = record("kim", "old-pw");
    rec.temp_password_hash = Some(phc_for("abc123"));
    rec.temp_expires_at = Some(2_000_000);
    store.insert(rec).unwrap();

    let resp = login(&mgr, "kim", "abc123").unwrap();
    assert!(resp.session.password_change_required);

    mgr.update_password_at("id-kim", "brand-new-pw", 1_100_000).unwrap();

    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert_eq!(rec.temp_password_hash, None);
    assert_eq!(rec.temp_expires_at, None);
    assert!(!rec.password_change_required);
    assert_eq!(rec.failed_attempts, 0);

    // old and temp credentials are dead, the new one works
    assert!(login(&mgr, "kim", "abc123").is_err());
    assert!(login(&mgr, "kim", "old-pw").is_err());
    let resp = login(&mgr, "kim", "brand-new-pw").unwrap();
    assert!(!resp.session.password_change_required);
}

#[test]
fn short_password_rejected_on_change() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    store.insert(record("kim", "old-pw")).unwrap();
    assert!(matches!(
        mgr.update_password_at("id-kim", "short", 1_000),
        Err(AppError::Validation { .. })
    ));
}

#[test]
fn unlock_restores_a_locked_account() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    store.insert(record("kim", "pw")).unwrap();
    for _ in 0..5 {
        let _ = login(&mgr, "kim", "wrong");
    }
    assert_eq!(login(&mgr, "kim", "pw").unwrap_err(), AppError::AccountInactive);

    mgr.unlock_account("id-kim").unwrap();
    let rec = store.find_by_handle("kim").unwrap().unwrap();
    assert!(rec.active);
    assert_eq!(rec.failed_attempts, 0);
    assert_eq!(rec.locked_at, None);

    assert!(login(&mgr, "kim", "pw").is_ok());
}

#[test]
fn issued_temp_credential_authenticates_until_replaced() {
    let dir = tempdir().unwrap();
    let (_store, mgr) = manager(dir.path());
    let (rec, first_temp) = mgr
        .create_account(NewAccount {
            display_name: "Org One".into(),
            handle: "org1".into(),
            role: Role::Organization,
            org_id: Some("org-1".into()),
        })
        .unwrap();

    let resp = mgr.login(&LoginRequest { handle: "org1".into(), password: first_temp.clone(), ip: None }).unwrap();
    assert!(resp.session.password_change_required);
    assert_eq!(resp.session.principal.role, Role::Organization);
    assert_eq!(resp.session.principal.attrs.org_id.as_deref(), Some("org-1"));

    // issuing a new temp credential invalidates the first
    let second_temp = mgr.issue_temp_credential(&rec.id).unwrap();
    assert_ne!(first_temp, second_temp);
    assert!(mgr.login(&LoginRequest { handle: "org1".into(), password: first_temp, ip: None }).is_err());
    assert!(mgr.login(&LoginRequest { handle: "org1".into(), password: second_temp, ip: None }).is_ok());
}

#[test]
fn deactivate_revokes_live_sessions() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    store.insert(record("kim", "pw")).unwrap();
    let resp = login(&mgr, "kim", "pw").unwrap();
    assert!(mgr.sessions.validate(&resp.session.token, 1_000_100).is_some());

    mgr.deactivate("id-kim").unwrap();
    assert!(mgr.sessions.validate(&resp.session.token, 1_000_200).is_none());
    assert_eq!(login(&mgr, "kim", "pw").unwrap_err(), AppError::AccountInactive);
}

#[test]
fn idle_window_expires_sessions_exactly_once() {
    let dir = tempdir().unwrap();
    let store = Arc::new(JsonAccountStore::open(dir.path().join("accounts.json")).unwrap());
    let sessions = SessionManager::new(1_000, None); // one second window
    let mgr = AuthManager::new(store.clone(), sessions, AuthPolicy::default());
    store.insert(record("kim", "pw")).unwrap();

    let resp = login(&mgr, "kim", "pw").unwrap();
    let token = resp.session.token;

    // activity inside the window keeps it alive
    assert!(mgr.sessions.validate(&token, 1_000_900).is_some());
    // silence past the window clears it; the sweep finds nothing left
    assert!(mgr.sessions.validate(&token, 1_002_000).is_none());
    assert_eq!(mgr.sessions.sweep(1_002_000), 0);
    assert_eq!(mgr.sessions.active_count(), 0);
}

#[test]
fn default_admin_is_seeded_once() {
    let dir = tempdir().unwrap();
    let (store, mgr) = manager(dir.path());
    mgr.ensure_default_admin().unwrap();
    mgr.ensure_default_admin().unwrap();
    let admins: Vec<AccountRecord> = store
        .list()
        .unwrap()
        .into_iter()
        .filter(|a| a.canonical_role() == Role::Administrator)
        .collect();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].handle, "admin");
}
