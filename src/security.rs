use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{SaltString, PasswordHash};

/// Tunables for the authentication lifecycle. Loaded once at startup from the
/// environment; every limit has a default matching the observed behavior of
/// the deployed application (5 attempts, 5 minute idle window).
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// Consecutive failed password attempts before the account deactivates.
    pub max_login_attempts: u32,
    /// Idle window after which an authenticated session is cleared.
    pub idle_timeout_secs: u64,
    /// Lifetime of an administrator-issued temporary credential.
    pub temp_credential_ttl_secs: u64,
    /// Interval of the background sweep that evicts idle sessions.
    pub session_sweep_secs: u64,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_login_attempts: 5,
            idle_timeout_secs: 300,
            temp_credential_ttl_secs: 24 * 3600,
            session_sweep_secs: 30,
        }
    }
}

impl AuthPolicy {
    /// Read overrides from DOCKET_* env vars; unparsable values keep defaults.
    pub fn from_env() -> Self {
        fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            max_login_attempts: env_num("DOCKET_MAX_LOGIN_ATTEMPTS", d.max_login_attempts),
            idle_timeout_secs: env_num("DOCKET_IDLE_TIMEOUT_SECS", d.idle_timeout_secs),
            temp_credential_ttl_secs: env_num("DOCKET_TEMP_CREDENTIAL_TTL_SECS", d.temp_credential_ttl_secs),
            session_sweep_secs: env_num("DOCKET_SESSION_SWEEP_SECS", d.session_sweep_secs),
        }
    }

    pub fn idle_timeout_ms(&self) -> i64 { self.idle_timeout_secs as i64 * 1000 }
    pub fn temp_credential_ttl_ms(&self) -> i64 { self.temp_credential_ttl_secs as i64 * 1000 }
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Random secret for temporary credentials and session tokens:
/// base64url without padding over 128 random bits.
pub fn random_secret() -> String {
    use base64::Engine;
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}
