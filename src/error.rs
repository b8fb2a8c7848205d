//! Unified application error model and mapping helpers.
//! This module provides a common error enum used across the HTTP surface and
//! the identity/request modules, along with the HTTP status mapping.
//!
//! The credential-failure variants are deliberately coarse: an unknown handle
//! and a wrong password both surface as `InvalidCredentials`, so callers
//! cannot probe which handles exist. Raw backend errors are logged at the
//! boundary and reduced to `Transient` here.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Missing or malformed input, rejected before any store access.
    Validation { message: String },
    /// Unknown handle or wrong password. Carries the remaining attempt count
    /// when a wrong password was definitely observed.
    InvalidCredentials { attempts_remaining: Option<u32> },
    /// The account exists but is deactivated (locked out or administratively
    /// disabled). A login attempt against it does not count as a failure.
    AccountInactive,
    /// Returned at the moment lockout triggers: this attempt exhausted the
    /// allowance and deactivated the account.
    AccountLocked,
    /// No valid session on an authenticated route.
    Unauthorized,
    /// Session is valid but the role does not grant the route, or the CSRF
    /// check failed.
    Forbidden { message: String },
    NotFound { message: String },
    Conflict { message: String },
    /// Store/IO failure. Retryable by the caller; never mutates auth state.
    Transient { message: String },
    Internal { message: String },
}

impl AppError {
    pub fn validation<S: Into<String>>(msg: S) -> Self { AppError::Validation { message: msg.into() } }
    pub fn invalid_credentials(attempts_remaining: Option<u32>) -> Self { AppError::InvalidCredentials { attempts_remaining } }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AppError::Forbidden { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }
    pub fn conflict<S: Into<String>>(msg: S) -> Self { AppError::Conflict { message: msg.into() } }
    pub fn transient<S: Into<String>>(msg: S) -> Self { AppError::Transient { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal { message: msg.into() } }

    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation",
            AppError::InvalidCredentials { .. } => "invalid_credentials",
            AppError::AccountInactive => "account_inactive",
            AppError::AccountLocked => "account_locked",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden { .. } => "forbidden",
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict { .. } => "conflict",
            AppError::Transient { .. } => "transient",
            AppError::Internal { .. } => "internal",
        }
    }

    /// User-facing message. Credential failures stay generic on purpose.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation { message }
            | AppError::Forbidden { message }
            | AppError::NotFound { message }
            | AppError::Conflict { message } => message.clone(),
            AppError::InvalidCredentials { attempts_remaining: Some(n) } => {
                format!("invalid credentials ({} attempts remaining)", n)
            }
            AppError::InvalidCredentials { attempts_remaining: None } => "invalid credentials".to_string(),
            AppError::AccountInactive => "account is locked; contact an administrator".to_string(),
            AppError::AccountLocked => "account locked after too many failed attempts (0 attempts remaining)".to_string(),
            AppError::Unauthorized => "not authenticated".to_string(),
            AppError::Transient { .. } => "temporary failure, please retry".to_string(),
            AppError::Internal { .. } => "internal error".to_string(),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::InvalidCredentials { .. } => 401,
            AppError::AccountInactive => 423,
            AppError::AccountLocked => 423,
            AppError::Unauthorized => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Transient { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: store/IO trouble is transient unless mapped earlier
        AppError::Transient { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::validation("missing handle").http_status(), 400);
        assert_eq!(AppError::invalid_credentials(None).http_status(), 401);
        assert_eq!(AppError::invalid_credentials(Some(2)).http_status(), 401);
        assert_eq!(AppError::AccountInactive.http_status(), 423);
        assert_eq!(AppError::AccountLocked.http_status(), 423);
        assert_eq!(AppError::Unauthorized.http_status(), 401);
        assert_eq!(AppError::forbidden("role").http_status(), 403);
        assert_eq!(AppError::not_found("missing").http_status(), 404);
        assert_eq!(AppError::conflict("dup handle").http_status(), 409);
        assert_eq!(AppError::transient("io").http_status(), 503);
        assert_eq!(AppError::internal("panic").http_status(), 500);
    }

    #[test]
    fn generic_messages_do_not_leak() {
        // Unknown-handle and wrong-password shapes are indistinguishable
        let unknown = AppError::invalid_credentials(None);
        assert_eq!(unknown.message(), "invalid credentials");
        let transient = AppError::transient("ECONNREFUSED backend 10.0.0.3:5432");
        assert!(!transient.message().contains("10.0.0.3"));
    }

    #[test]
    fn attempts_remaining_surfaces() {
        let e = AppError::invalid_credentials(Some(3));
        assert!(e.message().contains("3 attempts remaining"));
        assert_eq!(e.code_str(), "invalid_credentials");
    }

    #[test]
    fn serde_tagging_round_trip() {
        let e = AppError::AccountLocked;
        let js = serde_json::to_string(&e).unwrap();
        assert!(js.contains("\"type\":\"account_locked\""));
        let back: AppError = serde_json::from_str(&js).unwrap();
        assert_eq!(back, e);
    }
}
