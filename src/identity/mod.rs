//! Central identity and session management for unified login across docket.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod account;
mod manager;
mod authorizer;

pub use principal::{Principal, Attrs};
pub use session::{Session, SessionToken, SessionManager};
pub use account::{AccountRecord, AccountPatch, AccountStore, JsonAccountStore, StoreError};
pub use manager::{AuthManager, LoginRequest, LoginResponse, NewAccount};
pub use authorizer::{Role, resolve_role, resolve_legacy, can_access};
