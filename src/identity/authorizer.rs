//! Role resolution and route gating.
//!
//! Stored role values arrive in two shapes: a modern canonical field and a
//! legacy free-text field left over from earlier iterations of the
//! application. `resolve_role` collapses both onto the closed `Role` set;
//! `can_access` gates navigation targets against a static table.

use std::collections::HashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    User,
    Organization,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::User => "user",
            Role::Organization => "organization",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Legacy free-text values observed across iterations of the user table.
// supervisor/processor were staff sub-roles and collapse into User.
static LEGACY_ROLES: Lazy<HashMap<&'static str, Role>> = Lazy::new(|| {
    HashMap::from([
        ("administrator", Role::Administrator),
        ("admin", Role::Administrator),
        ("organization", Role::Organization),
        ("org", Role::Organization),
        ("user", Role::User),
        ("staff", Role::User),
        ("supervisor", Role::User),
        ("processor", Role::User),
    ])
});

/// Total mapping from a legacy free-text role value onto the canonical set.
/// Case-insensitive; empty and unrecognized values default to `User`.
pub fn resolve_legacy(value: &str) -> Role {
    LEGACY_ROLES
        .get(value.trim().to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(Role::User)
}

/// Resolve the canonical role for an account: a present modern value wins,
/// otherwise the legacy text is mapped. Pure and total.
pub fn resolve_role(modern: Option<Role>, legacy: Option<&str>) -> Role {
    match modern {
        Some(r) => r,
        None => resolve_legacy(legacy.unwrap_or("")),
    }
}

const ALL: &[Role] = &[Role::Administrator, Role::User, Role::Organization];
const STAFF: &[Role] = &[Role::Administrator, Role::User];

// Navigation targets by route prefix. Longest matching prefix wins so
// /admin/* never falls back onto a broader entry.
const ROUTE_TABLE: &[(&str, &[Role])] = &[
    ("/me", ALL),
    ("/csrf", ALL),
    ("/password", ALL),
    ("/logout", ALL),
    ("/requests", ALL),
    ("/notifications", ALL),
    ("/reports", STAFF),
    ("/admin", &[Role::Administrator]),
];

/// Gate a navigation target for a role. Targets outside the table are denied.
pub fn can_access(role: Role, target: &str) -> bool {
    let mut best: Option<(&str, &[Role])> = None;
    for (prefix, roles) in ROUTE_TABLE {
        if target == *prefix || target.starts_with(&format!("{}/", prefix)) {
            match best {
                Some((b, _)) if b.len() >= prefix.len() => {}
                _ => best = Some((prefix, roles)),
            }
        }
    }
    match best {
        Some((_, roles)) => roles.contains(&role),
        None => false,
    }
}
