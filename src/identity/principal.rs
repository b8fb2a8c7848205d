use serde::{Deserialize, Serialize};

use super::authorizer::Role;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attrs {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// The resolved identity carried on a session. The role here is always the
/// canonical one computed at login time, never the raw stored value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub account_id: String,
    pub handle: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub attrs: Attrs,
}
