//! Directory and provisioned user representations.

use serde::{Deserialize, Serialize};

/// Placeholder used when a directory entry has no first name.
pub const DEFAULT_FIRST_NAME: &str = "LDAP";
/// Placeholder used when a directory entry has no last name.
pub const DEFAULT_LAST_NAME: &str = "User";

/// User read from a directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub first_name: String,
    pub last_name: String,
    /// Always lower-cased.
    pub email: String,
    /// Value of the login attribute.
    pub remote_id: String,
    pub common_name: String,
    /// Entry the user was read from.
    pub dn: String,
}

/// Account handed over to the identity store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub initials: String,
    pub active: bool,
    /// May create content.
    pub editor: bool,
    pub admin: bool,
    pub global_admin: bool,
    pub analytics: bool,
    pub view_users: bool,
}

impl ProvisionedUser {
    /// Whether any elevated permission is granted.
    pub fn is_privileged(&self) -> bool {
        self.admin || self.global_admin || self.analytics || self.view_users
    }
}

/// First letter of each name, upper-cased.
pub fn initials(first_name: &str, last_name: &str) -> String {
    [first_name, last_name]
        .iter()
        .filter_map(|name| name.trim().chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}
