//! Directory users to provisioned accounts.

use std::collections::HashSet;

use crate::config::DirectoryConfig;
use crate::user::{DirectoryUser, ProvisionedUser, initials};

/// Creates a unique list of accounts using email as primary key.
///
/// Order is kept, the first record of an email wins and records without
/// email are dropped.
pub fn merge(config: &DirectoryConfig, users: Vec<DirectoryUser>) -> Vec<ProvisionedUser> {
    let total = users.len();
    let mut seen = HashSet::with_capacity(total);
    let mut accounts = Vec::with_capacity(total);

    for user in users {
        if user.email.is_empty() {
            tracing::debug!(dn = %user.dn, "skipping directory user without email");
            continue;
        }
        if !seen.insert(user.email.clone()) {
            continue;
        }
        accounts.push(translate(config, &user));
    }

    tracing::debug!(total, unique = accounts.len(), "directory users merged");

    accounts
}

/// Turns a directory user into an account with default permissions.
///
/// Elevated permissions are never granted to directory accounts.
pub fn translate(config: &DirectoryConfig, user: &DirectoryUser) -> ProvisionedUser {
    ProvisionedUser {
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        initials: initials(&user.first_name, &user.last_name),
        active: true,
        editor: config.defaults.editor,
        admin: false,
        global_admin: false,
        analytics: false,
        view_users: false,
    }
}
