//! Directory synchronization.

use serde::Serialize;

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::provision;
use crate::search::{execute_group_filter, execute_user_filter};
use crate::session::Connector;
use crate::telemetry::SYNC_USERS;
use crate::user::ProvisionedUser;

/// Users listed in a [`PreviewReport`].
pub const PREVIEW_SAMPLE: usize = 50;

/// Pulls every user selected by the configured filters.
///
/// Users matched by the user filter come first. Nothing is returned unless
/// both filters succeed.
#[tracing::instrument(skip_all, fields(base_dn = %config.base_dn))]
pub async fn sync<C>(connector: &C, config: &DirectoryConfig) -> Result<Vec<ProvisionedUser>>
where
    C: Connector + ?Sized,
{
    if config.user_filter().is_none() && config.group_filter().is_none() {
        tracing::info!("no user or group filter configured, nothing to synchronize");
        return Ok(Vec::new());
    }

    let mut users = execute_user_filter(connector, config).await?;
    users.extend(execute_group_filter(connector, config).await?);

    let found = users.len();
    let accounts = provision::merge(config, users);

    metrics::gauge!(SYNC_USERS).set(accounts.len() as f64);
    tracing::info!(found, unique = accounts.len(), "directory synchronized");

    Ok(accounts)
}

/// Dry run of [`sync`] for administrators checking their settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    pub is_error: bool,
    pub message: String,
    /// Total users which would be provisioned.
    pub count: usize,
    /// First users, at most [`PREVIEW_SAMPLE`].
    pub users: Vec<ProvisionedUser>,
}

/// Runs [`sync`] without provisioning anything.
///
/// Failures are reported, never returned.
pub async fn preview<C>(connector: &C, config: &DirectoryConfig) -> PreviewReport
where
    C: Connector + ?Sized,
{
    match sync(connector, config).await {
        Ok(mut users) => {
            let count = users.len();
            users.truncate(PREVIEW_SAMPLE);
            PreviewReport {
                is_error: false,
                message: format!("Sync'ed with LDAP server, found {count} users"),
                count,
                users,
            }
        },
        Err(err) => PreviewReport {
            is_error: true,
            message: format!("Unable to connect to LDAP server: {err}"),
            ..Default::default()
        },
    }
}
