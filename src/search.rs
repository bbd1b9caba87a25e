//! User and group filter execution.

use std::collections::HashSet;

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::mapper;
use crate::session::{Connector, SearchOutcome, Session};
use crate::telemetry::MEMBER_LOOKUP_FAILURES;
use crate::user::DirectoryUser;

/// Page size used for bulk searches.
pub const MAX_PAGE_SIZE: i32 = 250;

/// Runs the configured user filter over the whole subtree.
///
/// Returns no user when no user filter is configured.
#[tracing::instrument(skip_all)]
pub async fn execute_user_filter<C>(
    connector: &C,
    config: &DirectoryConfig,
) -> Result<Vec<DirectoryUser>>
where
    C: Connector + ?Sized,
{
    let Some(filter) = config.user_filter() else {
        return Ok(Vec::new());
    };

    let mut session = Session::establish(connector, config).await?;
    let entries = fetch_users(&mut session, config, filter).await;
    session.close().await;
    let entries = entries?;

    tracing::info!(filter, count = entries.len(), "user filter executed");

    Ok(entries
        .iter()
        .map(|entry| mapper::extract(config, entry))
        .collect())
}

/// Runs the configured group filter then resolves every group member.
///
/// Members are looked up one after the other on the same session. A member
/// which cannot be resolved is skipped.
#[tracing::instrument(skip_all)]
pub async fn execute_group_filter<C>(
    connector: &C,
    config: &DirectoryConfig,
) -> Result<Vec<DirectoryUser>>
where
    C: Connector + ?Sized,
{
    let Some(filter) = config.group_filter() else {
        return Ok(Vec::new());
    };

    let mut session = Session::establish(connector, config).await?;
    let users = resolve_groups(&mut session, config, filter).await;
    session.close().await;

    users
}

async fn fetch_users(
    session: &mut Session,
    config: &DirectoryConfig,
    filter: &str,
) -> Result<SearchOutcome> {
    session.bind_service(config).await?;
    session
        .search_paged(&config.base_dn, filter, &config.user_attributes(), MAX_PAGE_SIZE)
        .await
}

async fn resolve_groups(
    session: &mut Session,
    config: &DirectoryConfig,
    filter: &str,
) -> Result<Vec<DirectoryUser>> {
    session.bind_service(config).await?;

    let groups = session
        .search_paged(&config.base_dn, filter, &config.group_attributes(), MAX_PAGE_SIZE)
        .await?;

    let user_attributes = config.user_attributes();
    let mut resolved = HashSet::new();
    let mut users = Vec::new();

    for group in &groups {
        let members = group.values(&config.attributes.group_member);
        if members.is_empty() {
            tracing::debug!(group = %group.dn, "group has no member");
            continue;
        }

        for member in members {
            let Some(member_filter) = member_filter(member) else {
                tracing::debug!(group = %group.dn, %member, "skipping unusable member reference");
                continue;
            };
            if !resolved.insert(member_filter.clone()) {
                continue;
            }

            match session
                .search(&config.base_dn, &member_filter, &user_attributes)
                .await
            {
                Ok(entries) if entries.is_empty() => {
                    tracing::debug!(%member, "group member not found");
                },
                Ok(entries) => {
                    users.extend(entries.iter().map(|entry| mapper::extract(config, entry)));
                },
                Err(err) => {
                    metrics::counter!(MEMBER_LOOKUP_FAILURES).increment(1);
                    tracing::warn!(%member, error = %err, "unable to resolve group member");
                },
            }
        }
    }

    tracing::info!(
        filter,
        groups = groups.len(),
        members = users.len(),
        "group filter executed"
    );

    Ok(users)
}

/// Filter matching the leading RDN of a member DN.
///
/// `uid=jdoe,ou=people,dc=example,dc=org` gives `(uid=jdoe)`. References
/// without a comma are not usable.
pub fn member_filter(member: &str) -> Option<String> {
    let rdn = leading_rdn(member)?;
    let (attr, value) = rdn.split_once('=')?;
    let attr = attr.trim();
    if attr.is_empty() {
        return None;
    }

    Some(format!("({attr}={})", ldap3::ldap_escape(unescape_dn_value(value.trim()))))
}

/// Part of `dn` before its first unescaped comma.
fn leading_rdn(dn: &str) -> Option<&str> {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => return Some(&dn[..i]),
            _ => {},
        }
    }
    None
}

/// Removes DN escaping: `\,` and `\2C` both give `,`.
fn unescape_dn_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match hex {
            Some(byte) => {
                out.push(byte);
                i += 3;
            },
            None => {
                out.push(bytes[i + 1]);
                i += 2;
            },
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
