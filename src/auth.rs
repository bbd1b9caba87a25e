//! Credential verification against the directory.

use thiserror::Error;

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::mapper;
use crate::provision;
use crate::session::{Connector, Session};
use crate::telemetry::AUTHENTICATIONS;
use crate::user::{DirectoryUser, ProvisionedUser};

/// Why the directory refused a login.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("user not found in directory")]
    UserNotFound,
    #[error("login matches {matches} directory entries")]
    AmbiguousUser { matches: usize },
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Outcome of [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified(DirectoryUser),
    Rejected(Rejection),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }

    /// Verified user, or why it was rejected.
    pub fn into_result(self) -> std::result::Result<DirectoryUser, Rejection> {
        match self {
            Verification::Verified(user) => Ok(user),
            Verification::Rejected(rejection) => Err(rejection),
        }
    }

    /// Account to create on first login, for verified users only.
    pub fn provision(&self, config: &DirectoryConfig) -> Option<ProvisionedUser> {
        match self {
            Verification::Verified(user) if !user.email.is_empty() => {
                Some(provision::translate(config, user))
            },
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Verification::Verified(_) => "verified",
            Verification::Rejected(Rejection::UserNotFound) => "not_found",
            Verification::Rejected(Rejection::AmbiguousUser { .. }) => "ambiguous",
            Verification::Rejected(Rejection::InvalidCredentials) => "invalid_credentials",
        }
    }
}

/// Authenticates `login` with `password`.
///
/// Binds as the service account, looks up exactly one entry by login
/// attribute, then re-binds as that entry with `password`. Rejections are
/// returned as [`Verification::Rejected`]; errors mean the directory could
/// not be queried.
#[tracing::instrument(skip_all, fields(login = %login))]
pub async fn authenticate<C>(
    connector: &C,
    config: &DirectoryConfig,
    login: &str,
    password: &str,
) -> Result<Verification>
where
    C: Connector + ?Sized,
{
    let outcome = verify(connector, config, login, password).await;

    match &outcome {
        Ok(verification) => {
            metrics::counter!(AUTHENTICATIONS, "outcome" => verification.label())
                .increment(1);
            match verification {
                Verification::Verified(user) => {
                    tracing::info!(dn = %user.dn, "directory authentication successful");
                },
                Verification::Rejected(reason) => {
                    tracing::info!(%reason, "directory authentication rejected");
                },
            }
        },
        Err(err) => {
            metrics::counter!(AUTHENTICATIONS, "outcome" => "error")
                .increment(1);
            tracing::warn!(error = %err, phase = err.phase(), "directory authentication failed");
        },
    }

    outcome
}

async fn verify<C>(
    connector: &C,
    config: &DirectoryConfig,
    login: &str,
    password: &str,
) -> Result<Verification>
where
    C: Connector + ?Sized,
{
    // An empty simple bind is an anonymous bind, which servers accept.
    if password.is_empty() || login.trim().is_empty() {
        return Ok(Verification::Rejected(Rejection::InvalidCredentials));
    }

    let mut session = Session::establish(connector, config).await?;
    let outcome = check(&mut session, config, login, password).await;
    session.close().await;

    outcome
}

/// Locates `login` then proves `password` on an opened session.
async fn check(
    session: &mut Session,
    config: &DirectoryConfig,
    login: &str,
    password: &str,
) -> Result<Verification> {
    session.bind_service(config).await?;

    let filter = config.login_filter(login.trim());
    let mut entries = session
        .search(&config.base_dn, &filter, &config.user_attributes())
        .await?;

    let entry = match entries.len() {
        0 => return Ok(Verification::Rejected(Rejection::UserNotFound)),
        1 => entries.remove(0),
        matches => {
            tracing::warn!(filter, matches, "login matches several directory entries");
            return Ok(Verification::Rejected(Rejection::AmbiguousUser { matches }));
        },
    };

    if !session.verify(&entry.dn, password).await? {
        return Ok(Verification::Rejected(Rejection::InvalidCredentials));
    }

    Ok(Verification::Verified(mapper::extract(config, &entry)))
}
