//! Error handler for autha directory integration.

use std::path::PathBuf;

use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Boxed error coming from the transport library.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by a [`crate::session::Connector`] while opening a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("dial failed")]
    Dial(#[source] BoxError),
    #[error("transport upgrade failed")]
    Upgrade(#[source] BoxError),
}

/// Error returned by an opened [`crate::session::DirectorySession`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server answered, but with a non-success LDAP result code.
    #[error("directory returned result code {code}: {text}")]
    Result { code: u32, text: String },
    /// The request never got an answer.
    #[error(transparent)]
    Transport(BoxError),
}

impl SessionError {
    /// LDAP `invalidCredentials` result code.
    pub const INVALID_CREDENTIALS: u32 = 49;

    /// Whether the server itself rejected the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SessionError::Result { .. })
    }
}

/// Enum representing directory-side errors.
///
/// Each variant names the phase which failed. Credential rejections are
/// not errors, see [`crate::auth::Verification`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unable to dial directory server {address}")]
    Connection {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("unable to upgrade connection to {address} with StartTLS")]
    TransportUpgrade {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("unable to bind service account {bind_dn}")]
    AdminBind {
        bind_dn: String,
        #[source]
        source: SessionError,
    },

    #[error("unable to execute directory search for filter {filter}")]
    Search {
        filter: String,
        #[source]
        source: SessionError,
    },

    #[error("directory session failed while verifying credentials")]
    Verification(#[source] SessionError),

    #[error("invalid directory configuration: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("unable to read configuration file {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration file")]
    ParseConfig(#[from] serde_yaml::Error),
}

impl DirectoryError {
    /// Whether the caller may retry the same operation later.
    ///
    /// A rejected service bind or an invalid configuration will fail the
    /// same way until an operator fixes it.
    pub fn is_retryable(&self) -> bool {
        match self {
            DirectoryError::Connection { .. }
            | DirectoryError::TransportUpgrade { .. }
            | DirectoryError::Verification(_) => true,
            DirectoryError::Search { source, .. } => !source.is_rejection(),
            DirectoryError::AdminBind { source, .. } => !source.is_rejection(),
            DirectoryError::Validation(_)
            | DirectoryError::ReadConfig { .. }
            | DirectoryError::ParseConfig(_) => false,
        }
    }

    /// Short name of the failing phase, attached to logs.
    pub fn phase(&self) -> &'static str {
        match self {
            DirectoryError::Connection { .. } => "connect",
            DirectoryError::TransportUpgrade { .. } => "starttls",
            DirectoryError::AdminBind { .. } => "bind",
            DirectoryError::Search { .. } => "search",
            DirectoryError::Verification(_) => "verify",
            DirectoryError::Validation(_)
            | DirectoryError::ReadConfig { .. }
            | DirectoryError::ParseConfig(_) => "config",
        }
    }
}
