//! Directory sessions.
//!
//! A [`Session`] is opened per operation. Operations close it before
//! returning; dropping it releases the transport on every other exit path.
//! It carries no privilege until explicitly bound.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{DirectoryConfig, Encryption};
use crate::error::{ConnectError, DirectoryError, Result, SessionError};

/// Raw entry returned by a directory search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    /// Distinguished Name.
    pub dn: String,
    /// Attributes (all values are multi-valued).
    pub attrs: HashMap<String, Vec<String>>,
}

/// Ordered entries returned by one query.
pub type SearchOutcome = Vec<DirectoryEntry>;

impl DirectoryEntry {
    /// Creates an entry without attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Appends values to an attribute.
    pub fn with_attr<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attrs
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// All values of an attribute.
    ///
    /// Attribute names are matched ignoring ASCII case, like LDAP does.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .get(name)
            .or_else(|| {
                self.attrs
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, values)| values)
            })
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First value of an attribute, or an empty string.
    pub fn value(&self, name: &str) -> &str {
        self.values(name).first().map(String::as_str).unwrap_or_default()
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}

/// Opens sessions against a directory server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dials the server and, for [`Encryption::StartTls`], upgrades the
    /// connection before returning it.
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> std::result::Result<Box<dyn DirectorySession>, ConnectError>;
}

/// Primitive operations on an opened connection.
///
/// Searches are always scoped to the whole subtree under `base`.
/// Implementations release their transport when dropped.
#[async_trait]
pub trait DirectorySession: Send {
    /// Simple bind.
    async fn bind(
        &mut self,
        dn: &str,
        password: &str,
    ) -> std::result::Result<(), SessionError>;

    /// Single-request search.
    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> std::result::Result<SearchOutcome, SessionError>;

    /// Search using the paged results control, fetching every page.
    async fn search_paged(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
        page_size: i32,
    ) -> std::result::Result<SearchOutcome, SessionError>;

    /// Unbinds and closes the connection.
    async fn unbind(&mut self) -> std::result::Result<(), SessionError>;
}

/// Session scoped to a single top-level operation.
pub struct Session {
    inner: Box<dyn DirectorySession>,
    address: String,
}

impl Session {
    /// Opens a session to the configured server.
    pub async fn establish<C>(connector: &C, config: &DirectoryConfig) -> Result<Self>
    where
        C: Connector + ?Sized,
    {
        let address = config.url();
        tracing::debug!(%address, encryption = ?config.encryption, "connecting to directory server");

        let inner = connector.connect(config).await.map_err(|err| match err {
            ConnectError::Dial(source) => DirectoryError::Connection {
                address: address.clone(),
                source,
            },
            ConnectError::Upgrade(source) => DirectoryError::TransportUpgrade {
                address: address.clone(),
                source,
            },
        })?;

        if config.encryption == Encryption::StartTls {
            tracing::debug!(%address, "connection upgraded with StartTLS");
        }

        Ok(Self { inner, address })
    }

    /// Binds as the configured service account.
    pub async fn bind_service(&mut self, config: &DirectoryConfig) -> Result<()> {
        self.inner
            .bind(&config.bind_dn, &config.bind_password)
            .await
            .map_err(|source| DirectoryError::AdminBind {
                bind_dn: config.bind_dn.clone(),
                source,
            })?;

        tracing::debug!(address = %self.address, bind_dn = %config.bind_dn, "service account bound");
        Ok(())
    }

    /// Binds as `dn` to check `password`.
    ///
    /// Returns `Ok(false)` when the server rejects the credentials.
    pub async fn verify(&mut self, dn: &str, password: &str) -> Result<bool> {
        match self.inner.bind(dn, password).await {
            Ok(()) => Ok(true),
            Err(SessionError::Result { code, text }) => {
                tracing::debug!(address = %self.address, %dn, code, %text, "directory rejected user bind");
                Ok(false)
            },
            Err(err) => Err(DirectoryError::Verification(err)),
        }
    }

    /// Unbinds and releases the session.
    ///
    /// Dropping a session releases it as well, without waiting for the
    /// server.
    pub async fn close(mut self) {
        if let Err(err) = self.inner.unbind().await {
            tracing::debug!(address = %self.address, error = %err, "directory unbind failed");
        }
    }

    /// Subtree search in a single request.
    pub async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<SearchOutcome> {
        self.inner
            .search(base, filter, attrs)
            .await
            .map_err(|source| DirectoryError::Search {
                filter: filter.to_owned(),
                source,
            })
    }

    /// Subtree search fetching every page.
    pub async fn search_paged(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
        page_size: i32,
    ) -> Result<SearchOutcome> {
        self.inner
            .search_paged(base, filter, attrs, page_size)
            .await
            .map_err(|source| DirectoryError::Search {
                filter: filter.to_owned(),
                source,
            })
    }
}
