//! LDAP support.
//!
//! Sessions are driven by `ldap3` on the current tokio runtime.

use std::io::ErrorKind;

use async_trait::async_trait;
use ldap3::adapters::PagedResults;
use ldap3::{Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};

use crate::config::{DirectoryConfig, Encryption};
use crate::error::{ConnectError, SessionError};
use crate::session::{Connector, DirectoryEntry, DirectorySession, SearchOutcome};

/// LDAP manager to create connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap;

#[async_trait]
impl Connector for Ldap {
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectorySession>, ConnectError> {
        let starttls = config.encryption == Encryption::StartTls;
        let mut settings = LdapConnSettings::new()
            .set_starttls(starttls)
            .set_no_tls_verify(config.tls_skip_verify);
        if let Some(timeout) = config.timeout() {
            settings = settings.set_conn_timeout(timeout);
        }

        // StartTLS runs inside `with_settings`, nothing is returned on failure.
        let (handle, conn) = LdapConnAsync::with_settings(settings, &config.url())
            .await
            .map_err(|err| connect_error(err, starttls))?;
        tokio::spawn(async move {
            if let Err(err) = handle.drive().await {
                tracing::warn!(error = %err, "ldap connection error");
            }
        });

        tracing::debug!(address = %config.address(), "ldap connected");

        Ok(Box::new(LdapSession {
            conn,
            closed: false,
        }))
    }
}

/// Opened `ldap3` connection.
struct LdapSession {
    conn: Ldap3,
    /// Unbind already sent.
    closed: bool,
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), SessionError> {
        self.conn.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<SearchOutcome, SessionError> {
        let (entries, _) = self
            .conn
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
            .map(SearchEntry::construct)
            .map(DirectoryEntry::from)
            .collect())
    }

    async fn search_paged(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
        page_size: i32,
    ) -> Result<SearchOutcome, SessionError> {
        let adapter: PagedResults<String, Vec<String>> = PagedResults::new(page_size);
        let mut stream = self
            .conn
            .streaming_search_with(adapter, base, Scope::Subtree, filter, attrs.to_vec())
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await? {
            if entry.is_ref() || entry.is_intermediate() {
                continue;
            }
            entries.push(DirectoryEntry::from(SearchEntry::construct(entry)));
        }
        stream.finish().await.success()?;

        tracing::trace!(filter, count = entries.len(), "paged search finished");

        Ok(entries)
    }

    async fn unbind(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        self.conn.unbind().await?;
        Ok(())
    }
}

impl Drop for LdapSession {
    fn drop(&mut self) {
        // The driver task stops once every handle is dropped; unbind first
        // when a runtime is still around.
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let mut conn = self.conn.clone();
        runtime.spawn(async move {
            if let Err(err) = conn.unbind().await {
                tracing::debug!(error = %err, "ldap unbind failed");
            }
        });
    }
}

impl From<LdapError> for SessionError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::LdapResult { result } => SessionError::Result {
                code: result.rc,
                text: result.text,
            },
            err => SessionError::Transport(Box::new(err)),
        }
    }
}

/// Splits connection errors between dial and StartTLS negotiation.
///
/// With StartTLS, anything but a failed dial happened once the peer
/// accepted the connection, during the upgrade.
fn connect_error(err: LdapError, starttls: bool) -> ConnectError {
    match err {
        LdapError::Io { ref source } if is_dial_failure(source.kind()) => {
            ConnectError::Dial(Box::new(err))
        },
        err if starttls => ConnectError::Upgrade(Box::new(err)),
        err => ConnectError::Dial(Box::new(err)),
    }
}

fn is_dial_failure(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::AddrNotAvailable
    )
}
