//! Configuration manager for directory integration.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{DirectoryError, Result};

/// Environment variable overriding an empty `bind_password`.
pub const BIND_PASSWORD_ENV: &str = "LDAP_BIND_PASSWORD";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 389;

/// Transport security of the directory connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain LDAP.
    #[default]
    None,
    /// Plain LDAP upgraded with StartTLS before any bind.
    StartTls,
    /// TLS from connection start.
    Ldaps,
}

/// Directory connection and mapping configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Hostname of the directory server.
    #[validate(length(min = 1, message = "directory host is required"))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub encryption: Encryption,
    /// Accept any server certificate. Only for test directories.
    pub tls_skip_verify: bool,
    /// Connect timeout in seconds, applied by the transport.
    pub connect_timeout: Option<u64>,
    /// Service account used to search the directory.
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: String,
    /// DN every search is scoped under.
    #[validate(length(min = 1, message = "base DN is required"))]
    pub base_dn: String,
    #[validate(custom(function = "validate_filter"))]
    pub user_filter: String,
    #[validate(custom(function = "validate_filter"))]
    pub group_filter: String,
    #[validate(nested)]
    pub attributes: AttributeMap,
    pub defaults: DefaultPermissions,
}

/// Names of the directory attributes read for each user and group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AttributeMap {
    /// Attribute holding the login identifier (user RDN).
    #[validate(length(min = 1))]
    pub login: String,
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub display_name: String,
    #[validate(length(min = 1))]
    pub common_name: String,
    /// Multi-valued attribute of a group listing member DNs.
    #[validate(length(min = 1))]
    pub group_member: String,
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self {
            login: "uid".into(),
            first_name: "givenName".into(),
            last_name: "sn".into(),
            email: "mail".into(),
            display_name: "displayName".into(),
            common_name: "cn".into(),
            group_member: "member".into(),
        }
    }
}

/// Flags given to every account created from the directory.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPermissions {
    /// New users may create content.
    pub editor: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            encryption: Encryption::default(),
            tls_skip_verify: false,
            connect_timeout: None,
            bind_dn: String::default(),
            bind_password: String::default(),
            base_dn: String::default(),
            user_filter: String::default(),
            group_filter: String::default(),
            attributes: AttributeMap::default(),
            defaults: DefaultPermissions::default(),
        }
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("connect_timeout", &self.connect_timeout)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"[REDACTED]")
            .field("base_dn", &self.base_dn)
            .field("user_filter", &self.user_filter)
            .field("group_filter", &self.group_filter)
            .field("attributes", &self.attributes)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl DirectoryConfig {
    /// Reads a YAML configuration file, cleans and validates it.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut content = String::new();
        File::open(path)
            .and_then(|mut file| file.read_to_string(&mut content))
            .map_err(|source| DirectoryError::ReadConfig {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(&content)?;
        if config.bind_password.is_empty() {
            if let Ok(password) = std::env::var(BIND_PASSWORD_ENV) {
                config.bind_password = password;
            }
        }

        tracing::debug!(?path, host = %config.host, "directory configuration loaded");

        Ok(config)
    }

    /// Parses a YAML document, cleans and validates it.
    pub fn parse(content: &str) -> Result<Self> {
        let config: DirectoryConfig = serde_yaml::from_str(content)?;
        let config = config.clean();
        config.validate()?;
        Ok(config)
    }

    /// Trims surrounding whitespace of every textual setting.
    pub fn clean(mut self) -> Self {
        fn trim(value: &mut String) {
            let trimmed = value.trim();
            if trimmed.len() != value.len() {
                *value = trimmed.to_owned();
            }
        }

        trim(&mut self.host);
        trim(&mut self.bind_dn);
        trim(&mut self.base_dn);
        trim(&mut self.user_filter);
        trim(&mut self.group_filter);

        let attrs = &mut self.attributes;
        for value in [
            &mut attrs.login,
            &mut attrs.first_name,
            &mut attrs.last_name,
            &mut attrs.email,
            &mut attrs.display_name,
            &mut attrs.common_name,
            &mut attrs.group_member,
        ] {
            trim(value);
        }

        self
    }

    /// `host:port` of the directory server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// LDAP URL matching the encryption mode.
    pub fn url(&self) -> String {
        let scheme = match self.encryption {
            Encryption::Ldaps => "ldaps",
            Encryption::None | Encryption::StartTls => "ldap",
        };
        format!("{scheme}://{}", self.address())
    }

    /// Connect timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// User filter, if configured.
    pub fn user_filter(&self) -> Option<&str> {
        non_blank(&self.user_filter)
    }

    /// Group filter, if configured.
    pub fn group_filter(&self) -> Option<&str> {
        non_blank(&self.group_filter)
    }

    /// Filter selecting the entry whose login attribute equals `login`.
    pub fn login_filter(&self, login: &str) -> String {
        format!("({}={})", self.attributes.login, ldap3::ldap_escape(login))
    }

    /// Attributes requested when reading a user entry.
    pub fn user_attributes(&self) -> Vec<String> {
        let attrs = &self.attributes;
        let mut names: Vec<String> = Vec::with_capacity(6);
        for name in [
            &attrs.common_name,
            &attrs.login,
            &attrs.first_name,
            &attrs.last_name,
            &attrs.email,
            &attrs.display_name,
        ] {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Attributes requested when reading a group entry.
    pub fn group_attributes(&self) -> Vec<String> {
        vec![
            self.attributes.common_name.clone(),
            self.attributes.group_member.clone(),
        ]
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Empty filters are allowed and mean "not configured".
fn validate_filter(filter: &str) -> std::result::Result<(), ValidationError> {
    if filter.trim().is_empty() {
        return Ok(());
    }

    let filter = filter.trim();
    if !filter.starts_with('(') || !filter.ends_with(')') {
        return Err(ValidationError::new("filter_parentheses"));
    }

    let mut depth = 0usize;
    let mut escaped = false;
    for c in filter.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ValidationError::new("filter_unbalanced"))?;
            },
            _ => {},
        }
    }

    if depth == 0 {
        Ok(())
    } else {
        Err(ValidationError::new("filter_unbalanced"))
    }
}
