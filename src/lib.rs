//! Directory (LDAP) authentication and account synchronization for Autha.
//!
//! Every operation opens its own session, binds as the configured service
//! account and releases the session before returning.
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod ldap;
pub mod mapper;
pub mod provision;
pub mod search;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod user;

#[cfg(test)]
mod testing;

pub use auth::{Rejection, Verification, authenticate};
pub use config::{DirectoryConfig, Encryption};
pub use error::{DirectoryError, Result};
pub use ldap::Ldap;
pub use sync::{PreviewReport, preview, sync};
pub use user::{DirectoryUser, ProvisionedUser};
