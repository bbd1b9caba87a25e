//! Telemetry logic.
//! Support tracing, metrics and logging.
use metrics::Unit;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Authentication attempts, labelled by `outcome`.
pub const AUTHENTICATIONS: &str = "directory_authentications_total";
/// Accounts returned by the last synchronization.
pub const SYNC_USERS: &str = "directory_sync_users";
/// Group members which could not be resolved.
pub const MEMBER_LOOKUP_FAILURES: &str = "directory_member_lookup_failures_total";

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn setup_tracing(default_level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

/// Registers descriptions of directory metrics on the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        AUTHENTICATIONS,
        Unit::Count,
        "Directory authentication attempts by outcome."
    );
    metrics::describe_gauge!(
        SYNC_USERS,
        Unit::Count,
        "Unique accounts found by the last directory synchronization."
    );
    metrics::describe_counter!(
        MEMBER_LOOKUP_FAILURES,
        Unit::Count,
        "Group members skipped because their lookup failed."
    );
}
