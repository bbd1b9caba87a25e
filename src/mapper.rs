//! Directory entry to [`DirectoryUser`] mapping.

use crate::config::DirectoryConfig;
use crate::session::DirectoryEntry;
use crate::user::{DEFAULT_FIRST_NAME, DEFAULT_LAST_NAME, DirectoryUser};

/// Builds a user from the attributes named in `config`.
///
/// Names are never empty: when both are missing they are taken from the
/// display name, then placeholders fill whatever is still blank.
pub fn extract(config: &DirectoryConfig, entry: &DirectoryEntry) -> DirectoryUser {
    let attrs = &config.attributes;

    let mut first_name = entry.value(&attrs.first_name).trim().to_owned();
    let mut last_name = entry.value(&attrs.last_name).trim().to_owned();

    if first_name.is_empty() && last_name.is_empty() {
        (first_name, last_name) = split_display_name(entry.value(&attrs.display_name));
    }

    if first_name.is_empty() {
        first_name = DEFAULT_FIRST_NAME.to_owned();
    }
    if last_name.is_empty() {
        last_name = DEFAULT_LAST_NAME.to_owned();
    }

    DirectoryUser {
        first_name,
        last_name,
        email: entry.value(&attrs.email).trim().to_lowercase(),
        remote_id: entry.value(&attrs.login).to_owned(),
        common_name: entry.value(&attrs.common_name).to_owned(),
        dn: entry.dn.clone(),
    }
}

/// `"Ada King Lovelace"` gives `("Ada", "King Lovelace")`.
fn split_display_name(display_name: &str) -> (String, String) {
    let mut words = display_name.split_whitespace();
    let first = words.next().unwrap_or_default().to_owned();
    let rest = words.collect::<Vec<_>>().join(" ");
    (first, rest)
}
