//! Filename sanitizing and storage key generation for uploaded images.
//!
//! A storage key has the form
//! `{owner_id}_{timestamp_millis}_{random8}_{sanitized_name}` where `random8`
//! is eight alphanumeric characters from the operating system's CSPRNG.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

const RANDOM_SUFFIX_LEN: usize = 8;

/// Turn a user-supplied filename into a safe display name.
///
/// Strips path separators, `?<>:*|"` and control characters, blanks names
/// made only of dots and Windows device names, trims trailing dots and
/// spaces, and caps the result at 255 bytes. Returns an empty string when
/// nothing usable is left.
pub fn sanitize_filename(name: &str) -> String {
    ::sanitize_filename::sanitize_with_options(
        name,
        ::sanitize_filename::Options {
            windows: true,
            truncate: true,
            replacement: "",
        },
    )
}

/// Build the object storage key for an upload
pub fn generate_storage_key(
    owner_id: &str,
    timestamp: DateTime<Utc>,
    sanitized_name: &str,
) -> String {
    format!(
        "{owner_id}_{millis}_{suffix}_{sanitized_name}",
        millis = timestamp.timestamp_millis(),
        suffix = random_suffix(),
    )
}

/// Eight alphanumeric characters drawn from the OS random source
pub fn random_suffix() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect()
}
