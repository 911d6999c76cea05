//! Channel and group naming rules.
//!
//! A channel name identifies exactly one consumer inbox for the lifetime of
//! its connection. Names are printable ASCII without whitespace, at most 100
//! characters. A `!` splits the name into a non-local prefix and a random
//! local suffix; sharded layers route on the portion after the last `!`.
//! Group names follow the same character rules but never contain `!`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

use crate::{Error, Result};

/// Maximum length of a channel or group name.
pub const MAX_NAME_LEN: usize = 100;

/// Number of random bytes behind a generated channel-name suffix.
/// Nine bytes encode to twelve URL-safe base64 characters.
const SUFFIX_BYTES: usize = 9;

// Printable ASCII, no whitespace. `!` and `.` are ordinary characters here;
// their structural meaning is enforced separately.
static NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[!-~]+$").unwrap());

/// Validate a channel name.
///
/// A valid channel name:
/// - Is non-empty and at most [`MAX_NAME_LEN`] characters
/// - Contains only printable ASCII with no whitespace
///
/// # Examples
///
/// ```
/// use wirebus_core::names::valid_channel_name;
///
/// assert!(valid_channel_name("specific.abc123!xYz-9_Qk42Aa"));
/// assert!(!valid_channel_name("has space"));
/// assert!(!valid_channel_name(""));
/// ```
pub fn valid_channel_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && NAME_REGEX.is_match(name)
}

/// Validate a channel name that must carry a `!` separator, as required by
/// layers that route on the non-local portion.
pub fn valid_client_channel_name(name: &str) -> bool {
    valid_channel_name(name) && name.contains('!')
}

/// Validate a group name. Same rules as channel names, but `!` is reserved
/// for channel routing and therefore forbidden.
pub fn valid_group_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && NAME_REGEX.is_match(name)
        && !name.contains('!')
}

/// Validate a channel name, returning [`Error::InvalidChannelName`] on failure.
pub fn require_valid_channel_name(name: &str) -> Result<()> {
    if valid_channel_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidChannelName(name.to_string()))
    }
}

/// Validate a group name, returning [`Error::InvalidGroupName`] on failure.
pub fn require_valid_group_name(name: &str) -> Result<()> {
    if valid_group_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidGroupName(name.to_string()))
    }
}

/// Generate a fresh random name suffix: twelve URL-safe base64 characters
/// drawn from a cryptographically strong source.
pub fn new_channel_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a fresh channel name under `prefix`. Sharded layers build
/// their own `!`-separated names instead, baking a process-unique portion
/// into the prefix side.
pub fn new_channel_name(prefix: &str) -> String {
    format!("{}.{}", prefix, new_channel_suffix())
}

/// The non-local portion of a channel name: the substring after the last
/// `!`, or the whole name when there is no separator. Sharded layers hash
/// this portion so every process maps a name to the same host.
pub fn non_local_part(name: &str) -> &str {
    match name.rfind('!') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}
