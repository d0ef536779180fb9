//! Input validation utilities.
//!
//! Request metadata is written verbatim into audit entries, so it is checked here before it
//! reaches an [`AccessContext`](crate::audit::AccessContext).

use crate::constants::MAX_USER_AGENT_LEN;
use crate::{AccessError, AccessResult};
use std::net::IpAddr;

/// Parses an IPv4 or IPv6 address.
///
/// # Errors
///
/// Returns `AccessError::InvalidInput` if the input is not an IP address.
pub fn parse_ip_address(input: &str) -> AccessResult<IpAddr> {
    input
        .trim()
        .parse()
        .map_err(|_| AccessError::InvalidInput(format!("invalid IP address '{}'", input.trim())))
}

/// Normalises a `User-Agent` string for storage.
///
/// Control characters (including newlines, which would break a line-oriented audit log) are
/// dropped and the result is truncated to [`MAX_USER_AGENT_LEN`] characters. Returns `None`
/// when nothing printable remains.
pub fn sanitise_user_agent(input: &str) -> Option<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_USER_AGENT_LEN)
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
