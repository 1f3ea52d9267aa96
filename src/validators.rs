//! Input validation for sinkhole rule parameters
//!
//! Every value that ends up in an iptables argument vector passes through
//! here first. Values are passed to iptables without a shell, but they are
//! also written into rsyslog and systemd unit files, so anything that could
//! break out of those formats is rejected rather than silently stripped.

use crate::core::ruleset::{DEFAULT_DEST_PORT, DEFAULT_PROTOCOL, HashlimitField, Protocol};
use std::net::Ipv4Addr;
use std::str::FromStr;
use strum::IntoEnumIterator;

/// Kernel limit for the LOG target prefix (29 chars + NUL)
pub const MAX_LOG_PREFIX_LEN: usize = 29;

fn choices<T: IntoEnumIterator + std::fmt::Display>() -> String {
    T::iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates an IPv4 dotted quad.
///
/// # Errors
///
/// Returns `Err` if the value is not four decimal octets.
pub fn validate_ipv4(addr: &str) -> Result<Ipv4Addr, String> {
    addr.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| format!("'{addr}' is not an IPv4 address"))
}

/// Validates the protocol selector: `all` or a comma list of known protocols.
///
/// # Errors
///
/// Returns `Err` naming the first unknown protocol.
pub fn validate_protocols(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input == DEFAULT_PROTOCOL {
        return Ok(input.to_string());
    }
    if input.is_empty() {
        return Err("Protocol cannot be empty (use 'all')".to_string());
    }

    for name in input.split(',') {
        Protocol::from_str(name).map_err(|_| {
            format!(
                "Unknown protocol '{name}' (expected {} or all)",
                choices::<Protocol>()
            )
        })?;
    }
    Ok(input.to_string())
}

/// Validates destination ports: a comma list whose elements are single
/// ports or `start:end` ranges with start ≤ end.
///
/// # Errors
///
/// Returns `Err` if a port does not parse, a range is inverted, or the list
/// exceeds what multiport accepts.
pub fn validate_dest_ports(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input == DEFAULT_DEST_PORT {
        return Ok(input.to_string());
    }
    if input.is_empty() {
        return Err("Destination port cannot be empty".to_string());
    }

    let parse = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| format!("'{p}' is not a port number (0-65535)"))
    };

    // multiport takes at most 15 slots; a range uses two
    let mut slots = 0;
    for element in input.split(',') {
        if let Some((start, end)) = element.split_once(':') {
            if parse(start)? > parse(end)? {
                return Err(format!(
                    "Range '{element}': start port must be less than or equal to end port"
                ));
            }
            slots += 2;
        } else {
            parse(element)?;
            slots += 1;
        }
    }
    if slots > 15 {
        return Err("Too many ports (multiport accepts at most 15, ranges count twice)".to_string());
    }
    Ok(input.to_string())
}

/// Validates the hashlimit mode: a non-empty comma list of bucket key fields.
///
/// # Errors
///
/// Returns `Err` naming the first unknown field.
pub fn validate_hashlimit_mode(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Hashlimit mode cannot be empty".to_string());
    }
    for field in input.split(',') {
        HashlimitField::from_str(field).map_err(|_| {
            format!(
                "Unknown hashlimit mode '{field}' (expected {})",
                choices::<HashlimitField>()
            )
        })?;
    }
    Ok(input.to_string())
}

/// Validates a pass-through value that only needs to be present.
///
/// Hashlimit rate, burst and expiry are handed to iptables verbatim; iptables
/// itself rejects malformed values.
///
/// # Errors
///
/// Returns `Err` if the value is empty or contains whitespace.
pub fn validate_non_empty(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Value cannot be empty".to_string());
    }
    if input.chars().any(char::is_whitespace) {
        return Err("Value cannot contain whitespace".to_string());
    }
    Ok(input.to_string())
}

/// Validates a log prefix.
///
/// Log prefixes appear in kernel logs and are embedded in a quoted rsyslog
/// filter, so quotes, backslashes, control characters and shell
/// metacharacters are refused. Surrounding whitespace is significant and kept.
///
/// # Errors
///
/// Returns `Err` if:
/// - Prefix is empty
/// - Prefix exceeds 29 bytes
/// - Prefix contains a forbidden character
pub fn validate_log_prefix(prefix: &str) -> Result<String, String> {
    if prefix.trim().is_empty() {
        return Err("Log prefix cannot be empty".to_string());
    }

    if prefix.len() > MAX_LOG_PREFIX_LEN {
        return Err(format!(
            "Log prefix too long (max {MAX_LOG_PREFIX_LEN} chars)"
        ));
    }

    if let Some(bad) = prefix.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | ':' | '.' | '[' | ']'))
    }) {
        return Err(format!("Log prefix contains invalid character {bad:?}"));
    }

    Ok(prefix.to_string())
}

/// Validates the source exclusion list: comma separated IPv4 addresses or CIDRs.
///
/// An empty list is allowed and disables exclusions entirely.
///
/// # Errors
///
/// Returns `Err` naming the first entry that is not an address or network.
pub fn validate_src_exclude(input: &str) -> Result<String, String> {
    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        entry
            .parse::<ipnetwork::Ipv4Network>()
            .map_err(|e| format!("Invalid IPv4 source exclusion '{entry}': {e}"))?;
    }
    Ok(input.trim().to_string())
}
