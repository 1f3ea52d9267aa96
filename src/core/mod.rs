//! Core sinkhole rule management
//!
//! This module contains the types and logic for reconciling the sinkhole's
//! iptables rules against the live firewall. It provides:
//!
//! - [`statement`]: Canonical rule text, in argv and listing form
//! - [`inspector`]: Live rule listing and classification
//! - [`engine`]: Create/delete operations for the logging and DROP rule groups
//! - [`ruleset`]: Validated rule parameters
//! - [`error`]: Error types and diagnostic translation
//! - [`lock`]: Host-wide advisory lock around whole operations

pub mod engine;
pub mod error;
pub mod inspector;
pub mod lock;
pub mod ruleset;
pub mod statement;

#[cfg(test)]
pub mod test_helpers;
