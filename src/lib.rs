//! nfsinkhole - iptables sinkhole for a dedicated network interface
//!
//! All traffic on the sinkhole interface is dropped at the firewall while a
//! rate-limited sample of it is logged (LOG) and handed to packet capture
//! (NFLOG).
//!
//! # Architecture
//!
//! - [`core`] - Rule reconciliation engine, live rule inspection, canonical rule text
//! - [`command`] - External command execution behind the `CommandRunner` seam
//! - [`elevation`] - Privilege escalation for iptables and installer commands
//! - [`install`] - Log daemon, AppArmor and boot service installation
//! - [`audit`] - Audit logging for every firewall-changing operation
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Settings persistence
//! - [`utils`] - XDG directories and interface lookup
//!
//! # Safety Features
//!
//! - Self-recognition by exact rule text; foreign rules are never touched
//! - Create refuses if any sinkhole rule already exists
//! - DROP rules first on install, last on uninstall
//! - Host-wide advisory lock around whole operations
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod command;
pub mod config;
pub mod core;
pub mod elevation;
pub mod install;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::engine::ReconciliationEngine;
pub use core::error::{Error, Result};
pub use core::inspector::{ExistingRule, FilterMode, RuleKind};
pub use core::ruleset::RuleSetConfig;
