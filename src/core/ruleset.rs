//! Rule-set parameters
//!
//! [`RuleSetConfig`] captures every user-chosen value that ends up in generated
//! rule text. It is immutable once built and validated; the engine never
//! re-checks fields.

use crate::core::error::{Error, Result};
use crate::validators;
use std::net::Ipv4Addr;

pub const DEFAULT_LOG_PREFIX: &str = "[nfsinkhole] ";
pub const DEFAULT_PROTOCOL: &str = "all";
pub const DEFAULT_DEST_PORT: &str = "0:65535";
pub const DEFAULT_HASHLIMIT_RATE: &str = "1/h";
pub const DEFAULT_HASHLIMIT_BURST: &str = "1";
pub const DEFAULT_HASHLIMIT_MODE: &str = "srcip,dstip,dstport";
pub const DEFAULT_HASHLIMIT_EXPIRE_MS: &str = "3600000";
pub const DEFAULT_SRC_EXCLUDE: &str = "127.0.0.1";

/// Protocols accepted by the dispatch rule's multiport match
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Udplite,
    Icmp,
    Esp,
    Ah,
    Sctp,
}

/// Key fields a hashlimit bucket can be built from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum HashlimitField {
    Srcip,
    Srcport,
    Dstip,
    Dstport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSetConfig {
    interface: String,
    interface_addr: Option<Ipv4Addr>,
    log_prefix: String,
    protocol: String,
    dest_port: String,
    hashlimit_rate: String,
    hashlimit_burst: String,
    hashlimit_expire_ms: String,
    hashlimit_mode: String,
    src_exclude: String,
}

impl RuleSetConfig {
    /// Starts a builder for the monitored interface, with all other fields at
    /// their defaults
    pub fn builder(interface: impl Into<String>) -> RuleSetConfigBuilder {
        RuleSetConfigBuilder {
            interface: interface.into(),
            interface_addr: None,
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            dest_port: DEFAULT_DEST_PORT.to_string(),
            hashlimit_rate: DEFAULT_HASHLIMIT_RATE.to_string(),
            hashlimit_burst: DEFAULT_HASHLIMIT_BURST.to_string(),
            hashlimit_expire_ms: DEFAULT_HASHLIMIT_EXPIRE_MS.to_string(),
            hashlimit_mode: DEFAULT_HASHLIMIT_MODE.to_string(),
            src_exclude: DEFAULT_SRC_EXCLUDE.to_string(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn interface_addr(&self) -> Option<Ipv4Addr> {
        self.interface_addr
    }

    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn dest_port(&self) -> &str {
        &self.dest_port
    }

    pub fn hashlimit_rate(&self) -> &str {
        &self.hashlimit_rate
    }

    pub fn hashlimit_burst(&self) -> &str {
        &self.hashlimit_burst
    }

    pub fn hashlimit_expire_ms(&self) -> &str {
        &self.hashlimit_expire_ms
    }

    pub fn hashlimit_mode(&self) -> &str {
        &self.hashlimit_mode
    }

    pub fn src_exclude(&self) -> &str {
        &self.src_exclude
    }

    /// Source exclusions in the order given, trimmed, empties dropped
    pub fn src_exclusions(&self) -> Vec<&str> {
        self.src_exclude
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// True when logging is restricted to a protocol list
    pub fn protocol_restricted(&self) -> bool {
        self.protocol != DEFAULT_PROTOCOL
    }

    /// True when a protocol restriction also narrows destination ports
    pub fn port_restricted(&self) -> bool {
        self.protocol_restricted() && self.dest_port != DEFAULT_DEST_PORT
    }
}

/// Builder for [`RuleSetConfig`]; `build()` validates every field
#[derive(Debug, Clone)]
pub struct RuleSetConfigBuilder {
    interface: String,
    interface_addr: Option<String>,
    log_prefix: String,
    protocol: String,
    dest_port: String,
    hashlimit_rate: String,
    hashlimit_burst: String,
    hashlimit_expire_ms: String,
    hashlimit_mode: String,
    src_exclude: String,
}

impl RuleSetConfigBuilder {
    pub fn interface_addr(mut self, addr: impl Into<String>) -> Self {
        self.interface_addr = Some(addr.into());
        self
    }

    pub fn log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn dest_port(mut self, dest_port: impl Into<String>) -> Self {
        self.dest_port = dest_port.into();
        self
    }

    pub fn hashlimit_rate(mut self, rate: impl Into<String>) -> Self {
        self.hashlimit_rate = rate.into();
        self
    }

    pub fn hashlimit_burst(mut self, burst: impl Into<String>) -> Self {
        self.hashlimit_burst = burst.into();
        self
    }

    pub fn hashlimit_expire_ms(mut self, expire: impl Into<String>) -> Self {
        self.hashlimit_expire_ms = expire.into();
        self
    }

    pub fn hashlimit_mode(mut self, mode: impl Into<String>) -> Self {
        self.hashlimit_mode = mode.into();
        self
    }

    pub fn src_exclude(mut self, exclude: impl Into<String>) -> Self {
        self.src_exclude = exclude.into();
        self
    }

    /// Validates all fields and freezes the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the first invalid field.
    pub fn build(self) -> Result<RuleSetConfig> {
        let check = |field: &str, r: std::result::Result<String, String>| {
            r.map_err(|message| Error::validation(field, message))
        };

        if self.interface.is_empty() {
            return Err(Error::validation("interface", "Interface is required"));
        }
        let interface = check("interface", validators::validate_interface(&self.interface))?;

        let interface_addr = self
            .interface_addr
            .as_deref()
            .map(|addr| {
                validators::validate_ipv4(addr).map_err(|m| Error::validation("interface_addr", m))
            })
            .transpose()?;

        Ok(RuleSetConfig {
            interface,
            interface_addr,
            log_prefix: check("log_prefix", validators::validate_log_prefix(&self.log_prefix))?,
            protocol: check("protocol", validators::validate_protocols(&self.protocol))?,
            dest_port: check("dest_port", validators::validate_dest_ports(&self.dest_port))?,
            hashlimit_rate: check(
                "hashlimit_rate",
                validators::validate_non_empty(&self.hashlimit_rate),
            )?,
            hashlimit_burst: check(
                "hashlimit_burst",
                validators::validate_non_empty(&self.hashlimit_burst),
            )?,
            hashlimit_expire_ms: check(
                "hashlimit_expire_ms",
                validators::validate_non_empty(&self.hashlimit_expire_ms),
            )?,
            hashlimit_mode: check(
                "hashlimit_mode",
                validators::validate_hashlimit_mode(&self.hashlimit_mode),
            )?,
            src_exclude: check(
                "src_exclude",
                validators::validate_src_exclude(&self.src_exclude),
            )?,
        })
    }
}
