//! Utility functions for directory management and interface lookup
//!
//! Directories follow the XDG Base Directory specification:
//!
//! - Config: `~/.config/nfsinkhole/` - Persisted rule settings
//! - State: `~/.local/state/nfsinkhole/` - Audit log
//!
//! # Example
//!
//! ```no_run
//! use nfsinkhole::utils::{ensure_dirs, get_config_dir};
//!
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(config_path) = get_config_dir() {
//!     // Load settings from config_path
//! }
//! ```

use directories::ProjectDirs;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "nfsinkhole")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_config_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}

/// Names of all network interfaces except loopback, sorted
pub fn list_interfaces() -> Vec<String> {
    let mut interfaces: Vec<String> = NetworkInterface::show()
        .unwrap_or_default()
        .into_iter()
        .map(|iface| iface.name)
        .filter(|name| name != "lo")
        .collect();
    interfaces.sort();
    interfaces.dedup();
    interfaces
}

/// First IPv4 address bound to `name`
///
/// # Errors
///
/// Returns `Err` if interfaces cannot be enumerated, the interface does not
/// exist, or it carries no IPv4 address.
pub fn interface_ipv4(name: &str) -> Result<Ipv4Addr, String> {
    let interfaces =
        NetworkInterface::show().map_err(|e| format!("Cannot enumerate interfaces: {e}"))?;

    let mut seen = false;
    for iface in interfaces.iter().filter(|i| i.name == name) {
        seen = true;
        if let Some(ip) = iface.addr.iter().find_map(|addr| match addr {
            Addr::V4(v4) => Some(v4.ip),
            Addr::V6(_) => None,
        }) {
            return Ok(ip);
        }
    }

    if seen {
        Err(format!("Interface {name} has no IPv4 address"))
    } else {
        let available = list_interfaces();
        if available.is_empty() {
            Err(format!("Interface {name} not found"))
        } else {
            Err(format!(
                "Interface {name} not found (available: {})",
                available.join(", ")
            ))
        }
    }
}
