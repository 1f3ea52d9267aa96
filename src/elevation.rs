//! Privilege elevation for system operations
//!
//! nfsinkhole may be run by an unprivileged operator and elevates only the
//! commands that touch system state:
//!
//! - **iptables**: Rule listing and mutation
//! - **install / rm / ln**: Writing and removing config files and the service unit
//! - **systemctl / service / restorecon / apparmor**: Daemon restarts and labelling
//!
//! # Elevation Strategy
//!
//! - **Already root**: commands run directly, no prompt
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **CLI fallback**: `sudo` when stdin is a terminal
//! - **Headless fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `NFSINKHOLE_ELEVATION_METHOD`: Force `sudo`, `run0`, or `pkexec`.
//! - `NFSINKHOLE_IPTABLES`: Path of the iptables binary (default `iptables`).
//! - `NFSINKHOLE_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only allow-listed programs can be elevated
//! - Commands are constructed without shell interpolation

use std::io;
use std::path::Path;
use std::process::Command;

/// Programs that may be run with elevated privileges, besides iptables itself
const ELEVATABLE: &[&str] = &[
    "install",
    "rm",
    "ln",
    "systemctl",
    "service",
    "update-rc.d",
    "chkconfig",
    "restorecon",
    "/sbin/restorecon",
    "/usr/sbin/restorecon",
    "/etc/init.d/apparmor",
];

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `NFSINKHOLE_ELEVATION_METHOD`
    #[error("Invalid NFSINKHOLE_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Program is not on the elevation allow-list
    #[error("Refusing to elevate '{0}': not an allowed program")]
    NotAllowed(String),
}

/// The iptables binary to run, honouring `NFSINKHOLE_IPTABLES`
pub fn iptables_binary() -> String {
    std::env::var("NFSINKHOLE_IPTABLES")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "iptables".to_string())
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn is_allowed(program: &str) -> bool {
    if program == iptables_binary() || program == "iptables" {
        return true;
    }
    ELEVATABLE.contains(&program)
        || Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name == "iptables")
}

fn wrapped(wrapper: &str, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(wrapper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds a command that runs `program` with root privileges
///
/// # Errors
///
/// Returns `Err` if the program is not allow-listed, or the requested
/// elevation method is invalid or unavailable.
pub fn create_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    if !is_allowed(program) {
        return Err(ElevationError::NotAllowed(program.to_string()));
    }

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("NFSINKHOLE_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    // 2. Direct Root Execution (No prompt needed)
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 3. Explicit elevation method override (for scripts with sudoers NOPASSWD, etc.)
    if let Ok(method) = std::env::var("NFSINKHOLE_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0 (no SUID), fallback to sudo/pkexec
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(io::stdin().as_fd()).unwrap_or(false);
    if is_atty || !binary_exists("pkexec") {
        Ok(wrapped("sudo", program, args))
    } else {
        Ok(wrapped("pkexec", program, args))
    }
}
