//! Host installation of the sinkhole service
//!
//! The [`Installer`] sequences the reconciliation engine with the host
//! collaborators (log daemon, mandatory access control, service unit). The
//! interface DROP rules go in first and come out last, so the monitored
//! interface never passes traffic while anything else is being configured.
//!
//! Collaborators run their commands leniently: a failing `systemctl` or
//! `restorecon` is logged and the procedure carries on. Only local file
//! errors and firewall errors stop it.

pub mod apparmor;
pub mod rsyslog;
pub mod service;
pub mod tcpdump;

use crate::command::{self, CommandRunner};
use crate::core::engine::ReconciliationEngine;
use crate::core::error::Result;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub use apparmor::AppArmor;
pub use rsyslog::Rsyslog;
pub use service::{InitdService, ServiceParams, SystemdService};
pub use tcpdump::CaptureMode;

/// AppArmor profile that keeps tcpdump from reading the NFLOG group
pub const TCPDUMP_PROFILE: &str = "usr.sbin.tcpdump";

/// Routes sinkhole log lines into their own file
pub trait LogDaemon {
    fn name(&self) -> &'static str;
    fn create_config(&self, prefix: &str) -> Result<()>;
    fn delete_config(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
}

/// Mandatory access control toggling for a single profile
pub trait AccessControl {
    fn exists(&self) -> bool;
    fn enable_enforcement(&self, module: &str) -> Result<()>;
    fn disable_enforcement(&self, module: &str) -> Result<()>;
}

/// Process supervision unit that applies the rules at boot
pub trait ServiceUnit {
    fn create_service(&self) -> Result<()>;
    fn delete_service(&self) -> Result<()>;
}

/// Sequences a full install or uninstall
pub struct Installer<'a, R: CommandRunner> {
    engine: &'a ReconciliationEngine<R>,
    pcap: bool,
    log_daemon: Option<&'a dyn LogDaemon>,
    access_control: Option<&'a dyn AccessControl>,
    service: Option<&'a dyn ServiceUnit>,
}

impl<'a, R: CommandRunner> Installer<'a, R> {
    pub fn new(engine: &'a ReconciliationEngine<R>, pcap: bool) -> Self {
        Self {
            engine,
            pcap,
            log_daemon: None,
            access_control: None,
            service: None,
        }
    }

    pub fn log_daemon(mut self, daemon: Option<&'a dyn LogDaemon>) -> Self {
        self.log_daemon = daemon;
        self
    }

    pub fn access_control(mut self, mac: Option<&'a dyn AccessControl>) -> Self {
        self.access_control = mac;
        self
    }

    pub fn service(mut self, unit: Option<&'a dyn ServiceUnit>) -> Self {
        self.service = unit;
        self
    }

    fn tcpdump_profile_applies(&self) -> bool {
        self.pcap && self.access_control.is_some_and(|mac| mac.exists())
    }

    /// Drop rules, then AppArmor, log daemon and service unit
    ///
    /// Existing DROP rules are accepted as already installed.
    ///
    /// # Errors
    ///
    /// Returns `Err` on firewall failures or if a config file cannot be
    /// written locally.
    pub fn install(&self) -> Result<()> {
        let interface = self.engine.config().interface();
        info!("Creating iptables DROP rules for interface {interface}");
        match self.engine.create_drop_rules() {
            Ok(()) => {}
            Err(e) if e.is_precondition() => info!("DROP rules already present: {e}"),
            Err(e) => return Err(e),
        }

        if self.tcpdump_profile_applies()
            && let Some(mac) = self.access_control
        {
            info!("AppArmor found and pcap enabled, disabling enforcement for {TCPDUMP_PROFILE}");
            mac.disable_enforcement(TCPDUMP_PROFILE)?;
        }

        if let Some(daemon) = self.log_daemon {
            info!("Writing {} config", daemon.name());
            daemon.create_config(self.engine.config().log_prefix())?;
            info!("Restarting {}", daemon.name());
            daemon.restart()?;
        } else {
            warn!("No supported log daemon found, sinkhole events stay in the kernel log");
        }

        if let Some(unit) = self.service {
            info!("Generating and writing nfsinkhole service");
            unit.create_service()?;
        } else {
            warn!("No service unit given, sinkhole rules will not return after a reboot");
        }

        Ok(())
    }

    /// Reverse of [`install`](Self::install); DROP rules are removed last
    ///
    /// Missing DROP rules are accepted as already removed.
    ///
    /// # Errors
    ///
    /// Returns `Err` on firewall failures or local file errors.
    pub fn uninstall(&self) -> Result<()> {
        if self.tcpdump_profile_applies()
            && let Some(mac) = self.access_control
        {
            info!("AppArmor found and pcap enabled, enabling enforcement for {TCPDUMP_PROFILE}");
            mac.enable_enforcement(TCPDUMP_PROFILE)?;
        }

        if let Some(daemon) = self.log_daemon {
            info!("Deleting {} config", daemon.name());
            daemon.delete_config()?;
            info!("Restarting {}", daemon.name());
            daemon.restart()?;
        }

        if let Some(unit) = self.service {
            info!("Deleting nfsinkhole service");
            unit.delete_service()?;
        }

        let interface = self.engine.config().interface();
        info!("Deleting iptables DROP rules for interface {interface}");
        match self.engine.delete_drop_rules() {
            Ok(count) => info!("Removed {count} DROP rule(s)"),
            Err(e) if e.is_precondition() => info!("No DROP rules to remove: {e}"),
            Err(e) => return Err(e),
        }

        Ok(())
    }
}

/// Runs an elevated command, logging instead of failing
///
/// Returns whether the command ran and exited zero.
pub(crate) fn run_lenient<R: CommandRunner + ?Sized>(runner: &R, argv: &[&str]) -> bool {
    let argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
    match command::run_checked(runner, &argv, true, false) {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!(
                "`{}` exited with status {:?}",
                command::render(&argv),
                output.exit_code
            );
            false
        }
        Err(e) => {
            warn!("{e}");
            false
        }
    }
}

/// Installs `contents` at `dest` with root ownership via `install(1)`
///
/// The content is staged in a private temporary file first, so the
/// privileged step never has to write user data itself.
///
/// # Errors
///
/// Returns `Err` only if the temporary file cannot be written.
pub(crate) fn install_file<R: CommandRunner + ?Sized>(
    runner: &R,
    contents: &str,
    dest: &Path,
    mode: &str,
) -> Result<bool> {
    let mut staged = tempfile::NamedTempFile::new()?;
    staged.write_all(contents.as_bytes())?;
    staged.as_file().sync_all()?;

    let source = staged.path().display().to_string();
    let dest = dest.display().to_string();
    Ok(run_lenient(
        runner,
        &[
            "install", "-m", mode, "-o", "root", "-g", "root", &source, &dest,
        ],
    ))
}
