//! rsyslog routing for sinkhole events
//!
//! A single property-based filter sends every kernel line carrying the LOG
//! prefix to `/var/log/nfsinkhole-events.log`.

use super::{LogDaemon, install_file, run_lenient};
use crate::command::CommandRunner;
use crate::core::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_PATH: &str = "/etc/rsyslog.d/nfsinkhole.conf";
pub const EVENTS_LOG: &str = "/var/log/nfsinkhole-events.log";

const RSYSLOGD_PATHS: [&str; 2] = ["/usr/sbin/rsyslogd", "/sbin/rsyslogd"];
const RESTORECON_PATHS: [&str; 2] = ["/sbin/restorecon", "/usr/sbin/restorecon"];

pub struct Rsyslog<R: CommandRunner> {
    runner: R,
    systemd: bool,
    config_path: PathBuf,
    restorecon: Option<&'static str>,
}

impl<R: CommandRunner> Rsyslog<R> {
    /// Returns `None` when rsyslogd is not installed
    pub fn detect(runner: R, systemd: bool) -> Option<Self> {
        if !RSYSLOGD_PATHS.iter().any(|p| Path::new(p).exists()) {
            debug!("rsyslogd not found");
            return None;
        }
        let restorecon = RESTORECON_PATHS
            .iter()
            .copied()
            .find(|p| Path::new(p).exists());
        Some(Self::new(runner, systemd, PathBuf::from(CONFIG_PATH), restorecon))
    }

    pub fn new(
        runner: R,
        systemd: bool,
        config_path: PathBuf,
        restorecon: Option<&'static str>,
    ) -> Self {
        Self {
            runner,
            systemd,
            config_path,
            restorecon,
        }
    }
}

/// The filter line written to the rsyslog drop-in
pub fn render_config(prefix: &str) -> String {
    format!(":msg,contains,\"{prefix}\" {EVENTS_LOG}\n")
}

impl<R: CommandRunner> LogDaemon for Rsyslog<R> {
    fn name(&self) -> &'static str {
        "rsyslog"
    }

    fn create_config(&self, prefix: &str) -> Result<()> {
        debug!("Writing {}", self.config_path.display());
        install_file(&self.runner, &render_config(prefix), &self.config_path, "644")?;

        if let Some(restorecon) = self.restorecon {
            info!("Associating {} with SELinux", self.config_path.display());
            let path = self.config_path.display().to_string();
            run_lenient(&self.runner, &[restorecon, "-v", &path]);
        } else {
            debug!("SELinux not found, skipping association");
        }
        Ok(())
    }

    fn delete_config(&self) -> Result<()> {
        let path = self.config_path.display().to_string();
        run_lenient(&self.runner, &["rm", "-f", &path]);
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        if self.systemd {
            run_lenient(&self.runner, &["systemctl", "restart", "rsyslog.service"]);
        } else {
            run_lenient(&self.runner, &["service", "rsyslog", "restart"]);
        }
        Ok(())
    }
}
