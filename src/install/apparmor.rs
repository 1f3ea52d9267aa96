//! AppArmor profile toggling
//!
//! The stock tcpdump profile denies access to the NFLOG netlink group, so
//! packet capture disables it for the lifetime of the install.

use super::{AccessControl, run_lenient};
use crate::command::CommandRunner;
use crate::core::error::Result;
use std::path::PathBuf;
use tracing::{debug, error};

pub const PROFILE_DIR: &str = "/etc/apparmor.d";
const INIT_SCRIPT: &str = "/etc/init.d/apparmor";

pub struct AppArmor<R: CommandRunner> {
    runner: R,
    profile_dir: PathBuf,
}

impl<R: CommandRunner> AppArmor<R> {
    /// AppArmor with the system profile directory
    pub fn system(runner: R) -> Self {
        Self::new(runner, PathBuf::from(PROFILE_DIR))
    }

    pub fn new(runner: R, profile_dir: PathBuf) -> Self {
        Self {
            runner,
            profile_dir,
        }
    }

    fn restart(&self) {
        debug!("Restarting AppArmor service");
        run_lenient(&self.runner, &[INIT_SCRIPT, "restart"]);
    }
}

impl<R: CommandRunner> AccessControl for AppArmor<R> {
    fn exists(&self) -> bool {
        self.profile_dir.is_dir()
    }

    fn disable_enforcement(&self, module: &str) -> Result<()> {
        if !self.exists() {
            error!("AppArmor was not found");
            return Ok(());
        }
        let profile = self.profile_dir.join(module).display().to_string();
        let disable_dir = format!("{}/", self.profile_dir.join("disable").display());
        run_lenient(&self.runner, &["ln", "-s", &profile, &disable_dir]);
        self.restart();
        Ok(())
    }

    fn enable_enforcement(&self, module: &str) -> Result<()> {
        if !self.exists() {
            error!("AppArmor was not found");
            return Ok(());
        }
        let link = self
            .profile_dir
            .join("disable")
            .join(module)
            .display()
            .to_string();
        run_lenient(&self.runner, &["rm", "-f", &link]);
        self.restart();
        Ok(())
    }
}
