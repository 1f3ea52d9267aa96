//! Boot-time service for the sinkhole
//!
//! The service re-applies the logging rules at boot, removes them on stop
//! and, with packet capture enabled, runs tcpdump on the NFLOG group. On
//! systemd hosts this is a unit file; elsewhere it is a SysV init script.

use super::tcpdump::CaptureMode;
use super::{ServiceUnit, install_file, run_lenient};
use crate::command::CommandRunner;
use crate::config::Settings;
use crate::core::error::Result;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "nfsinkhole";
pub const UNIT_NAME: &str = "nfsinkhole.service";
pub const UNIT_PATH: &str = "/etc/systemd/system/nfsinkhole.service";
pub const INITD_PATH: &str = "/etc/init.d/nfsinkhole";
pub const PID_FILE: &str = "/run/nfsinkhole-tcpdump.pid";

/// True when the host was booted with systemd
pub fn is_systemd() -> bool {
    Path::new("/run/systemd/system").is_dir()
}

/// What the service runs
#[derive(Debug, Clone)]
pub struct ServiceParams {
    /// Absolute path of the nfsinkhole binary
    pub exe: PathBuf,
    pub settings: Settings,
    /// Ignored unless `settings.pcap` is set
    pub capture: CaptureMode,
}

impl ServiceParams {
    fn rule_args(&self) -> Vec<String> {
        let s = &self.settings;
        [
            ("--interface", &s.interface),
            ("--protocol", &s.protocol),
            ("--dport", &s.dest_port),
            ("--prefix", &s.log_prefix),
            ("--hashlimit", &s.hashlimit_rate),
            ("--hashlimit-mode", &s.hashlimit_mode),
            ("--hashlimit-burst", &s.hashlimit_burst),
            ("--hashlimit-expire", &s.hashlimit_expire_ms),
            ("--src-exclude", &s.src_exclude),
            ("--log-level", &s.log_level),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.clone()])
        .collect()
    }

    fn command_line(&self, subcommand: &str, quote: fn(&str) -> String) -> String {
        let mut line = format!("{} {subcommand}", quote(&self.exe.display().to_string()));
        for arg in self.rule_args() {
            line.push(' ');
            line.push_str(&quote(&arg));
        }
        line
    }
}

/// Quotes one argument for an `Exec*=` line
///
/// `%` and `$` are doubled so systemd does not expand them as specifiers or
/// environment variables.
pub fn systemd_quote(arg: &str) -> String {
    let escaped = arg.replace('%', "%%").replace('$', "$$");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return escaped;
    }

    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for c in escaped.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quotes one argument for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | ','));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Renders the systemd unit file
pub fn render_unit(params: &ServiceParams) -> String {
    let mut unit = String::from(
        "[Unit]\n\
         Description=Service for nfsinkhole\n\
         After=network-online.target iptables.service\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n",
    );

    if params.settings.pcap {
        unit.push_str("Type=simple\n");
    } else {
        unit.push_str("Type=oneshot\nRemainAfterExit=yes\n");
    }

    let _ = writeln!(
        unit,
        "ExecStartPre=-{}",
        params.command_line("start", systemd_quote)
    );
    if params.settings.pcap {
        let _ = writeln!(
            unit,
            "ExecStart=/bin/sh -c '{}'",
            params.capture.command_line()
        );
    } else {
        unit.push_str("ExecStart=/bin/true\n");
    }
    let _ = writeln!(unit, "ExecStop=-{}", params.command_line("stop", systemd_quote));

    unit.push_str(
        "User=root\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
    );
    unit
}

/// Renders the SysV init script
pub fn render_init_script(params: &ServiceParams) -> String {
    let mut script = String::from(
        "#!/bin/sh\n\
         ### BEGIN INIT INFO\n\
         # Provides:          nfsinkhole\n\
         # Required-Start:    $network $syslog\n\
         # Required-Stop:     $network $syslog\n\
         # Default-Start:     2 3 4 5\n\
         # Default-Stop:      0 1 6\n\
         # Short-Description: Service for nfsinkhole\n\
         ### END INIT INFO\n\
         # chkconfig: 2345 20 80\n\
         # description: Service for nfsinkhole\n\
         \n",
    );
    let _ = writeln!(script, "PIDFILE={PID_FILE}\n");

    script.push_str("start() {\n");
    let _ = writeln!(script, "    {}", params.command_line("start", shell_quote));
    if params.settings.pcap {
        let _ = writeln!(script, "    {} &", params.capture.command_line());
        script.push_str("    echo $! > \"$PIDFILE\"\n");
    }
    script.push_str("}\n\nstop() {\n");
    if params.settings.pcap {
        script.push_str(
            "    if [ -f \"$PIDFILE\" ]; then\n\
             \x20       kill \"$(cat \"$PIDFILE\")\" 2>/dev/null\n\
             \x20       rm -f \"$PIDFILE\"\n\
             \x20   fi\n",
        );
    }
    let _ = writeln!(script, "    {}", params.command_line("stop", shell_quote));
    script.push_str("}\n\n");

    script.push_str("case \"$1\" in\n");
    script.push_str("    start)\n        start\n        ;;\n");
    script.push_str("    stop)\n        stop\n        ;;\n");
    script.push_str("    restart)\n        stop\n        start\n        ;;\n");
    let _ = writeln!(
        script,
        "    status)\n        {}\n        ;;",
        params.command_line("status", shell_quote)
    );
    script.push_str(
        "    *)\n\
         \x20       echo \"Usage: $0 {start|stop|status|restart}\"\n\
         \x20       exit 1\n\
         esac\n\
         exit 0\n",
    );
    script
}

pub struct SystemdService<R: CommandRunner> {
    runner: R,
    params: ServiceParams,
    unit_path: PathBuf,
}

impl<R: CommandRunner> SystemdService<R> {
    pub fn new(runner: R, params: ServiceParams, unit_path: PathBuf) -> Self {
        Self {
            runner,
            params,
            unit_path,
        }
    }
}

impl<R: CommandRunner> ServiceUnit for SystemdService<R> {
    fn create_service(&self) -> Result<()> {
        install_file(&self.runner, &render_unit(&self.params), &self.unit_path, "644")?;
        run_lenient(&self.runner, &["systemctl", "daemon-reload"]);
        run_lenient(&self.runner, &["systemctl", "enable", UNIT_NAME]);
        Ok(())
    }

    fn delete_service(&self) -> Result<()> {
        let path = self.unit_path.display().to_string();
        run_lenient(&self.runner, &["systemctl", "disable", UNIT_NAME]);
        run_lenient(&self.runner, &["rm", "-f", &path]);
        run_lenient(&self.runner, &["systemctl", "daemon-reload"]);
        Ok(())
    }
}

/// SysV init script, registered with `update-rc.d` or `chkconfig`
pub struct InitdService<R: CommandRunner> {
    runner: R,
    params: ServiceParams,
    script_path: PathBuf,
}

impl<R: CommandRunner> InitdService<R> {
    pub fn new(runner: R, params: ServiceParams, script_path: PathBuf) -> Self {
        Self {
            runner,
            params,
            script_path,
        }
    }
}

impl<R: CommandRunner> ServiceUnit for InitdService<R> {
    fn create_service(&self) -> Result<()> {
        let script = render_init_script(&self.params);
        install_file(&self.runner, &script, &self.script_path, "755")?;
        // Debian family first, then Red Hat family
        if !run_lenient(&self.runner, &["update-rc.d", SERVICE_NAME, "defaults"]) {
            run_lenient(&self.runner, &["chkconfig", "--add", SERVICE_NAME]);
        }
        Ok(())
    }

    fn delete_service(&self) -> Result<()> {
        let path = self.script_path.display().to_string();
        if !run_lenient(&self.runner, &["update-rc.d", "-f", SERVICE_NAME, "remove"]) {
            run_lenient(&self.runner, &["chkconfig", "--del", SERVICE_NAME]);
        }
        run_lenient(&self.runner, &["rm", "-f", &path]);
        Ok(())
    }
}

/// The unit matching the host's init system
pub fn for_host<R: CommandRunner + 'static>(
    runner: R,
    params: ServiceParams,
) -> Box<dyn ServiceUnit> {
    if is_systemd() {
        Box::new(SystemdService::new(runner, params, PathBuf::from(UNIT_PATH)))
    } else {
        Box::new(InitdService::new(runner, params, PathBuf::from(INITD_PATH)))
    }
}
