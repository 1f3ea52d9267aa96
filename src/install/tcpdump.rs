//! tcpdump capture on the NFLOG group
//!
//! tcpdump learned to print NFLOG packets in 4.5. Older versions can only
//! write raw pcap, so the capture command is picked from the installed
//! version.

use crate::command::{self, CommandRunner};
use tracing::{info, warn};

pub const TCPDUMP_PATH: &str = "/usr/sbin/tcpdump";
pub const PCAP_LOG: &str = "/var/log/nfsinkhole-pcap.log";
pub const PCAP_FILE: &str = "/var/log/nfsinkhole.pcap";

/// First version able to print NFLOG packets
const PRINT_SINCE: (u32, u32) = (4, 5);

/// How captured packets are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Decoded packets appended to [`PCAP_LOG`]
    #[default]
    Print,
    /// Raw pcap written to [`PCAP_FILE`]
    Raw,
}

impl CaptureMode {
    /// Shell command line running the capture in the foreground
    pub fn command_line(self) -> String {
        match self {
            CaptureMode::Print => {
                format!("{TCPDUMP_PATH} -nnlttttvvXXs 0 -i nflog >> {PCAP_LOG} 2>&1")
            }
            CaptureMode::Raw => {
                format!("{TCPDUMP_PATH} -UnnttttvvXXs 0 -i nflog -w {PCAP_FILE} > /dev/null 2>&1")
            }
        }
    }
}

/// Extracts `(major, minor)` from tcpdump's banner
pub fn parse_version(output: &str) -> Option<(u32, u32)> {
    let rest = output.split("tcpdump version ").nth(1)?;
    let mut numbers = rest.split(|c: char| !c.is_ascii_digit());
    let major = numbers.next()?.parse().ok()?;
    let minor = numbers.next()?.parse().ok()?;
    Some((major, minor))
}

/// Picks the capture mode supported by the installed tcpdump
///
/// An unknown or missing tcpdump falls back to raw capture.
pub fn detect_capture_mode<R: CommandRunner + ?Sized>(runner: &R) -> CaptureMode {
    info!("Checking tcpdump/nflog packet printing support");
    let argv = vec![TCPDUMP_PATH.to_string(), "-h".to_string()];
    // The banner goes to stderr, and -h exits non-zero on some versions
    let version = command::run_checked(runner, &argv, false, false)
        .ok()
        .and_then(|out| {
            parse_version(&out.stderr_text()).or_else(|| parse_version(&out.stdout_text()))
        });

    match version {
        Some(version) if version >= PRINT_SINCE => {
            info!("tcpdump {}.{} prints NFLOG packets", version.0, version.1);
            CaptureMode::Print
        }
        Some(version) => {
            warn!(
                "tcpdump {}.{} cannot print NFLOG packets, capturing raw to {PCAP_FILE}. Consider upgrading tcpdump",
                version.0, version.1
            );
            CaptureMode::Raw
        }
        None => {
            warn!("tcpdump version not found, capturing raw to {PCAP_FILE}");
            CaptureMode::Raw
        }
    }
}
