//! Audit logging for firewall-changing operations
//!
//! Every reconciliation and install step is appended as one JSON object per
//! line. A failed audit write is reported with `warn!` and never fails the
//! operation it describes.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CreateLoggingRules,
    CreateDropRules,
    DeleteLoggingRules,
    DeleteDropRules,
    Install,
    Uninstall,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log at `$NFSINKHOLE_AUDIT_LOG`, or `audit.log` in the
    /// state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if no override is set and the state directory cannot be
    /// determined or created
    pub fn new() -> std::io::Result<Self> {
        if let Some(path) = std::env::var_os("NFSINKHOLE_AUDIT_LOG").filter(|p| !p.is_empty()) {
            return Ok(Self::at(path));
        }

        crate::utils::ensure_dirs()?;
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Audit log at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut json = serde_json::to_string(event)?;
        json.push('\n');

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.log_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        Ok(content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

fn record(event_type: EventType, details: serde_json::Value, error: Option<String>) {
    let event = AuditEvent::new(event_type, error.is_none(), details, error);
    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit.log(&event) {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit log unavailable: {}", e),
    }
}

/// Logs creation of the logging chain and dispatch rule
pub fn log_create_logging(interface: &str, error: Option<String>) {
    record(
        EventType::CreateLoggingRules,
        serde_json::json!({ "interface": interface }),
        error,
    );
}

/// Logs creation of the interface DROP rules
pub fn log_create_drop(interface: &str, error: Option<String>) {
    record(
        EventType::CreateDropRules,
        serde_json::json!({ "interface": interface }),
        error,
    );
}

/// Logs removal of the logging rules
///
/// # Arguments
///
/// * `removed` - Number of sinkhole lines found before deletion
pub fn log_delete_logging(interface: &str, removed: Option<usize>, error: Option<String>) {
    record(
        EventType::DeleteLoggingRules,
        serde_json::json!({ "interface": interface, "removed": removed }),
        error,
    );
}

/// Logs removal of the interface DROP rules
pub fn log_delete_drop(interface: &str, removed: Option<usize>, error: Option<String>) {
    record(
        EventType::DeleteDropRules,
        serde_json::json!({ "interface": interface, "removed": removed }),
        error,
    );
}

/// Logs a full service installation
pub fn log_install(interface: &str, pcap: bool, error: Option<String>) {
    record(
        EventType::Install,
        serde_json::json!({ "interface": interface, "pcap": pcap }),
        error,
    );
}

/// Logs a full service removal
pub fn log_uninstall(interface: &str, error: Option<String>) {
    record(
        EventType::Uninstall,
        serde_json::json!({ "interface": interface }),
        error,
    );
}
