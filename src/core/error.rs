use thiserror::Error;

/// Core error types for nfsinkhole
#[derive(Debug, Error)]
pub enum Error {
    /// Sinkhole rules were found where a create operation expected none
    #[error("Existing iptables rules found for nfsinkhole (checked with `{command}`):\n{joined}", joined = lines.join("\n"))]
    RulesAlreadyExist { command: String, lines: Vec<String> },

    /// A delete operation found nothing to remove
    #[error("No existing nfsinkhole rules found (checked with `{command}`)")]
    RulesNotExist { command: String },

    /// An external command could not run or reported a diagnostic
    #[error("Command `{command}` failed: {diagnostic}")]
    RunFailure {
        command: String,
        diagnostic: String,
        exit_code: Option<i32>,
    },

    /// The rule listing itself failed; later decisions cannot be trusted
    #[error("Rule listing `{command}` failed: {diagnostic}")]
    QueryFailure { command: String, diagnostic: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Host lock could not be taken
    #[error("Lock error on {path}: {message}")]
    Lock { path: String, message: String },
}

impl Error {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True for `RulesAlreadyExist` / `RulesNotExist`.
    ///
    /// These are expected during idempotent "ensure installed/removed" runs and
    /// may be discarded by the caller. Everything else must propagate.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::RulesAlreadyExist { .. } | Error::RulesNotExist { .. }
        )
    }

    /// Diagnostic text captured from the failing command, if any
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Error::RunFailure { diagnostic, .. } | Error::QueryFailure { diagnostic, .. } => {
                Some(diagnostic)
            }
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of iptables diagnostic patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches a diagnostic against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("you must be root")
            || lower.contains("operation not permitted")
        {
            return ErrorTranslation::new("Insufficient permissions to modify iptables rules")
                .with_suggestion("Run as root, or make sure sudo/run0/pkexec is available")
                .with_suggestion("Force a method with NFSINKHOLE_ELEVATION_METHOD=sudo")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or point NFSINKHOLE_IPTABLES at the binary");
        }

        if lower.contains("chain already exists") {
            return ErrorTranslation::new("The SINKHOLE chain already exists")
                .with_suggestion("Another process may have created it since the last check")
                .with_suggestion("Remove the leftover rules: nfsinkhole stop")
                .with_suggestion("Inspect the current state: nfsinkhole status");
        }

        if lower.contains("another app is currently holding the xtables lock")
            || lower.contains("resource temporarily unavailable")
        {
            return ErrorTranslation::new("iptables is busy (xtables lock held)")
                .with_suggestion("Another process is modifying the firewall")
                .with_suggestion("Wait a moment and try again");
        }

        if lower.contains("couldn't load match") || lower.contains("couldn't load target") {
            return ErrorTranslation::new("A required iptables extension is not available")
                .with_suggestion("The sinkhole needs the hashlimit, multiport and NFLOG extensions")
                .with_suggestion("Check kernel modules: lsmod | grep -E 'xt_hashlimit|xt_multiport|nfnetlink_log'");
        }

        if lower.contains("bad rule") {
            return ErrorTranslation::new("Rule to delete no longer exists")
                .with_suggestion("The firewall changed between inspection and deletion")
                .with_suggestion("Re-run the operation to re-inspect the live rules");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match not found")
                .with_suggestion("The SINKHOLE chain may have been removed by another process")
                .with_suggestion("Check that the NFLOG and LOG targets are supported by the kernel");
        }

        if lower.contains("host/network") && lower.contains("not found") {
            return ErrorTranslation::new("Invalid source exclusion address")
                .with_suggestion("Use addresses or CIDRs: 127.0.0.1,10.0.0.0/8");
        }

        if lower.contains("invalid port") || lower.contains("port range") {
            return ErrorTranslation::new("Invalid destination port specification")
                .with_suggestion("Use start:end (0:1024) or a comma list (22,80,443)");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -S")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
