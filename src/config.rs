use crate::core::error::Result;
use crate::core::ruleset::{
    DEFAULT_DEST_PORT, DEFAULT_HASHLIMIT_BURST, DEFAULT_HASHLIMIT_EXPIRE_MS,
    DEFAULT_HASHLIMIT_MODE, DEFAULT_HASHLIMIT_RATE, DEFAULT_LOG_PREFIX, DEFAULT_PROTOCOL,
    DEFAULT_SRC_EXCLUDE, RuleSetConfig,
};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persisted sinkhole settings
///
/// Every field falls back to its default when absent, so a partial file (or
/// none at all) is valid. CLI flags override these values at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Interface dedicated to sinkhole traffic
    #[serde(default)]
    pub interface: String,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_dest_port")]
    pub dest_port: String,
    #[serde(default = "default_hashlimit_rate")]
    pub hashlimit_rate: String,
    #[serde(default = "default_hashlimit_burst")]
    pub hashlimit_burst: String,
    #[serde(default = "default_hashlimit_mode")]
    pub hashlimit_mode: String,
    #[serde(default = "default_hashlimit_expire_ms")]
    pub hashlimit_expire_ms: String,
    #[serde(default = "default_src_exclude")]
    pub src_exclude: String,
    /// Capture NFLOG traffic with tcpdump from the service unit
    #[serde(default)]
    pub pcap: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: String::new(),
            log_prefix: default_log_prefix(),
            protocol: default_protocol(),
            dest_port: default_dest_port(),
            hashlimit_rate: default_hashlimit_rate(),
            hashlimit_burst: default_hashlimit_burst(),
            hashlimit_mode: default_hashlimit_mode(),
            hashlimit_expire_ms: default_hashlimit_expire_ms(),
            src_exclude: default_src_exclude(),
            pcap: false,
            log_level: default_log_level(),
        }
    }
}

fn default_log_prefix() -> String {
    DEFAULT_LOG_PREFIX.to_string()
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_dest_port() -> String {
    DEFAULT_DEST_PORT.to_string()
}

fn default_hashlimit_rate() -> String {
    DEFAULT_HASHLIMIT_RATE.to_string()
}

fn default_hashlimit_burst() -> String {
    DEFAULT_HASHLIMIT_BURST.to_string()
}

fn default_hashlimit_mode() -> String {
    DEFAULT_HASHLIMIT_MODE.to_string()
}

fn default_hashlimit_expire_ms() -> String {
    DEFAULT_HASHLIMIT_EXPIRE_MS.to_string()
}

fn default_src_exclude() -> String {
    DEFAULT_SRC_EXCLUDE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Builds and validates the rule parameters
    ///
    /// `interface_addr` is only needed for logging-rule operations.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the first invalid field.
    pub fn to_ruleset(&self, interface_addr: Option<&str>) -> Result<RuleSetConfig> {
        let mut builder = RuleSetConfig::builder(self.interface.clone())
            .log_prefix(self.log_prefix.clone())
            .protocol(self.protocol.clone())
            .dest_port(self.dest_port.clone())
            .hashlimit_rate(self.hashlimit_rate.clone())
            .hashlimit_burst(self.hashlimit_burst.clone())
            .hashlimit_mode(self.hashlimit_mode.clone())
            .hashlimit_expire_ms(self.hashlimit_expire_ms.clone())
            .src_exclude(self.src_exclude.clone());
        if let Some(addr) = interface_addr {
            builder = builder.interface_addr(addr);
        }
        builder.build()
    }
}

/// Default settings file: `$XDG_CONFIG_HOME/nfsinkhole/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Loads settings from `path`, or returns defaults if the file does not exist.
///
/// # Errors
///
/// Returns `Error::Io` if the file exists but cannot be read, and
/// `Error::Serialization` if it is not valid JSON.
pub fn load_settings(path: &Path) -> Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

/// Saves settings to disk using an atomic write pattern.
/// 1. Writes to a temporary file in the same directory (mode 0o600).
/// 2. Flushes it to physical media.
/// 3. Atomically renames it over the target path.
///
/// # Errors
///
/// Returns `Err` if the directory cannot be created or the file cannot be
/// written or renamed.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(settings)?;

    // tempfile creates the file with mode 0o600
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save settings. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.protocol, "all");
        assert_eq!(settings.log_prefix, "[nfsinkhole] ");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"interface":"eth1","pcap":true}"#).unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.interface, "eth1");
        assert!(settings.pcap);
        assert_eq!(settings.hashlimit_rate, "1/h");
        assert_eq!(settings.src_exclude, "127.0.0.1");
    }

    #[test]
    fn test_malformed_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let settings = Settings {
            interface: "eth1".to_string(),
            protocol: "tcp,udp".to_string(),
            dest_port: "0:1024".to_string(),
            ..Settings::default()
        };

        save_settings(&settings, &path).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_to_ruleset() {
        let settings = Settings {
            interface: "eth1".to_string(),
            protocol: "udp".to_string(),
            ..Settings::default()
        };
        let config = settings.to_ruleset(Some("192.0.2.10")).unwrap();
        assert_eq!(config.interface(), "eth1");
        assert_eq!(config.protocol(), "udp");
        assert!(config.interface_addr().is_some());

        let config = settings.to_ruleset(None).unwrap();
        assert!(config.interface_addr().is_none());
    }

    #[test]
    fn test_to_ruleset_requires_interface() {
        let err = Settings::default().to_ruleset(None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
