//! nfsinkhole - iptables sinkhole for a dedicated network interface
//!
//! # Usage
//!
//! ```bash
//! nfsinkhole --interface eth1 install            # DROP rules, rsyslog config, service unit
//! nfsinkhole --interface eth1 --pcap install     # ...plus tcpdump on the NFLOG group
//! nfsinkhole --interface eth1 start              # DROP + logging rules
//! nfsinkhole --interface eth1 stop               # remove the logging rules
//! nfsinkhole --interface eth1 status             # show loaded sinkhole rules
//! nfsinkhole --interface eth1 drop delete        # remove the DROP rules alone
//! nfsinkhole --interface eth1 uninstall
//! ```

use clap::{Args, Parser, Subcommand};
use nfsinkhole::config::{self, Settings};
use nfsinkhole::core::error::IptablesErrorPattern;
use nfsinkhole::core::lock::{HostLock, lock_path};
use nfsinkhole::command::SystemRunner;
use nfsinkhole::install::{
    AccessControl, AppArmor, CaptureMode, Installer, LogDaemon, Rsyslog, ServiceParams, service,
    tcpdump,
};
use nfsinkhole::{Error, FilterMode, ReconciliationEngine, Result, audit, utils};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nfsinkhole", version)]
#[command(about = "Sinkhole all traffic on an interface while logging a sample of it", long_about = None)]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/nfsinkhole/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `nfsinkhole=trace` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(flatten)]
    rules: RuleArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the persisted settings
#[derive(Args)]
struct RuleArgs {
    /// Interface dedicated to sinkhole traffic
    #[arg(long, global = true)]
    interface: Option<String>,

    /// Protocols to log: all, or a comma list of tcp/udp/icmp
    #[arg(long, global = true)]
    protocol: Option<String>,

    /// Destination ports to log: start:end or a comma list
    #[arg(long = "dport", global = true, value_name = "PORTS")]
    dest_port: Option<String>,

    /// Prefix for LOG entries (at most 29 bytes)
    #[arg(long = "prefix", global = true)]
    log_prefix: Option<String>,

    /// hashlimit rate, e.g. 1/h
    #[arg(long = "hashlimit", global = true, value_name = "RATE")]
    hashlimit_rate: Option<String>,

    /// hashlimit key fields, e.g. srcip,dstip,dstport
    #[arg(long, global = true, value_name = "FIELDS")]
    hashlimit_mode: Option<String>,

    #[arg(long, global = true, value_name = "N")]
    hashlimit_burst: Option<String>,

    /// hashlimit entry expiry in milliseconds
    #[arg(long = "hashlimit-expire", global = true, value_name = "MS")]
    hashlimit_expire_ms: Option<String>,

    /// Source addresses never logged, comma separated
    #[arg(long, global = true, value_name = "ADDRS")]
    src_exclude: Option<String>,

    /// Capture NFLOG traffic with tcpdump from the service
    #[arg(long, global = true)]
    pcap: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install DROP rules, log daemon config and the boot service
    Install,
    /// Remove everything `install` set up
    Uninstall,
    /// Create the DROP rules (if missing) and the logging rules
    Start {
        /// IPv4 address of the interface (default: looked up from the interface)
        #[arg(long, value_name = "ADDR")]
        interface_addr: Option<String>,
    },
    /// Remove the logging rules, leaving the DROP rules in place
    Stop,
    /// Show the sinkhole rules currently loaded
    Status,
    /// Operate on the interface DROP rules alone
    #[command(subcommand)]
    Drop(DropCommand),
    /// Show recent audit log entries
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum DropCommand {
    /// Drop all traffic in and out of the interface
    Create,
    /// Remove the interface DROP rules
    Delete,
}

impl RuleArgs {
    fn apply(self, settings: &mut Settings) {
        let overrides = [
            (self.interface, &mut settings.interface),
            (self.protocol, &mut settings.protocol),
            (self.dest_port, &mut settings.dest_port),
            (self.log_prefix, &mut settings.log_prefix),
            (self.hashlimit_rate, &mut settings.hashlimit_rate),
            (self.hashlimit_mode, &mut settings.hashlimit_mode),
            (self.hashlimit_burst, &mut settings.hashlimit_burst),
            (self.hashlimit_expire_ms, &mut settings.hashlimit_expire_ms),
            (self.src_exclude, &mut settings.src_exclude),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }
        if self.pcap {
            settings.pcap = true;
        }
    }
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let loaded = match &config_path {
        Some(path) => config::load_settings(path),
        None => Ok(Settings::default()),
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .or_else(|| loaded.as_ref().ok().map(|s| s.log_level.clone()));
    init_tracing(level.as_deref().unwrap_or("info"));

    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    cli.rules.apply(&mut settings);
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    match handle_cli(cli.command, settings, config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(e: &Error) {
    eprintln!("Error: {e}");
    if let Some(diagnostic) = e.diagnostic() {
        let translation = IptablesErrorPattern::match_error(diagnostic);
        eprintln!();
        eprintln!("{}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  • {suggestion}");
        }
    }
}

fn error_text<T>(result: &Result<T>) -> Option<String> {
    result.as_ref().err().map(ToString::to_string)
}

fn engine(settings: &Settings, interface_addr: Option<&str>) -> Result<ReconciliationEngine<SystemRunner>> {
    Ok(ReconciliationEngine::new(
        SystemRunner,
        settings.to_ruleset(interface_addr)?,
    ))
}

fn resolve_interface_addr(settings: &Settings, given: Option<String>) -> Result<String> {
    if let Some(addr) = given {
        return Ok(addr);
    }
    // Validate the interface name before asking the kernel about it
    settings.to_ruleset(None)?;
    let addr = utils::interface_ipv4(&settings.interface).map_err(|message| Error::Validation {
        field: "interface_addr".to_string(),
        message,
    })?;
    info!("Using address {addr} of interface {}", settings.interface);
    Ok(addr.to_string())
}

fn handle_cli(command: Commands, settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        Commands::Status => return status(&settings),
        Commands::History { count } => return history(count),
        _ => {}
    }

    let lock = HostLock::acquire_or_wait(&lock_path())?;
    debug!("Holding {}", lock.path().display());
    let interface = settings.interface.clone();

    match command {
        Commands::Install => {
            let result = install(&settings, config_path);
            audit::log_install(&interface, settings.pcap, error_text(&result));
            result?;
            println!("✓ nfsinkhole installed on {interface}");
        }
        Commands::Uninstall => {
            let result = uninstall(&settings);
            audit::log_uninstall(&interface, error_text(&result));
            result?;
            println!("✓ nfsinkhole removed from {interface}");
        }
        Commands::Start { interface_addr } => {
            let addr = resolve_interface_addr(&settings, interface_addr)?;
            let engine = engine(&settings, Some(&addr))?;

            let result = engine.create_drop_rules();
            audit::log_create_drop(&interface, error_text(&result));
            match result {
                Ok(()) => {}
                Err(e) if e.is_precondition() => info!("DROP rules already present"),
                Err(e) => return Err(e),
            }

            let result = engine.create_logging_rules();
            audit::log_create_logging(&interface, error_text(&result));
            result?;
            println!("✓ Sinkhole active on {interface}");
        }
        Commands::Stop => {
            let engine = engine(&settings, None)?;
            let result = engine.delete_logging_rules();
            audit::log_delete_logging(
                &interface,
                result.as_ref().ok().copied(),
                error_text(&result),
            );
            match result {
                Ok(count) => println!("✓ Removed {count} logging rule(s)"),
                Err(e) if e.is_precondition() => println!("No logging rules loaded"),
                Err(e) => return Err(e),
            }
        }
        Commands::Drop(DropCommand::Create) => {
            let engine = engine(&settings, None)?;
            let result = engine.create_drop_rules();
            audit::log_create_drop(&interface, error_text(&result));
            result?;
            println!("✓ DROP rules created for {interface}");
        }
        Commands::Drop(DropCommand::Delete) => {
            let engine = engine(&settings, None)?;
            let result = engine.delete_drop_rules();
            audit::log_delete_drop(
                &interface,
                result.as_ref().ok().copied(),
                error_text(&result),
            );
            let count = result?;
            println!("✓ Removed {count} DROP rule(s)");
        }
        Commands::Status | Commands::History { .. } => {}
    }
    Ok(())
}

fn install(settings: &Settings, config_path: Option<PathBuf>) -> Result<()> {
    let engine = engine(settings, None)?;
    let capture = if settings.pcap {
        tcpdump::detect_capture_mode(&SystemRunner)
    } else {
        CaptureMode::default()
    };
    let params = ServiceParams {
        exe: std::env::current_exe()?,
        settings: settings.clone(),
        capture,
    };

    let rsyslog = Rsyslog::detect(SystemRunner, service::is_systemd());
    let apparmor = AppArmor::system(SystemRunner);
    let unit = service::for_host(SystemRunner, params);

    Installer::new(&engine, settings.pcap)
        .log_daemon(rsyslog.as_ref().map(|d| d as &dyn LogDaemon))
        .access_control(Some(&apparmor as &dyn AccessControl))
        .service(Some(unit.as_ref()))
        .install()?;

    // Remembered so a later uninstall knows the interface and pcap setting
    if let Some(path) = config_path {
        match config::save_settings(settings, &path) {
            Ok(()) => info!("Settings saved to {}", path.display()),
            Err(e) => warn!("Could not save settings to {}: {e}", path.display()),
        }
    }
    Ok(())
}

fn uninstall(settings: &Settings) -> Result<()> {
    let engine = engine(settings, None)?;
    let params = ServiceParams {
        exe: std::env::current_exe()?,
        settings: settings.clone(),
        capture: CaptureMode::default(),
    };

    let rsyslog = Rsyslog::detect(SystemRunner, service::is_systemd());
    let apparmor = AppArmor::system(SystemRunner);
    let unit = service::for_host(SystemRunner, params);

    Installer::new(&engine, settings.pcap)
        .log_daemon(rsyslog.as_ref().map(|d| d as &dyn LogDaemon))
        .access_control(Some(&apparmor as &dyn AccessControl))
        .service(Some(unit.as_ref()))
        .uninstall()
}

fn status(settings: &Settings) -> Result<()> {
    let engine = engine(settings, None)?;
    let interface = &settings.interface;

    let logging = engine.list(FilterMode::All)?;
    println!("Sinkhole rules for {interface}:");
    if logging.is_empty() {
        println!("  (none)");
    }
    for rule in &logging {
        println!("  [{}] {}", rule.kind, rule.line);
    }

    let drops = engine.list(FilterMode::IoDropOnly)?;
    println!("DROP rules for {interface}:");
    if drops.is_empty() {
        println!("  (none)");
    }
    for rule in &drops {
        println!("  {}", rule.line);
    }
    Ok(())
}

fn history(count: usize) -> Result<()> {
    let log = audit::AuditLog::new()?;
    let events = log.read_recent(count)?;
    if events.is_empty() {
        println!("No audit entries in {}", log.path().display());
        return Ok(());
    }
    for event in events {
        let mark = if event.success { "✓" } else { "✗" };
        println!(
            "{} {mark} {:?} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.details
        );
        if let Some(error) = event.error {
            println!("    {error}");
        }
    }
    Ok(())
}
