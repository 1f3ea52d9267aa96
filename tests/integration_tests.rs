//! Integration tests for nfsinkhole
//!
//! These tests drive the public API end to end against an in-memory host:
//! a small iptables emulation plus a recorder for the installer's system
//! commands. Nothing here needs privileges or touches the real firewall.

#![allow(clippy::uninlined_format_args)]

use nfsinkhole::command::{CommandOutput, CommandRunner};
use nfsinkhole::config::{self, Settings};
use nfsinkhole::core::error::IptablesErrorPattern;
use nfsinkhole::core::statement::{save_quote, split_listing};
use nfsinkhole::install::{
    AppArmor, CaptureMode, Installer, Rsyslog, ServiceParams, SystemdService,
};
use nfsinkhole::{Error, FilterMode, ReconciliationEngine, RuleKind, RuleSetConfig};
use std::cell::RefCell;
use std::io;
use std::path::PathBuf;

const BUILTIN: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];

/// Just enough iptables for the engine's verbs, plus a recorder for every
/// other program
///
/// Rules are kept as listing lines and grouped by chain when listed.
struct Host {
    user_chains: RefCell<Vec<String>>,
    rules: RefCell<Vec<String>>,
    calls: RefCell<Vec<Vec<String>>>,
    fail_on: RefCell<Option<(String, String)>>,
}

impl Host {
    fn new() -> Self {
        Self {
            user_chains: RefCell::new(Vec::new()),
            rules: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            fail_on: RefCell::new(None),
        }
    }

    fn fail_on(&self, needle: &str, stderr: &str) {
        *self.fail_on.borrow_mut() = Some((needle.to_string(), stderr.to_string()));
    }

    /// Lines of the current `iptables -S` output, policies omitted
    fn rules(&self) -> Vec<String> {
        let user = self.user_chains.borrow();
        let mut rules = self.rules.borrow().clone();
        rules.sort_by_key(|line| {
            let chain = line.split(' ').nth(1).unwrap_or_default();
            BUILTIN
                .iter()
                .position(|c| *c == chain)
                .or_else(|| user.iter().position(|c| c == chain).map(|i| i + BUILTIN.len()))
        });
        user.iter().map(|c| format!("-N {c}")).chain(rules).collect()
    }

    /// Program names of every recorded call, `-S` listings excluded
    fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|argv| argv.get(1).is_none_or(|a| a != "-S"))
            .map(|argv| {
                if is_iptables(&argv[0]) {
                    argv[..3].join(" ")
                } else {
                    argv[..2].join(" ")
                }
            })
            .collect()
    }

    fn iptables(&self, args: &[String]) -> Result<String, &'static str> {
        if args.first().is_some_and(|a| a == "-S") {
            let mut out: String = BUILTIN.iter().map(|c| format!("-P {c} ACCEPT\n")).collect();
            for line in self.rules() {
                out.push_str(&line);
                out.push('\n');
            }
            return Ok(out);
        }

        let [op, chain, ..] = args else {
            return Err("iptables: Bad argument.");
        };
        let known = BUILTIN.contains(&chain.as_str()) || self.user_chains.borrow().contains(chain);
        let mut rules = self.rules.borrow_mut();
        match op.as_str() {
            "-N" if known => return Err("iptables: Chain already exists."),
            "-N" => self.user_chains.borrow_mut().push(chain.clone()),
            _ if !known => return Err("iptables: No chain/target/match by that name."),
            "-A" => rules.push(listing_line(chain, &args[2..])),
            // Grouping by chain on listing keeps a front insert first in its chain
            "-I" => rules.insert(0, listing_line(chain, &args[3..])),
            "-D" => {
                let line = listing_line(chain, &args[2..]);
                let at = rules
                    .iter()
                    .position(|r| *r == line)
                    .ok_or("iptables: Bad rule (does a matching rule exist in that chain?).")?;
                rules.remove(at);
            }
            "-F" => {
                let prefix = format!("-A {chain} ");
                rules.retain(|r| !r.starts_with(&prefix));
            }
            "-X" => self.user_chains.borrow_mut().retain(|c| c != chain),
            _ => return Err("iptables: unknown option"),
        }
        Ok(String::new())
    }
}

fn is_iptables(program: &str) -> bool {
    program.rsplit('/').next() == Some("iptables")
}

fn listing_line(chain: &str, tokens: &[String]) -> String {
    let mut out = vec!["-A".to_string(), chain.to_string()];
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && tokens[i - 1] == "--log-prefix" {
            out.push(save_quote(token));
        } else {
            out.push(token.clone());
        }
    }
    out.join(" ")
}

impl CommandRunner for Host {
    fn run(&self, argv: &[String], _elevate: bool) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(argv.to_vec());

        if let Some((needle, stderr)) = self.fail_on.borrow().as_ref()
            && argv.join(" ").contains(needle.as_str())
        {
            return Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.clone().into_bytes(),
                exit_code: Some(1),
            });
        }

        if !is_iptables(&argv[0]) {
            return Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            });
        }

        Ok(match self.iptables(&argv[1..]) {
            Ok(stdout) => CommandOutput {
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
                exit_code: Some(0),
            },
            Err(diagnostic) => CommandOutput {
                stdout: Vec::new(),
                stderr: format!("{diagnostic}\n").into_bytes(),
                exit_code: Some(1),
            },
        })
    }
}

fn config(interface: &str) -> RuleSetConfig {
    RuleSetConfig::builder(interface)
        .interface_addr("10.0.0.5")
        .build()
        .unwrap()
}

#[test]
fn test_start_stop_lifecycle() {
    let host = Host::new();
    let engine = ReconciliationEngine::new(&host, config("eth1"));

    engine.create_drop_rules().unwrap();
    engine.create_logging_rules().unwrap();

    let rules = host.rules();
    assert_eq!(rules[0], "-N SINKHOLE");
    assert!(rules[1].starts_with("-A INPUT -i eth1 -d 10.0.0.5 -j SINKHOLE -m hashlimit"));
    assert_eq!(rules[2], "-A INPUT -i eth1 -j DROP");
    assert_eq!(rules[3], "-A OUTPUT -o eth1 -j DROP");
    assert_eq!(
        &rules[4..],
        [
            "-A SINKHOLE -s 127.0.0.1 -j RETURN",
            "-A SINKHOLE -j LOG --log-prefix \"[nfsinkhole] \"",
            "-A SINKHOLE -j NFLOG",
        ]
    );

    let kinds: Vec<RuleKind> = engine
        .list(FilterMode::All)
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert!(kinds.contains(&RuleKind::ChainDecl));
    assert!(kinds.contains(&RuleKind::DispatchRule));
    let drops = engine.list(FilterMode::IoDropOnly).unwrap();
    assert_eq!(drops.iter().filter(|r| r.kind == RuleKind::IoDrop).count(), 2);

    // Service restart: stop then start again
    assert_eq!(engine.delete_logging_rules().unwrap(), 5);
    assert_eq!(
        host.rules(),
        ["-A INPUT -i eth1 -j DROP", "-A OUTPUT -o eth1 -j DROP"]
    );
    assert!(engine.create_drop_rules().unwrap_err().is_precondition());
    engine.create_logging_rules().unwrap();
    assert_eq!(engine.delete_logging_rules().unwrap(), 5);

    assert_eq!(engine.delete_drop_rules().unwrap(), 2);
    assert!(host.rules().is_empty());
}

#[test]
fn test_two_interfaces_do_not_interfere() {
    let host = Host::new();
    let eth1 = ReconciliationEngine::new(&host, config("eth1"));
    let eth2 = ReconciliationEngine::new(&host, config("eth2"));

    eth1.create_drop_rules().unwrap();
    eth2.create_drop_rules().unwrap();
    assert_eq!(eth1.delete_drop_rules().unwrap(), 2);

    assert_eq!(
        host.rules(),
        ["-A INPUT -i eth2 -j DROP", "-A OUTPUT -o eth2 -j DROP"]
    );
}

#[test]
fn test_foreign_rules_survive_full_cycle() {
    let host = Host::new();
    host.rules
        .borrow_mut()
        .push("-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT".to_string());
    let engine = ReconciliationEngine::new(&host, config("eth1"));

    engine.create_drop_rules().unwrap();
    engine.create_logging_rules().unwrap();
    engine.delete_logging_rules().unwrap();
    engine.delete_drop_rules().unwrap();

    assert_eq!(host.rules(), ["-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT"]);
}

#[test]
fn test_firewall_error_is_translated() {
    let host = Host::new();
    host.fail_on(
        "-N SINKHOLE",
        "iptables: Permission denied (you must be root).\n",
    );
    let engine = ReconciliationEngine::new(&host, config("eth1"));

    let err = engine.create_logging_rules().unwrap_err();
    assert!(matches!(err, Error::RunFailure { .. }));
    let translation = IptablesErrorPattern::match_error(err.diagnostic().unwrap());
    assert!(translation.user_message.contains("permissions"));
    assert!(host.rules().is_empty());
}

#[test]
fn test_invalid_settings_never_reach_the_firewall() {
    let settings = Settings {
        interface: "eth1; rm -rf /".to_string(),
        ..Settings::default()
    };
    let err = settings.to_ruleset(Some("10.0.0.5")).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn test_install_then_uninstall_ordering() {
    let host = Host::new();
    let engine = ReconciliationEngine::new(&host, config("eth1"));

    let apparmor_dir = tempfile::tempdir().unwrap();
    let apparmor = AppArmor::new(&host, apparmor_dir.path().to_path_buf());
    let rsyslog = Rsyslog::new(&host, true, PathBuf::from("/etc/rsyslog.d/nfsinkhole.conf"), None);
    let service = SystemdService::new(
        &host,
        ServiceParams {
            exe: PathBuf::from("/usr/local/bin/nfsinkhole"),
            settings: Settings {
                interface: "eth1".to_string(),
                pcap: true,
                ..Settings::default()
            },
            capture: CaptureMode::Print,
        },
        PathBuf::from("/etc/systemd/system/nfsinkhole.service"),
    );

    let installer = Installer::new(&engine, true)
        .log_daemon(Some(&rsyslog))
        .access_control(Some(&apparmor))
        .service(Some(&service));

    installer.install().unwrap();
    assert_eq!(
        host.programs(),
        [
            "iptables -I INPUT",
            "iptables -I OUTPUT",
            "ln -s",
            "/etc/init.d/apparmor restart",
            "install -m",
            "systemctl restart",
            "install -m",
            "systemctl daemon-reload",
            "systemctl enable",
        ]
    );

    // A second install accepts the DROP rules already in place
    installer.install().unwrap();
    assert_eq!(engine.list(FilterMode::IoDropOnly).unwrap().len(), 2);

    host.calls.borrow_mut().clear();
    installer.uninstall().unwrap();
    let programs = host.programs();
    assert_eq!(programs.first().map(String::as_str), Some("rm -f"));
    assert_eq!(&programs[programs.len() - 2..], ["iptables -D INPUT", "iptables -D OUTPUT"]);
    assert!(host.rules().is_empty());

    // Nothing left to remove is not an error
    installer.uninstall().unwrap();
}

#[test]
fn test_settings_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nfsinkhole").join("config.json");
    let settings = Settings {
        interface: "eth1".to_string(),
        protocol: "tcp,udp".to_string(),
        dest_port: "22,80,443".to_string(),
        log_prefix: "[sink] ".to_string(),
        pcap: true,
        ..Settings::default()
    };

    config::save_settings(&settings, &path).unwrap();
    let loaded = config::load_settings(&path).unwrap();
    assert_eq!(loaded, settings);

    let ruleset = loaded.to_ruleset(Some("10.0.0.5")).unwrap();
    let host = Host::new();
    let engine = ReconciliationEngine::new(&host, ruleset);
    engine.create_logging_rules().unwrap();

    let dispatch = host
        .rules()
        .into_iter()
        .find(|l| l.starts_with("-A INPUT"))
        .unwrap();
    let tokens = split_listing(&dispatch);
    assert!(tokens.windows(2).any(|w| w == ["--protocol", "tcp,udp"]));
    assert!(tokens.windows(2).any(|w| w == ["--dport", "22,80,443"]));
    assert!(host.rules().contains(&"-A SINKHOLE -j LOG --log-prefix \"[sink] \"".to_string()));
}
