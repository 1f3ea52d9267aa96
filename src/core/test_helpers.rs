//! Shared test utilities for core module tests
//!
//! Provides an in-memory iptables and the env var guard. This module is only
//! compiled in test mode.

use crate::command::{CommandOutput, CommandRunner};
use crate::core::statement::{save_quote, split_listing};
use std::cell::RefCell;
use std::io;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("NFSINKHOLE_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("NFSINKHOLE_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

const BUILTIN_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];

#[derive(Debug, Default)]
struct FakeState {
    /// Built-in chains first, then user chains in creation order
    chains: Vec<(String, Vec<String>)>,
    calls: Vec<(Vec<String>, bool)>,
    failures: Vec<(String, String)>,
    listing_stderr: Option<String>,
    unavailable: bool,
}

/// Stateful in-memory stand-in for the iptables binary
///
/// Understands `-S`, `-N`, `-A`, `-I`, `-D`, `-F` and `-X` on the filter
/// table, answers with the same diagnostics the real binary prints, and
/// records every invocation. The program name in `argv[0]` is ignored.
#[derive(Debug)]
pub struct FakeIptables {
    state: RefCell<FakeState>,
}

impl Default for FakeIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIptables {
    pub fn new() -> Self {
        let state = FakeState {
            chains: BUILTIN_CHAINS
                .iter()
                .map(|c| ((*c).to_string(), Vec::new()))
                .collect(),
            ..FakeState::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    /// A runner whose commands can never be started
    pub fn unavailable() -> Self {
        let fake = Self::new();
        fake.state.borrow_mut().unavailable = true;
        fake
    }

    /// Declares a user chain without recording a call
    pub fn seed_chain(&self, name: &str) {
        self.state
            .borrow_mut()
            .chains
            .push((name.to_string(), Vec::new()));
    }

    /// Appends a rule given in listing form (`-A CHAIN ...`)
    pub fn seed_rule(&self, line: &str) {
        let tokens = split_listing(line);
        assert_eq!(tokens[0], "-A", "seed_rule takes -A lines");
        let rule = render_rule(&tokens[2..]);
        let mut state = self.state.borrow_mut();
        let chain = state
            .chains
            .iter_mut()
            .find(|(name, _)| *name == tokens[1])
            .expect("seeded rule for unknown chain");
        chain.1.push(rule);
    }

    /// Any command whose arguments contain `needle` fails with `stderr`
    pub fn fail_when(&self, needle: &str, stderr: &str) {
        self.state
            .borrow_mut()
            .failures
            .push((needle.to_string(), stderr.to_string()));
    }

    /// `-S` succeeds but also writes `stderr`
    pub fn listing_stderr(&self, stderr: &str) {
        self.state.borrow_mut().listing_stderr = Some(stderr.to_string());
    }

    /// Every recorded argv, program name included
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state
            .borrow()
            .calls
            .iter()
            .map(|(argv, _)| argv.clone())
            .collect()
    }

    /// Recorded calls that changed (or tried to change) the rule set
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|argv| argv.get(1).is_some_and(|flag| flag != "-S"))
            .map(|argv| argv[1..].join(" "))
            .collect()
    }

    pub fn all_elevated(&self) -> bool {
        self.state.borrow().calls.iter().all(|(_, elevate)| *elevate)
    }

    /// Current `iptables -S` output
    pub fn listing(&self) -> String {
        let state = self.state.borrow();
        let mut out = String::new();
        for chain in BUILTIN_CHAINS {
            out.push_str(&format!("-P {chain} ACCEPT\n"));
        }
        for (name, _) in state.chains.iter().skip(BUILTIN_CHAINS.len()) {
            out.push_str(&format!("-N {name}\n"));
        }
        for (name, rules) in &state.chains {
            for rule in rules {
                out.push_str(&format!("-A {name} {rule}\n"));
            }
        }
        out
    }

    fn execute(&self, args: &[String]) -> Result<String, &'static str> {
        let flag = args.first().map_or("", String::as_str);
        if flag == "-S" {
            return Ok(self.listing());
        }

        let chain_name = args.get(1).ok_or("iptables: Bad argument.")?;
        let mut state = self.state.borrow_mut();
        let index = state.chains.iter().position(|(n, _)| n == chain_name);

        match flag {
            "-N" => {
                if index.is_some() {
                    return Err("iptables: Chain already exists.");
                }
                state.chains.push((chain_name.clone(), Vec::new()));
            }
            "-A" | "-I" | "-D" => {
                let index = index.ok_or("iptables: No chain/target/match by that name.")?;
                let (position, tokens) = if flag == "-I" {
                    let position = args
                        .get(2)
                        .and_then(|p| p.parse::<usize>().ok())
                        .ok_or("iptables: Bad argument.")?;
                    (position, &args[3..])
                } else {
                    (0, &args[2..])
                };
                let rule = render_rule(tokens);
                if let Some(target) = jump_target(tokens)
                    && !BUILTIN_CHAINS.contains(&target)
                    && !matches!(target, "RETURN" | "DROP" | "ACCEPT" | "LOG" | "NFLOG")
                    && !state.chains.iter().any(|(n, _)| n == target)
                {
                    return Err("iptables: No chain/target/match by that name.");
                }

                let rules = &mut state.chains[index].1;
                match flag {
                    "-A" => rules.push(rule),
                    "-I" => {
                        let at = position.saturating_sub(1).min(rules.len());
                        rules.insert(at, rule);
                    }
                    _ => {
                        let found = rules
                            .iter()
                            .position(|r| *r == rule)
                            .ok_or("iptables: Bad rule (does a matching rule exist in that chain?).")?;
                        rules.remove(found);
                    }
                }
            }
            "-F" => {
                let index = index.ok_or("iptables: No chain/target/match by that name.")?;
                state.chains[index].1.clear();
            }
            "-X" => {
                let index = index.ok_or("iptables: No chain/target/match by that name.")?;
                if index < BUILTIN_CHAINS.len() {
                    return Err("iptables: Invalid argument.");
                }
                if !state.chains[index].1.is_empty() {
                    return Err("iptables: Directory not empty.");
                }
                let jump = format!("-j {chain_name}");
                let referenced = state
                    .chains
                    .iter()
                    .any(|(_, rules)| rules.iter().any(|r| r.contains(&jump)));
                if referenced {
                    return Err("iptables: Too many links.");
                }
                state.chains.remove(index);
            }
            _ => return Err("iptables: unknown option"),
        }
        Ok(String::new())
    }
}

impl CommandRunner for FakeIptables {
    fn run(&self, argv: &[String], elevate: bool) -> io::Result<CommandOutput> {
        {
            let mut state = self.state.borrow_mut();
            state.calls.push((argv.to_vec(), elevate));
            if state.unavailable {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "No such file or directory (os error 2)",
                ));
            }
        }

        let args = argv.get(1..).unwrap_or_default();
        let rendered = args.join(" ");

        let injected = self
            .state
            .borrow()
            .failures
            .iter()
            .find(|(needle, _)| rendered.contains(needle.as_str()))
            .map(|(_, stderr)| stderr.clone());
        if let Some(stderr) = injected {
            return Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.into_bytes(),
                exit_code: Some(1),
            });
        }

        match self.execute(args) {
            Ok(stdout) => {
                let stderr = if args.first().is_some_and(|f| f == "-S") {
                    self.state.borrow().listing_stderr.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                Ok(CommandOutput {
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                    exit_code: Some(0),
                })
            }
            Err(diagnostic) => Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: format!("{diagnostic}\n").into_bytes(),
                exit_code: Some(1),
            }),
        }
    }
}

/// Runner for host collaborators: records argv and answers with a fixed status
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<(Vec<String>, bool)>>,
    captured: RefCell<Vec<String>>,
    capture_sources: bool,
    fail: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command exits 1 with a diagnostic
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Also reads the staged source file of each `install` call
    pub fn capturing_sources() -> Self {
        Self {
            capture_sources: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().iter().map(|(argv, _)| argv.clone()).collect()
    }

    pub fn captured(&self) -> Vec<String> {
        self.captured.borrow().clone()
    }

    pub fn all_elevated(&self) -> bool {
        self.calls.borrow().iter().all(|(_, elevate)| *elevate)
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, argv: &[String], elevate: bool) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push((argv.to_vec(), elevate));

        if self.capture_sources
            && argv.first().is_some_and(|p| p == "install")
            && argv.len() >= 2
        {
            let source = &argv[argv.len() - 2];
            self.captured.borrow_mut().push(std::fs::read_to_string(source)?);
        }

        if self.fail {
            return Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: b"Failed to restart: Unit not found.\n".to_vec(),
                exit_code: Some(1),
            });
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }
}

/// Renders rule tokens the way `iptables -S` prints them
fn render_rule(tokens: &[String]) -> String {
    let mut out = Vec::with_capacity(tokens.len());
    let mut quote_next = false;
    for token in tokens {
        if quote_next {
            out.push(save_quote(token));
        } else {
            out.push(token.clone());
        }
        quote_next = token == "--log-prefix";
    }
    out.join(" ")
}

fn jump_target(tokens: &[String]) -> Option<&str> {
    tokens
        .iter()
        .position(|t| t == "-j")
        .and_then(|i| tokens.get(i + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fake: &FakeIptables, args: &str) -> CommandOutput {
        let mut argv = vec!["iptables".to_string()];
        argv.extend(split_listing(args));
        fake.run(&argv, true).unwrap()
    }

    #[test]
    fn test_listing_order_matches_iptables() {
        let fake = FakeIptables::new();
        assert!(run(&fake, "-N SINKHOLE").success());
        assert!(run(&fake, "-A SINKHOLE -j NFLOG").success());
        assert!(run(&fake, "-I INPUT 1 -i eth1 -j DROP").success());
        assert!(run(&fake, "-A OUTPUT -o eth1 -j DROP").success());

        assert_eq!(
            fake.listing(),
            "-P INPUT ACCEPT\n-P FORWARD ACCEPT\n-P OUTPUT ACCEPT\n-N SINKHOLE\n\
             -A INPUT -i eth1 -j DROP\n-A OUTPUT -o eth1 -j DROP\n-A SINKHOLE -j NFLOG\n"
        );
    }

    #[test]
    fn test_diagnostics() {
        let fake = FakeIptables::new();
        run(&fake, "-N SINKHOLE");
        let out = run(&fake, "-N SINKHOLE");
        assert_eq!(out.stderr_text(), "iptables: Chain already exists.\n");

        let out = run(&fake, "-D INPUT -i eth1 -j DROP");
        assert!(out.stderr_text().starts_with("iptables: Bad rule"));

        run(&fake, "-A SINKHOLE -j NFLOG");
        let out = run(&fake, "-X SINKHOLE");
        assert_eq!(out.stderr_text(), "iptables: Directory not empty.\n");
    }

    #[test]
    fn test_log_prefix_is_quoted_in_listing() {
        let fake = FakeIptables::new();
        run(&fake, "-N SINKHOLE");
        let argv: Vec<String> = ["iptables", "-A", "SINKHOLE", "-j", "LOG", "--log-prefix", "[x] "]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        assert!(fake.run(&argv, true).unwrap().success());
        assert!(fake.listing().contains("-A SINKHOLE -j LOG --log-prefix \"[x] \"\n"));
    }

    #[test]
    fn test_insert_position() {
        let fake = FakeIptables::new();
        fake.seed_rule("-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT");
        run(&fake, "-I INPUT 1 -i eth1 -j DROP");
        assert!(fake
            .listing()
            .contains("-A INPUT -i eth1 -j DROP\n-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT\n"));
    }

    #[test]
    fn test_failure_injection() {
        let fake = FakeIptables::new();
        fake.fail_when("-j NFLOG", "iptables: No chain/target/match by that name.\n");
        run(&fake, "-N SINKHOLE");
        let out = run(&fake, "-A SINKHOLE -j NFLOG");
        assert!(!out.success());
        assert!(!fake.listing().contains("NFLOG"));
        assert_eq!(fake.mutations(), vec!["-N SINKHOLE", "-A SINKHOLE -j NFLOG"]);
    }
}
