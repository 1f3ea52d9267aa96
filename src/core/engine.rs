//! Sinkhole rule reconciliation
//!
//! [`ReconciliationEngine`] owns the four operations that change sinkhole
//! state in the firewall. Each one snapshots the live rules, checks its
//! precondition against that snapshot, then issues a fixed sequence of
//! iptables commands. The first failing command aborts the rest; nothing is
//! retried and nothing already applied is rolled back.
//!
//! # Example
//!
//! ```no_run
//! use nfsinkhole::command::SystemRunner;
//! use nfsinkhole::core::engine::ReconciliationEngine;
//! use nfsinkhole::core::ruleset::RuleSetConfig;
//!
//! # fn main() -> nfsinkhole::Result<()> {
//! let config = RuleSetConfig::builder("eth1")
//!     .interface_addr("192.0.2.10")
//!     .build()?;
//! let engine = ReconciliationEngine::new(SystemRunner, config);
//! engine.create_drop_rules()?;
//! engine.create_logging_rules()?;
//! # Ok(())
//! # }
//! ```

use crate::command::{self, CommandRunner};
use crate::core::error::{Error, Result};
use crate::core::inspector::{ExistingRule, FilterMode, RuleInspector, RuleKind};
use crate::core::ruleset::RuleSetConfig;
use crate::core::statement::{self, Statement};
use crate::elevation;
use tracing::{info, warn};

pub struct ReconciliationEngine<R: CommandRunner> {
    runner: R,
    config: RuleSetConfig,
}

impl<R: CommandRunner> ReconciliationEngine<R> {
    pub fn new(runner: R, config: RuleSetConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &RuleSetConfig {
        &self.config
    }

    /// Fresh snapshot of the sinkhole-related rules
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryFailure` if the listing fails.
    pub fn list(&self, mode: FilterMode) -> Result<Vec<ExistingRule>> {
        RuleInspector::new(&self.runner, self.config.interface()).list(mode)
    }

    fn listing_command() -> String {
        command::render(&RuleInspector::<R>::listing_command())
    }

    fn iptables(&self, args: Vec<String>) -> Result<()> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(elevation::iptables_binary());
        argv.extend(args);
        command::run_checked(&self.runner, &argv, true, true)?;
        Ok(())
    }

    fn write(&self, stmt: &Statement) -> Result<()> {
        info!("Writing: {}", stmt.argv().join(" "));
        self.iptables(stmt.argv())
    }

    /// Creates the sinkhole chain, its members and the INPUT dispatch rule
    ///
    /// Refused as a whole if any sinkhole-tagged line already exists.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if the configuration has no interface address
    /// - `Error::RulesAlreadyExist` carrying every tagged line found
    /// - `Error::QueryFailure` / `Error::RunFailure` from the firewall
    pub fn create_logging_rules(&self) -> Result<()> {
        let Some(addr) = self.config.interface_addr() else {
            return Err(Error::validation(
                "interface_addr",
                "An interface address is required to create logging rules",
            ));
        };

        info!("Checking for existing iptables rules");
        let existing = self.list(FilterMode::All)?;
        if !existing.is_empty() {
            return Err(Error::RulesAlreadyExist {
                command: Self::listing_command(),
                lines: existing.into_iter().map(|r| r.line).collect(),
            });
        }

        info!("Writing sinkhole chain for {}", self.config.interface());
        self.write(&statement::chain_declaration())?;

        // Exclusions return before LOG/NFLOG see the packet
        for source in self.config.src_exclusions() {
            self.write(&statement::exclusion(source))?;
        }
        self.write(&statement::log(self.config.log_prefix()))?;
        self.write(&statement::nflog())?;
        self.write(&statement::dispatch(&self.config, addr))?;

        Ok(())
    }

    /// Inserts the INPUT and OUTPUT DROP rules for the interface
    ///
    /// # Errors
    ///
    /// - `Error::RulesAlreadyExist` naming the drop line(s) already present
    /// - `Error::QueryFailure` / `Error::RunFailure` from the firewall
    pub fn create_drop_rules(&self) -> Result<()> {
        info!("Checking for existing iptables DROP rules");
        let found: Vec<String> = self
            .list(FilterMode::IoDropOnly)?
            .into_iter()
            .filter(|r| r.kind == RuleKind::IoDrop)
            .map(|r| r.line)
            .collect();
        if !found.is_empty() {
            return Err(Error::RulesAlreadyExist {
                command: Self::listing_command(),
                lines: found,
            });
        }

        info!("Writing DROP rules for {}", self.config.interface());
        self.write(&statement::input_drop(self.config.interface()))?;
        self.write(&statement::output_drop(self.config.interface()))?;
        Ok(())
    }

    /// Removes the dispatch rule, then flushes and deletes the chain
    ///
    /// Returns the number of sinkhole lines found before deletion. Lines that
    /// only carry the tag (another chain named `SINKHOLE_*`) are left alone.
    ///
    /// # Errors
    ///
    /// - `Error::RulesNotExist` if no sinkhole-authored line was found
    /// - `Error::QueryFailure` / `Error::RunFailure` from the firewall
    pub fn delete_logging_rules(&self) -> Result<usize> {
        info!("Checking for existing iptables rules");
        let existing = self.list(FilterMode::All)?;
        for rule in existing.iter().filter(|r| r.kind == RuleKind::Unowned) {
            warn!("Leaving rule that only resembles the sinkhole: {}", rule.line);
        }
        let owned = existing.iter().filter(|r| r.is_owned()).count();
        if owned == 0 {
            return Err(Error::RulesNotExist {
                command: Self::listing_command(),
            });
        }

        info!("Deleting iptables rules (only what was created)");
        let expected = self.expected_chain_lines();
        let mut flush = false;

        for rule in &existing {
            match rule.kind {
                RuleKind::ChainDecl | RuleKind::SinkholeMember => {
                    if !expected.contains(&rule.line) {
                        warn!(
                            "Chain {} holds a rule this configuration did not create, it will be flushed: {}",
                            statement::SINKHOLE_CHAIN,
                            rule.line
                        );
                    }
                    flush = true;
                }
                RuleKind::DispatchRule => {
                    let Some(args) = statement::to_delete_form(&rule.line) else {
                        warn!("Skipping unrecognised sinkhole line: {}", rule.line);
                        continue;
                    };
                    info!("Deleting: {}", args.join(" "));
                    self.iptables(args)?;
                }
                RuleKind::IoDrop | RuleKind::Unowned => {}
            }
        }

        if flush {
            let flush_chain = statement::flush_chain();
            info!("Flushing: {}", flush_chain.argv().join(" "));
            self.iptables(flush_chain.argv())?;

            let delete_chain = statement::delete_chain();
            info!("Deleting: {}", delete_chain.argv().join(" "));
            self.iptables(delete_chain.argv())?;
        }

        Ok(owned)
    }

    /// Removes the exact INPUT/OUTPUT DROP rules for the interface
    ///
    /// Returns how many DROP rules were deleted (0, 1 or 2).
    ///
    /// # Errors
    ///
    /// - `Error::RulesNotExist` if the filtered listing was empty
    /// - `Error::QueryFailure` / `Error::RunFailure` from the firewall
    pub fn delete_drop_rules(&self) -> Result<usize> {
        info!("Checking for existing iptables DROP rules");
        let existing = self.list(FilterMode::IoDropOnly)?;
        if existing.is_empty() {
            return Err(Error::RulesNotExist {
                command: Self::listing_command(),
            });
        }

        info!("Deleting iptables DROP rules");
        let drops = statement::drop_listings(self.config.interface());
        let mut count = 0;
        for rule in &existing {
            if !drops.contains(&rule.line) {
                continue;
            }
            let Some(args) = statement::to_delete_form(&rule.line) else {
                continue;
            };
            count += 1;
            info!("Deleting: {}", args.join(" "));
            self.iptables(args)?;
        }

        Ok(count)
    }

    /// Listing lines of the chain as this configuration would create it
    fn expected_chain_lines(&self) -> Vec<String> {
        let mut lines = vec![statement::chain_declaration().listing()];
        for source in self.config.src_exclusions() {
            lines.push(statement::exclusion(source).listing());
            // iptables lists bare host addresses with their prefix length
            if !source.contains('/') {
                lines.push(statement::exclusion(&format!("{source}/32")).listing());
            }
        }
        lines.push(statement::log(self.config.log_prefix()).listing());
        lines.push(statement::nflog().listing());
        lines
    }
}
