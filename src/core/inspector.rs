//! Live rule inspection
//!
//! The inspector takes a fresh `iptables -S` snapshot on every call and keeps
//! only the lines the sinkhole recognises as its own. Nothing is cached; each
//! engine operation re-validates against whatever the kernel holds right now.

use crate::command::{self, CommandRunner};
use crate::core::error::{Error, Result};
use crate::core::statement::{self, SINKHOLE_CHAIN};
use crate::elevation;

/// Which lines of the listing are of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Every line carrying the sinkhole chain tag
    All,
    /// Tagged lines plus the two interface DROP statements
    IoDropOnly,
}

/// What a recognised listing line is
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RuleKind {
    /// `-N SINKHOLE`
    ChainDecl,
    /// A rule appended to the sinkhole chain
    SinkholeMember,
    /// A rule elsewhere that jumps into the sinkhole chain
    DispatchRule,
    /// `-A INPUT -i <iface> -j DROP` or `-A OUTPUT -o <iface> -j DROP`
    IoDrop,
    /// Carries the tag but is not sinkhole-authored, e.g. a `SINKHOLE_OLD`
    /// chain. Blocks creation; never deleted.
    Unowned,
}

/// A single recognised line of the live listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRule {
    pub line: String,
    pub kind: RuleKind,
}

impl ExistingRule {
    /// True for lines the chain flush removes (declaration and members)
    pub fn is_chain_internal(&self) -> bool {
        matches!(self.kind, RuleKind::ChainDecl | RuleKind::SinkholeMember)
    }

    /// True for lines the logging-rule removal acts on
    pub fn is_owned(&self) -> bool {
        !matches!(self.kind, RuleKind::Unowned | RuleKind::IoDrop)
    }
}

/// Queries the firewall through a [`CommandRunner`]
pub struct RuleInspector<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    interface: &'a str,
}

impl<'a, R: CommandRunner + ?Sized> RuleInspector<'a, R> {
    pub fn new(runner: &'a R, interface: &'a str) -> Self {
        Self { runner, interface }
    }

    /// Command line used for the listing, for logs and error messages
    pub fn listing_command() -> Vec<String> {
        vec![elevation::iptables_binary(), "-S".to_string()]
    }

    /// Lists the sinkhole-related lines in firewall order
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryFailure` if the listing could not run, exited
    /// non-zero, or wrote anything to stderr.
    pub fn list(&self, mode: FilterMode) -> Result<Vec<ExistingRule>> {
        let argv = Self::listing_command();
        let output = command::run_checked(self.runner, &argv, true, true).map_err(|e| match e {
            Error::RunFailure {
                command,
                diagnostic,
                ..
            } => Error::QueryFailure {
                command,
                diagnostic,
            },
            other => other,
        })?;

        Ok(filter_listing(&output.stdout_text(), self.interface, mode))
    }
}

/// Filters and classifies raw `iptables -S` output
pub fn filter_listing(listing: &str, interface: &str, mode: FilterMode) -> Vec<ExistingRule> {
    let drops = statement::drop_listings(interface);
    let declaration = statement::chain_declaration().listing();

    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let is_drop = drops.iter().any(|d| d == line);
            let tagged = line.contains(SINKHOLE_CHAIN);

            let kind = if is_drop && mode == FilterMode::IoDropOnly {
                RuleKind::IoDrop
            } else if !tagged {
                return None;
            } else if is_drop {
                // Interface names may themselves contain the tag
                RuleKind::IoDrop
            } else if line == declaration {
                RuleKind::ChainDecl
            } else {
                classify_rule(line)
            };

            Some(ExistingRule {
                line: line.to_string(),
                kind,
            })
        })
        .collect()
}

/// Member, dispatch or unowned, judged on exact chain and target tokens
fn classify_rule(line: &str) -> RuleKind {
    let tokens = statement::split_listing(line);
    if tokens.first().map(String::as_str) != Some("-A") {
        return RuleKind::Unowned;
    }
    if tokens.get(1).map(String::as_str) == Some(SINKHOLE_CHAIN) {
        return RuleKind::SinkholeMember;
    }
    let target = tokens
        .iter()
        .position(|t| t == "-j")
        .and_then(|i| tokens.get(i + 1));
    if target.is_some_and(|t| t == SINKHOLE_CHAIN) {
        RuleKind::DispatchRule
    } else {
        RuleKind::Unowned
    }
}
