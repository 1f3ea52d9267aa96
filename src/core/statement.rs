//! Canonical iptables statements owned by the sinkhole
//!
//! Every rule the engine writes is built here, and the same value renders both
//! the argument vector passed to `iptables` and the line `iptables -S` prints
//! back for it. The inspector recognises sinkhole state by comparing listing
//! lines against these renderings, so the two forms must never drift apart.
//!
//! # Statement grammar
//!
//! ```text
//! -N SINKHOLE
//! -A SINKHOLE -s <addr> -j RETURN
//! -A SINKHOLE -j LOG --log-prefix "<prefix>"
//! -A SINKHOLE -j NFLOG
//! -A INPUT -i <iface> -d <addr> -j SINKHOLE -m hashlimit ... [-m multiport --protocol <p> [--dport <d>]]
//! -A INPUT -i <iface> -j DROP
//! -A OUTPUT -o <iface> -j DROP
//! ```

use crate::core::ruleset::RuleSetConfig;
use std::net::Ipv4Addr;

/// Name of the chain owned by the sinkhole
pub const SINKHOLE_CHAIN: &str = "SINKHOLE";

/// Name of the hashlimit table used by the dispatch rule
pub const HASHLIMIT_NAME: &str = "sinkhole";

/// Chain operation, mapped 1:1 to an iptables command flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    NewChain,
    Append,
    Insert(u32),
    Delete,
    FlushChain,
    DeleteChain,
}

/// A single match/target token of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Printed verbatim by `iptables -S`
    Plain(String),
    /// Free-form string option (log prefix); quoted by `iptables -S`
    Text(String),
}

impl Token {
    fn value(&self) -> &str {
        match self {
            Token::Plain(s) | Token::Text(s) => s,
        }
    }

    fn listing(&self) -> String {
        match self {
            Token::Plain(s) => s.clone(),
            Token::Text(s) => save_quote(s),
        }
    }
}

/// One iptables statement in canonical form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    op: Operation,
    chain: String,
    tokens: Vec<Token>,
}

impl Statement {
    fn new(op: Operation, chain: &str) -> Self {
        Self {
            op,
            chain: chain.to_string(),
            tokens: Vec::new(),
        }
    }

    fn plain(mut self, tokens: &[&str]) -> Self {
        self.tokens
            .extend(tokens.iter().map(|t| Token::Plain((*t).to_string())));
        self
    }

    fn text(mut self, value: &str) -> Self {
        self.tokens.push(Token::Text(value.to_string()));
        self
    }

    /// Arguments passed to the iptables binary (binary name not included)
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.tokens.len() + 3);
        let flag = match self.op {
            Operation::NewChain => "-N",
            Operation::Append => "-A",
            Operation::Insert(_) => "-I",
            Operation::Delete => "-D",
            Operation::FlushChain => "-F",
            Operation::DeleteChain => "-X",
        };
        argv.push(flag.to_string());
        argv.push(self.chain.clone());
        if let Operation::Insert(position) = self.op {
            argv.push(position.to_string());
        }
        argv.extend(self.tokens.iter().map(|t| t.value().to_string()));
        argv
    }

    /// The line `iptables -S` prints once this statement has been applied
    ///
    /// Appends and inserts both list as `-A`. Flush and chain removal leave
    /// nothing behind, so they render as their own command text.
    pub fn listing(&self) -> String {
        match self.op {
            Operation::NewChain => format!("-N {}", self.chain),
            Operation::Append | Operation::Insert(_) | Operation::Delete => {
                let mut line = format!("-A {}", self.chain);
                for token in &self.tokens {
                    line.push(' ');
                    line.push_str(&token.listing());
                }
                line
            }
            Operation::FlushChain | Operation::DeleteChain => self.argv().join(" "),
        }
    }
}

/// `-N SINKHOLE`
pub fn chain_declaration() -> Statement {
    Statement::new(Operation::NewChain, SINKHOLE_CHAIN)
}

/// `-A SINKHOLE -s <addr> -j RETURN`
pub fn exclusion(addr: &str) -> Statement {
    Statement::new(Operation::Append, SINKHOLE_CHAIN).plain(&["-s", addr, "-j", "RETURN"])
}

/// `-A SINKHOLE -j LOG --log-prefix <prefix>`
pub fn log(prefix: &str) -> Statement {
    Statement::new(Operation::Append, SINKHOLE_CHAIN)
        .plain(&["-j", "LOG", "--log-prefix"])
        .text(prefix)
}

/// `-A SINKHOLE -j NFLOG`
pub fn nflog() -> Statement {
    Statement::new(Operation::Append, SINKHOLE_CHAIN).plain(&["-j", "NFLOG"])
}

/// The INPUT rule routing rate-limited sinkhole traffic into the chain
///
/// Inserted at position 1 so it is evaluated before any pre-existing rule.
pub fn dispatch(config: &RuleSetConfig, addr: Ipv4Addr) -> Statement {
    let addr = addr.to_string();
    let mut stmt = Statement::new(Operation::Insert(1), "INPUT").plain(&[
        "-i",
        config.interface(),
        "-d",
        &addr,
        "-j",
        SINKHOLE_CHAIN,
        "-m",
        "hashlimit",
        "--hashlimit",
        config.hashlimit_rate(),
        "--hashlimit-burst",
        config.hashlimit_burst(),
        "--hashlimit-mode",
        config.hashlimit_mode(),
        "--hashlimit-name",
        HASHLIMIT_NAME,
        "--hashlimit-htable-expire",
        config.hashlimit_expire_ms(),
    ]);

    if config.protocol_restricted() {
        stmt = stmt.plain(&["-m", "multiport", "--protocol", config.protocol()]);
        if config.port_restricted() {
            stmt = stmt.plain(&["--dport", config.dest_port()]);
        }
    }
    stmt
}

/// `-I INPUT 1 -i <iface> -j DROP`
pub fn input_drop(interface: &str) -> Statement {
    Statement::new(Operation::Insert(1), "INPUT").plain(&["-i", interface, "-j", "DROP"])
}

/// `-I OUTPUT 1 -o <iface> -j DROP`
pub fn output_drop(interface: &str) -> Statement {
    Statement::new(Operation::Insert(1), "OUTPUT").plain(&["-o", interface, "-j", "DROP"])
}

/// `-F SINKHOLE`
pub fn flush_chain() -> Statement {
    Statement::new(Operation::FlushChain, SINKHOLE_CHAIN)
}

/// `-X SINKHOLE`
pub fn delete_chain() -> Statement {
    Statement::new(Operation::DeleteChain, SINKHOLE_CHAIN)
}

/// Listing text of both interface DROP statements, INPUT first
pub fn drop_listings(interface: &str) -> [String; 2] {
    [
        input_drop(interface).listing(),
        output_drop(interface).listing(),
    ]
}

/// Quotes a string option the way iptables' save output does
///
/// Values made only of `[A-Za-z0-9_-]` are printed bare; anything else is
/// wrapped in double quotes with `"`, `\` and `'` backslash-escaped.
pub fn save_quote(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '\'') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Splits a listing line into tokens, undoing [`save_quote`]
pub fn split_listing(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Rewrites an `-A <chain> ...` listing line into the matching `-D` argv
///
/// Only the leading `-A` is rewritten. Returns `None` for lines that are not
/// rule appends (chain declarations, policies).
pub fn to_delete_form(line: &str) -> Option<Vec<String>> {
    let tokens = split_listing(line.trim());
    if tokens.len() < 2 || tokens[0] != "-A" {
        return None;
    }
    let delete = Statement {
        op: Operation::Delete,
        chain: tokens[1].clone(),
        tokens: tokens[2..].iter().cloned().map(Token::Plain).collect(),
    };
    Some(delete.argv())
}
