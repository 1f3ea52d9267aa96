//! External command execution
//!
//! Everything nfsinkhole does to the host goes through a [`CommandRunner`]:
//! iptables listings and mutations, installing config files, restarting
//! daemons. The runner only executes and captures; it never interprets
//! output. Interpretation (what counts as failure) lives in [`run_checked`]
//! so that tests can substitute a scripted runner without changing semantics.

use crate::core::error::{Error, Result};
use std::io;
use std::process::Command;
use tracing::{debug, error};

/// Captured result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout decoded as ASCII, non-ASCII bytes dropped
    pub fn stdout_text(&self) -> String {
        ascii_lossy(&self.stdout)
    }

    /// Stderr decoded as ASCII, non-ASCII bytes dropped
    pub fn stderr_text(&self) -> String {
        ascii_lossy(&self.stderr)
    }
}

fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| char::from(b))
        .collect()
}

/// Executes an argument vector and captures its output
pub trait CommandRunner {
    /// Runs `argv` (program first). `elevate` requests privilege escalation;
    /// implementations skip it when the process is already privileged.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when the command could not be started at all.
    fn run(&self, argv: &[String], elevate: bool) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, argv: &[String], elevate: bool) -> io::Result<CommandOutput> {
        (**self).run(argv, elevate)
    }
}

/// Runs commands on the host with `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], elevate: bool) -> io::Result<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command line",
            ));
        };

        let mut cmd = if elevate {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            crate::elevation::create_elevated_command(program, &args).map_err(io::Error::other)?
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };

        let output = cmd.output()?;
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }
}

/// Joins an argument vector for logs and error messages
pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs a command, logging its output line by line
///
/// A command that cannot be started is always a `RunFailure`. With
/// `raise_err`, any stderr output or a non-zero exit is a `RunFailure` too;
/// without it the output is returned for the caller to judge.
///
/// # Errors
///
/// Returns `Error::RunFailure` as described above.
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    argv: &[String],
    elevate: bool,
    raise_err: bool,
) -> Result<CommandOutput> {
    let command = render(argv);
    debug!("Running: {command}");

    let output = runner.run(argv, elevate).map_err(|e| Error::RunFailure {
        command: command.clone(),
        diagnostic: format!("could not run process: {e}"),
        exit_code: None,
    })?;

    for line in output.stdout_text().lines() {
        debug!("[{command}] {line}");
    }
    let stderr = output.stderr_text();
    for line in stderr.lines() {
        error!("[{command}] {line}");
    }

    if raise_err && (!stderr.trim().is_empty() || !output.success()) {
        let diagnostic = if stderr.trim().is_empty() {
            match output.exit_code {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.trim().to_string()
        };
        return Err(Error::RunFailure {
            command,
            diagnostic,
            exit_code: output.exit_code,
        });
    }

    Ok(output)
}
