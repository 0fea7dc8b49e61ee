//! External process execution.
//!
//! Every call to `helm` and `kubectl` goes through [`ProcessRunner`] so the
//! deployers can be driven by [`RecordingRunner`] in tests.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::io;
use std::process::Command;
use std::sync::Mutex;

/// Exit status and captured output of one process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Successful run printing `stdout`.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Run that exited with `exit_code` and wrote `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Stdout followed by stderr, like a terminal would show them.
    pub fn combined(&self) -> String {
        let mut text = self.stdout_str().into_owned();
        let stderr = self.stderr_str();
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }
}

/// Capability to run an external command to completion.
pub trait ProcessRunner {
    /// Run `command` with `args` and capture its exit code and output.
    ///
    /// A non-zero exit is not an error here; only failing to spawn is.
    fn run(&self, command: &str, args: &[String]) -> io::Result<ProcessOutput>;

    /// Check if `name` can be executed.
    fn command_exists(&self, name: &str) -> bool;
}

/// Runs real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &str, args: &[String]) -> io::Result<ProcessOutput> {
        log::debug!("Running: {} {}", command, args.join(" "));
        let output = Command::new(command).args(args).output()?;

        Ok(ProcessOutput {
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn command_exists(&self, name: &str) -> bool {
        Command::new(name)
            .arg("--help")
            .output()
            .is_ok()
    }
}

/// A recorded call to [`RecordingRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// The full command line, space separated.
    pub fn line(&self) -> String {
        command_line(&self.command, &self.args)
    }
}

/// Test double that returns canned responses and records every call.
///
/// Responses are looked up by the full command line first, then by the
/// longest registered prefix ending on a word boundary (so `"helm"` acts as
/// a catch-all for every helm call). Unmatched calls succeed with empty output.
/// Every command exists unless marked with [`RecordingRunner::without_command`].
#[derive(Debug, Default)]
pub struct RecordingRunner {
    responses: Mutex<HashMap<String, ProcessOutput>>,
    calls: Mutex<Vec<Invocation>>,
    missing: Mutex<HashSet<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response for a command line or command line prefix.
    pub fn respond(&self, command_line: &str, output: ProcessOutput) -> &Self {
        lock(&self.responses).insert(command_line.to_string(), output);
        self
    }

    /// Report `name` as not installed.
    pub fn without_command(&self, name: &str) -> &Self {
        lock(&self.missing).insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Command lines in call order.
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::line).collect()
    }

    /// Whether a call with exactly this command line was made.
    pub fn has_run(&self, command_line: &str) -> bool {
        self.lines().iter().any(|line| line == command_line)
    }

    /// Number of calls whose command line starts with `prefix`.
    pub fn count_matching(&self, prefix: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| matches_prefix(line, prefix))
            .count()
    }

    fn lookup(&self, line: &str) -> ProcessOutput {
        let responses = lock(&self.responses);
        if let Some(output) = responses.get(line) {
            return output.clone();
        }

        responses
            .iter()
            .filter(|(key, _)| matches_prefix(line, key))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, command: &str, args: &[String]) -> io::Result<ProcessOutput> {
        let invocation = Invocation {
            command: command.to_string(),
            args: args.to_vec(),
        };
        let line = invocation.line();
        lock(&self.calls).push(invocation);
        Ok(self.lookup(&line))
    }

    fn command_exists(&self, name: &str) -> bool {
        !lock(&self.missing).contains(name)
    }
}

/// Build an owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

fn matches_prefix(line: &str, prefix: &str) -> bool {
    line.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicking test thread must not hide the recorded calls from the others
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
