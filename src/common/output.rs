//! User-facing progress output.
//!
//! Components receive a [`Reporter`] instead of printing directly, so the
//! binary can write colored lines to the terminal while tests capture the
//! same messages with [`MemoryReporter`].

use std::sync::Mutex;

use colored::Colorize;

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

/// Sink for progress messages and blocks of tool output.
pub trait Reporter: Send + Sync {
    fn report(&self, level: Level, message: &str);

    /// Multi-line output such as diffs or rendered manifests.
    fn block(&self, text: &str);

    fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    fn success(&self, message: &str) {
        self.report(Level::Success, message);
    }

    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }
}

/// Prints to the terminal.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    debug: bool,
}

impl ConsoleReporter {
    /// `debug` enables [`Level::Debug`] messages, which may include secrets.
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::Debug => {
                if self.debug {
                    println!("{} {}", "DEBUG".magenta().bold(), message.dimmed());
                } else {
                    log::debug!("{}", message);
                }
            }
            Level::Info => println!("{}", message),
            Level::Success => println!("{}", format!("✓ {}", message).green()),
            Level::Warn => eprintln!("{} {}", "warning:".yellow().bold(), message),
            Level::Error => eprintln!("{} {}", "error:".red().bold(), message),
        }
    }

    fn block(&self, text: &str) {
        println!("{}", text);
    }
}

/// Captures messages in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<(Level, String)>>,
    blocks: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn blocks(&self) -> Vec<String> {
        self.blocks
            .lock()
            .map(|blocks| blocks.clone())
            .unwrap_or_default()
    }

    /// Whether a message at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    /// Whether any message or block, at any level, contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(_, message)| message.contains(needle))
            || self.blocks().iter().any(|block| block.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }

    fn block(&self, text: &str) {
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.push(text.to_string());
        }
    }
}

/// Color diff lines: additions green, removals red, changes yellow.
pub fn colorize_kubectl_diff(diff: &str) -> String {
    diff.split('\n')
        .map(|line| {
            if line.starts_with('+') {
                line.green().to_string()
            } else if line.starts_with('-') {
                line.red().to_string()
            } else if line.starts_with('~') {
                line.yellow().to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_keeps_line_count() {
        colored::control::set_override(true);
        let input = "+added\n-removed\n~changed\nnormal";
        let output = colorize_kubectl_diff(input);
        let lines: Vec<&str> = output.split('\n').collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "+added".green().to_string());
        assert_eq!(lines[1], "-removed".red().to_string());
        assert_eq!(lines[2], "~changed".yellow().to_string());
        assert_eq!(lines[3], "normal");
    }

    #[test]
    fn test_colorize_empty_input() {
        assert_eq!(colorize_kubectl_diff(""), "");
    }

    #[test]
    fn test_memory_reporter_captures_levels() {
        let reporter = MemoryReporter::new();
        reporter.warn("Skipping invalid YAML document");
        reporter.success("Deployment succeeded");
        reporter.block("+ added");

        assert!(reporter.contains(Level::Warn, "invalid YAML"));
        assert!(!reporter.contains(Level::Info, "invalid YAML"));
        assert!(reporter.mentions("+ added"));
        assert_eq!(reporter.entries().len(), 2);
    }
}
