//! Yes/no gate in front of cluster mutations.

use std::io::IsTerminal;
use std::sync::Mutex;

use inquire::Confirm;

/// Asks whether a deployment may proceed.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Interactive prompt on the controlling terminal.
///
/// Approves without asking when `auto_approve` is set or stdin is not a
/// terminal (CI pipelines).
#[derive(Debug, Clone, Default)]
pub struct TerminalConfirmation {
    auto_approve: bool,
}

impl TerminalConfirmation {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }
}

impl Confirmation for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        if self.auto_approve {
            log::info!("Auto-approving: {}", prompt);
            return true;
        }

        if !std::io::stdin().is_terminal() {
            log::info!("Non-interactive session, approving: {}", prompt);
            return true;
        }

        match Confirm::new(prompt).with_default(false).prompt() {
            Ok(answer) => answer,
            Err(e) => {
                log::debug!("Confirmation prompt aborted: {}", e);
                false
            }
        }
    }
}

/// Fixed answer, remembering every prompt it was asked.
#[derive(Debug, Default)]
pub struct StaticConfirmation {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl StaticConfirmation {
    pub fn approve() -> Self {
        Self {
            answer: true,
            prompts: Mutex::default(),
        }
    }

    pub fn reject() -> Self {
        Self {
            answer: false,
            prompts: Mutex::default(),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

impl Confirmation for StaticConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_approve_skips_prompt() {
        assert!(TerminalConfirmation::new(true).confirm("Deploy?"));
    }

    #[test]
    fn test_static_confirmation_counts_prompts() {
        let gate = StaticConfirmation::reject();
        assert!(!gate.confirm("Deploy?"));
        assert!(!gate.confirm("Deploy again?"));
        assert_eq!(gate.times_asked(), 2);
    }
}
