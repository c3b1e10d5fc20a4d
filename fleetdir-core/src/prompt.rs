//! Interactive input for passwords and first-run identity details.

use std::io::{self, BufRead, Write};
use thiserror::Error;

use crate::store::Secret;

/// Error type for prompting.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Input was closed before a line was entered.
    #[error("input closed while waiting for {what}")]
    Closed { what: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Source of interactive user input.
pub trait Prompt {
    /// Show a status line to the user.
    fn notify(&mut self, message: &str);

    /// Ask for a line of visible text. The trailing newline is removed.
    fn read_line(&mut self, prompt: &str) -> Result<String, PromptError>;

    /// Ask for a password without echoing it.
    fn read_password(&mut self, prompt: &str) -> Result<Secret, PromptError>;
}

/// Prompts on the controlling terminal.
///
/// Messages go to stderr so stdout stays free for the fleet tool's output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn notify(&mut self, message: &str) {
        eprintln!("{}", message);
    }

    fn read_line(&mut self, prompt: &str) -> Result<String, PromptError> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", prompt)?;
        stderr.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(PromptError::Closed {
                what: prompt.trim().trim_end_matches(':').to_string(),
            });
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_password(&mut self, prompt: &str) -> Result<Secret, PromptError> {
        Ok(Secret::new(rpassword::prompt_password(prompt)?))
    }
}
