use color_eyre::Result;
use color_eyre::eyre::eyre;
use std::collections::VecDeque;
use std::io::{BufRead, Write, stdout};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Where interactive answers come from.
pub trait Prompt {
    /// Reads a value without echo.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal can't be read.
    fn secret(&self, label: &str) -> Result<Zeroizing<String>>;

    /// Reads a visible line.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal can't be read.
    fn line(&self, label: &str) -> Result<String>;

    /// Asks twice and fails when the answers differ.
    ///
    /// # Errors
    ///
    /// Returns an error on mismatch or read failure.
    fn new_password(&self) -> Result<Zeroizing<String>> {
        let password = self.secret("New wallet password: ")?;
        let confirm = self.secret("Confirm password: ")?;
        if *password != *confirm {
            return Err(eyre!("Passwords do not match"));
        }
        Ok(password)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn secret(&self, label: &str) -> Result<Zeroizing<String>> {
        print!("{label}");
        stdout().flush()?;
        // Read without echo on Windows/Linux/macOS
        Ok(Zeroizing::new(rpassword::prompt_password("")?))
    }

    fn line(&self, label: &str) -> Result<String> {
        print!("{label}");
        stdout().flush()?;
        let mut buf = String::new();
        std::io::stdin().lock().read_line(&mut buf)?;
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Replays canned answers in order. Used by tests and scripted runs.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }

    fn next(&self, label: &str) -> Result<String> {
        self.answers
            .lock()
            .map_err(|_| eyre!("prompt script poisoned"))?
            .pop_front()
            .ok_or_else(|| eyre!("no scripted answer for prompt {label:?}"))
    }
}

impl Prompt for ScriptedPrompt {
    fn secret(&self, label: &str) -> Result<Zeroizing<String>> {
        self.next(label).map(Zeroizing::new)
    }

    fn line(&self, label: &str) -> Result<String> {
        self.next(label)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_new_password_requires_match() {
        let p = ScriptedPrompt::new(["a", "a"]);
        assert_eq!(p.new_password().unwrap().as_str(), "a");

        let p = ScriptedPrompt::new(["a", "b"]);
        assert!(p.new_password().unwrap_err().to_string().contains("do not match"));
    }

    #[test]
    fn test_exhausted_script_errors() {
        let p = ScriptedPrompt::new(Vec::<String>::new());
        assert!(p.line("x").is_err());
    }
}
