//! Questions put to the operator: secret entry and yes/no confirmation.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{stdin, stdout, IsTerminal, Write};

pub trait Operator: Send + Sync {
    /// Ask for a secret without echoing it. May return an empty string.
    fn prompt_secret(&self, message: &str) -> Result<String>;

    /// Ask a yes/no question. Anything but an explicit yes is `false`.
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Check if running in interactive TTY
fn is_interactive() -> bool {
    if std::env::var_os("FLEET_NON_INTERACTIVE").is_some() {
        return false;
    }
    stdin().is_terminal() && stdout().is_terminal()
}

/// Leaves raw mode when dropped, even on early return.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Operator at a terminal.
///
/// Without a TTY nothing is asked: secrets come back empty and every
/// confirmation is declined.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn prompt_secret(&self, message: &str) -> Result<String> {
        use crossterm::event::{read, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

        if !is_interactive() {
            return Ok(String::new());
        }

        print!("{}: ", message);
        stdout().flush().ok();

        let mut secret = String::new();
        {
            let _raw = RawModeGuard::enable()?;
            loop {
                let Event::Key(KeyEvent {
                    code,
                    modifiers,
                    kind: KeyEventKind::Press,
                    ..
                }) = read()?
                else {
                    continue;
                };
                match code {
                    KeyCode::Enter => break,
                    KeyCode::Esc => return Err(Error::Aborted),
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        return Err(Error::Aborted)
                    }
                    KeyCode::Backspace => {
                        secret.pop();
                    }
                    KeyCode::Char(c) => secret.push(c),
                    _ => {}
                }
            }
        }
        println!();
        Ok(secret)
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        use crossterm::event::{read, Event, KeyCode, KeyEvent, KeyEventKind};

        if !is_interactive() {
            tracing::warn!("Not a terminal; declining: {}", message);
            return Ok(false);
        }

        print!("{} [y/N]: ", message);
        stdout().flush().ok();

        let answer = {
            let _raw = RawModeGuard::enable()?;
            loop {
                if let Event::Key(KeyEvent {
                    code,
                    kind: KeyEventKind::Press,
                    ..
                }) = read()?
                {
                    match code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n')
                        | KeyCode::Char('N')
                        | KeyCode::Char('q')
                        | KeyCode::Enter
                        | KeyCode::Esc => break false,
                        _ => {
                            // Invalid input, continue waiting
                        }
                    }
                }
            }
        };
        println!("{}", if answer { "y" } else { "n" });
        Ok(answer)
    }
}

/// Operator that replays canned answers, recording every question asked.
///
/// Runs out of answers as an empty secret / declined confirmation.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    secrets: Mutex<VecDeque<String>>,
    confirmations: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret: &str) -> Self {
        self.secrets.lock().push_back(secret.to_string());
        self
    }

    pub fn with_confirmations(self, answers: &[bool]) -> Self {
        self.confirmations.lock().extend(answers.iter().copied());
        self
    }

    /// Every prompt shown so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

impl Operator for ScriptedOperator {
    fn prompt_secret(&self, message: &str) -> Result<String> {
        self.asked.lock().push(message.to_string());
        Ok(self.secrets.lock().pop_front().unwrap_or_default())
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        self.asked.lock().push(message.to_string());
        Ok(self.confirmations.lock().pop_front().unwrap_or(false))
    }
}
