// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor error types and the exit-code fallback parse.

use thiserror::Error;

/// Errors surfaced by executors to the scheduler.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown executor type: {0}")]
    UnknownType(String),
    #[error("invalid executor config: {0}")]
    Config(String),
    /// Non-zero process (or container/statement) exit. The message shape
    /// `exit status N` is load-bearing: the scheduler's fallback parse
    /// recovers codes from it when no structured accessor exists.
    #[error("exit status {0}")]
    ExitStatus(i32),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl ExecError {
    /// Structured exit code when this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::ExitStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Extract an exit code from the *last* `exit status N` occurrence in an
/// error message. Fallback path for executors without a structured code.
pub fn parse_exit_code(message: &str) -> Option<i32> {
    const NEEDLE: &str = "exit status ";
    let at = message.rfind(NEEDLE)?;
    let rest = &message[at + NEEDLE.len()..];
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
