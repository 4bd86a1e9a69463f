// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid container config: {0}")]
    Config(String),
    #[error("container runtime api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("image pull failed for {image}: {message}")]
    Pull { image: String, message: String },
    #[error("container {id} not ready after {seconds}s: {state}")]
    ReadyTimeout {
        id: String,
        seconds: u64,
        state: String,
    },
    #[error("container {id} entered terminal state {state} before becoming ready")]
    FailedEarly { id: String, state: String },
    #[error("log stream ended before pattern {pattern:?} matched")]
    PatternNotSeen { pattern: String },
    #[error("container {0} is not running")]
    NotRunning(String),
    #[error("cancelled")]
    Cancelled,
    #[error("bad platform string {0:?}")]
    BadPlatform(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed runtime response: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for ContainerError {
    fn from(e: serde_json::Error) -> Self {
        ContainerError::Protocol(e.to_string())
    }
}
