// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal name mapping for step stop configuration.

use nix::sys::signal::Signal;
use std::str::FromStr;

/// Resolve a configured signal name (`SIGTERM`, `TERM`, `15`) to a signal.
/// Unknown names fall back to SIGTERM, the default stop signal.
pub fn signal_from_name(name: &str) -> Signal {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Signal::SIGTERM;
    }
    if let Ok(num) = trimmed.parse::<i32>() {
        if let Ok(sig) = Signal::try_from(num) {
            return sig;
        }
    }
    let upper = trimmed.to_ascii_uppercase();
    let with_prefix =
        if upper.starts_with("SIG") { upper.clone() } else { format!("SIG{upper}") };
    Signal::from_str(&with_prefix).unwrap_or(Signal::SIGTERM)
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod signal_tests;
