// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global executor registry: type string → factory + capability flags.

use crate::contract::{ExecContext, Executor};
use crate::error::ExecError;
use parking_lot::RwLock;
use skein_core::Step;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Capability bitset advertised by a registered executor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Runs a command + args.
    pub const COMMAND: Capabilities = Capabilities(1);
    /// Accepts an inline script body.
    pub const SCRIPT: Capabilities = Capabilities(1 << 1);
    /// Carries chat context (agent back-end).
    pub const AGENT: Capabilities = Capabilities(1 << 2);

    pub fn has(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

/// Factory invoked once per step start. Returns a `Box` so the caller can
/// still set writers through `&mut` before sharing the executor.
pub type Factory =
    Arc<dyn Fn(&ExecContext, &Step) -> Result<Box<dyn Executor>, ExecError> + Send + Sync>;

struct Entry {
    factory: Factory,
    caps: Capabilities,
}

fn registry() -> &'static RwLock<HashMap<String, Entry>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a factory for an executor type. Registration happens at
/// process start; re-registering a name replaces the previous entry.
pub fn register(kind: &str, caps: Capabilities, factory: Factory) {
    registry().write().insert(kind.to_string(), Entry { factory, caps });
}

/// Instantiate an executor for a step. Unknown types are a fatal
/// configuration error.
pub fn create(kind: &str, ctx: &ExecContext, step: &Step) -> Result<Box<dyn Executor>, ExecError> {
    let entry = registry().read().get(kind).map(|e| e.factory.clone());
    match entry {
        Some(factory) => factory(ctx, step),
        None => Err(ExecError::UnknownType(kind.to_string())),
    }
}

pub fn capabilities(kind: &str) -> Option<Capabilities> {
    registry().read().get(kind).map(|e| e.caps)
}

pub fn is_registered(kind: &str) -> bool {
    registry().read().contains_key(kind)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
