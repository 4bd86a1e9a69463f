// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router patterns: compile-once successor selection rules.

use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of a `/…/` route pattern body.
pub const MAX_REGEX_LEN: usize = 1000;
/// Maximum length of an expression route pattern.
pub const MAX_EXPR_LEN: usize = 2048;
/// Wall-clock guard around regex compilation.
pub const REGEX_COMPILE_GUARD: Duration = Duration::from_secs(5);

const EXPR_MARKERS: &[&str] = &["==", "!=", "&&", "||", ">=", "<=", "@value", "@exitCode"];
const EXPR_FORBIDDEN: &[&str] = &["system(", "exec(", "shell(", "eval(", "__", "reflect."];

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("route regex too long ({len} > {MAX_REGEX_LEN}): {pattern}")]
    RegexTooLong { pattern: String, len: usize },
    #[error("invalid route regex {pattern}: {message}")]
    BadRegex { pattern: String, message: String },
    #[error("route regex compilation exceeded {REGEX_COMPILE_GUARD:?}: {pattern}")]
    RegexCompileTimeout { pattern: String },
    #[error("route expression too long ({len} > {MAX_EXPR_LEN})")]
    ExprTooLong { len: usize },
    #[error("unbalanced quotes or parens in route expression: {0}")]
    ExprUnbalanced(String),
    #[error("forbidden construct {construct:?} in route expression")]
    ExprForbidden { construct: String },
    #[error("expression evaluation failed: {0}")]
    ExprEval(String),
}

/// Consumed boundary: the host-provided evaluator for expression patterns.
///
/// Compilation validates expressions once (§DESIGN.md decision 1); the
/// cached form is handed to the evaluator verbatim at match time.
pub trait ExpressionEval: Send + Sync {
    fn eval(&self, expr: &str, value: &str, exit_code: i32) -> Result<bool, RouterError>;
}

/// Router mode: first match wins, or every match selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    #[default]
    Exclusive,
    MultiSelect,
}

crate::simple_display! {
    RouterMode {
        Exclusive => "exclusive",
        MultiSelect => "multi_select",
    }
}

/// One route: raw pattern text plus the steps it makes eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub pattern: String,
    pub next: Vec<String>,
}

/// Router configuration attached to a step.
///
/// `value` is the expression resolved against the node's captured output
/// before matching (e.g. `${STATUS}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub value: String,
    #[serde(default)]
    pub mode: RouterMode,
    pub routes: Vec<Route>,
    #[serde(default)]
    pub default: Vec<String>,
}

impl RouterConfig {
    /// All step names this router can make eligible (routes + default).
    pub fn all_targets(&self) -> impl Iterator<Item = &str> {
        self.routes
            .iter()
            .flat_map(|r| r.next.iter())
            .chain(self.default.iter())
            .map(String::as_str)
    }

    /// Compile every pattern once. Called at DAG build time; the compiled
    /// router is cached for the lifetime of the run.
    pub fn compile(&self) -> Result<CompiledRouter, RouterError> {
        let mut routes = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            routes.push((RouterPattern::compile(&route.pattern)?, route.next.clone()));
        }
        Ok(CompiledRouter {
            mode: self.mode,
            routes,
            default: self.default.clone(),
        })
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub enum RouterPattern {
    /// Plain string equality.
    Literal(String),
    /// `/…/` regex, compiled once.
    Regex(regex::Regex),
    /// `[a,b,c]` membership.
    Membership(Vec<String>),
    /// Validated expression source, delegated to [`ExpressionEval`].
    Expression(String),
}

impl RouterPattern {
    pub fn compile(raw: &str) -> Result<Self, RouterError> {
        if let Some(inner) = crate::dag::regex_literal(raw) {
            if inner.len() > MAX_REGEX_LEN {
                return Err(RouterError::RegexTooLong {
                    pattern: raw.to_string(),
                    len: inner.len(),
                });
            }
            return Ok(RouterPattern::Regex(compile_guarded(inner)?));
        }
        if raw.len() >= 2 && raw.starts_with('[') && raw.ends_with(']') {
            let values = raw[1..raw.len() - 1]
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            return Ok(RouterPattern::Membership(values));
        }
        if EXPR_MARKERS.iter().any(|m| raw.contains(m)) {
            validate_expression(raw)?;
            return Ok(RouterPattern::Expression(raw.to_string()));
        }
        Ok(RouterPattern::Literal(raw.to_string()))
    }

    /// Match the resolved router value (and exit code) against this pattern.
    ///
    /// Expression patterns require an evaluator; without one they never
    /// match and the caller is expected to log.
    pub fn matches(
        &self,
        value: &str,
        exit_code: i32,
        eval: Option<&dyn ExpressionEval>,
    ) -> Result<bool, RouterError> {
        match self {
            RouterPattern::Literal(s) => Ok(s == value),
            RouterPattern::Regex(re) => Ok(re.is_match(value)),
            RouterPattern::Membership(vals) => Ok(vals.iter().any(|v| v == value)),
            RouterPattern::Expression(src) => match eval {
                Some(e) => e.eval(src, value, exit_code),
                None => Ok(false),
            },
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, RouterPattern::Expression(_))
    }
}

/// Compiled router: patterns ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRouter {
    pub mode: RouterMode,
    pub routes: Vec<(RouterPattern, Vec<String>)>,
    pub default: Vec<String>,
}

impl CompiledRouter {
    /// Select eligible successor names for the resolved value.
    ///
    /// Exclusive mode stops at the first matching route; multi-select
    /// collects every match. No match selects the default.
    pub fn select(
        &self,
        value: &str,
        exit_code: i32,
        eval: Option<&dyn ExpressionEval>,
    ) -> Result<Vec<String>, RouterError> {
        let mut selected = Vec::new();
        for (pattern, next) in &self.routes {
            if pattern.matches(value, exit_code, eval)? {
                selected.extend(next.iter().cloned());
                if self.mode == RouterMode::Exclusive {
                    return Ok(selected);
                }
            }
        }
        if selected.is_empty() {
            selected.extend(self.default.iter().cloned());
        }
        Ok(selected)
    }
}

// Pathological patterns can hang the regex parser; compile on a helper
// thread and give up after the wall-clock guard. A timed-out thread is
// left to finish on its own.
fn compile_guarded(pattern: &str) -> Result<regex::Regex, RouterError> {
    let (tx, rx) = mpsc::channel();
    let source = pattern.to_string();
    std::thread::spawn(move || {
        let _ = tx.send(regex::Regex::new(&source));
    });
    match rx.recv_timeout(REGEX_COMPILE_GUARD) {
        Ok(Ok(re)) => Ok(re),
        Ok(Err(e)) => Err(RouterError::BadRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(RouterError::RegexCompileTimeout { pattern: pattern.to_string() }),
    }
}

fn validate_expression(raw: &str) -> Result<(), RouterError> {
    if raw.len() > MAX_EXPR_LEN {
        return Err(RouterError::ExprTooLong { len: raw.len() });
    }
    for construct in EXPR_FORBIDDEN {
        if raw.contains(construct) {
            return Err(RouterError::ExprForbidden { construct: construct.to_string() });
        }
    }
    let mut depth: i64 = 0;
    let mut in_single = false;
    let mut in_double = false;
    for ch in raw.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => depth += 1,
            ')' if !in_single && !in_double => {
                depth -= 1;
                if depth < 0 {
                    return Err(RouterError::ExprUnbalanced(raw.to_string()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 || in_single || in_double {
        return Err(RouterError::ExprUnbalanced(raw.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
