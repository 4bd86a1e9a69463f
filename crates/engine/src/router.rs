// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router value resolution against a node's captured output.

use skein_core::Node;

/// Expand `${NAME}` references in a router value expression from the
/// node's captured output variables. `${exitCode}` resolves to the step's
/// exit code; unknown names resolve to the empty string.
pub fn resolve_value(template: &str, node: &Node, exit_code: i32) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if name == "exitCode" {
                    out.push_str(&exit_code.to_string());
                } else if let Some(value) = node.output_value(name) {
                    out.push_str(value);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference; keep it verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
