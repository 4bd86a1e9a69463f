// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-pass statement splitter and row-returning detection.

/// Split a script on `;` while tracking single-quoted strings (with
/// doubled-quote escapes), double-quoted identifiers, and, for drivers
/// that support it, `$tag$…$tag$` dollar-quoted strings. Empty
/// statements are dropped.
pub fn split_statements(script: &str, dollar_quoting: bool) -> Vec<String> {
    let chars: Vec<char> = script.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    // Some("tag") while inside $tag$…$tag$.
    let mut dollar_tag: Option<String> = None;

    while i < chars.len() {
        let c = chars[i];

        if let Some(tag) = &dollar_tag {
            current.push(c);
            if c == '$' {
                let closer: String = format!("${tag}$");
                if current.ends_with(&closer) {
                    dollar_tag = None;
                }
            }
            i += 1;
            continue;
        }

        match c {
            '\'' if !in_double => {
                // Doubled quote inside a string is an escape, not a close.
                if in_single && i + 1 < chars.len() && chars[i + 1] == '\'' {
                    current.push_str("''");
                    i += 2;
                    continue;
                }
                in_single = !in_single;
                current.push(c);
                i += 1;
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
                i += 1;
            }
            '$' if dollar_quoting && !in_single && !in_double => {
                if let Some(tag_len) = dollar_tag_at(&chars[i..]) {
                    let opener: String = chars[i..i + tag_len].iter().collect();
                    dollar_tag = Some(opener[1..opener.len() - 1].to_string());
                    current.push_str(&opener);
                    i += tag_len;
                } else {
                    current.push(c);
                    i += 1;
                }
            }
            ';' if !in_single && !in_double => {
                push_statement(&mut statements, &mut current);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

/// Length of a `$tag$` opener starting at `chars[0]`, if one is present.
/// The tag is `[A-Za-z0-9_]*`, so `$$` qualifies.
fn dollar_tag_at(chars: &[char]) -> Option<usize> {
    debug_assert_eq!(chars.first(), Some(&'$'));
    let mut j = 1usize;
    while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    if j < chars.len() && chars[j] == '$' {
        Some(j + 1)
    } else {
        None
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

const ROW_PREFIXES: &[&str] = &["SELECT", "WITH", "TABLE", "VALUES", "PRAGMA"];

/// Whether a statement returns rows: a row-producing leading keyword, or
/// a `RETURNING` clause on a DML statement.
pub fn returns_rows(statement: &str) -> bool {
    let trimmed = statement.trim_start();
    let first: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    if ROW_PREFIXES.contains(&first.as_str()) {
        return true;
    }
    has_returning_clause(statement)
}

fn has_returning_clause(statement: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut word = String::new();
    for c in statement.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if !in_single && !in_double && (c.is_ascii_alphanumeric() || c == '_') => {
                word.push(c.to_ascii_uppercase());
                continue;
            }
            _ => {}
        }
        if word == "RETURNING" {
            return true;
        }
        word.clear();
    }
    word == "RETURNING"
}

#[cfg(test)]
#[path = "split_tests.rs"]
mod split_tests;
