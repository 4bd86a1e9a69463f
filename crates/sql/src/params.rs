// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parameter rewriting: named `:name` references to driver placeholders,
//! positional validation, and identifier sanitization.

use crate::driver::Placeholder;
use crate::error::SqlError;
use crate::value::Value;

fn ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `:name` references to the driver's placeholder form.
///
/// Numbered drivers (`$N`) assign each name one number on first sight and
/// reuse it, so the value vector carries no duplicates. Positional
/// drivers (`?`) re-append the value at every occurrence. String and
/// quoted-identifier contents, and `::type` casts, are left untouched.
pub fn convert_named(
    query: &str,
    params: &[(String, Value)],
    placeholder: Placeholder,
) -> Result<(String, Vec<Value>), SqlError> {
    let mut out = String::with_capacity(query.len());
    let mut values: Vec<Value> = Vec::new();
    // Name → assigned number for the numbered form.
    let mut numbered: Vec<String> = Vec::new();

    let chars: Vec<char> = query.chars().collect();
    let mut i = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
                i += 1;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
                i += 1;
            }
            ':' if !in_single && !in_double => {
                // `::` casts pass through whole.
                if i + 1 < chars.len() && chars[i + 1] == ':' {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                if i + 1 < chars.len() && ident_start(chars[i + 1]) {
                    let mut j = i + 1;
                    while j < chars.len() && ident_char(chars[j]) {
                        j += 1;
                    }
                    let name: String = chars[i + 1..j].iter().collect();
                    let value = params
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| SqlError::MissingParam(name.clone()))?;
                    match placeholder {
                        Placeholder::Dollar => {
                            let number = match numbered.iter().position(|n| *n == name) {
                                Some(at) => at + 1,
                                None => {
                                    numbered.push(name);
                                    values.push(value);
                                    numbered.len()
                                }
                            };
                            out.push_str(&format!("${number}"));
                        }
                        Placeholder::Question => {
                            out.push('?');
                            values.push(value);
                        }
                    }
                    i = j;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok((out, values))
}

/// Number of placeholders a query expects. For `$N` drivers this is the
/// maximum N observed; for `?` drivers, the count outside strings.
pub fn count_placeholders(query: &str, placeholder: Placeholder) -> usize {
    match placeholder {
        Placeholder::Dollar => {
            let mut max = 0usize;
            let bytes: Vec<char> = query.chars().collect();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] == '$' {
                    let mut j = i + 1;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                    if j > i + 1 {
                        let n: usize = bytes[i + 1..j]
                            .iter()
                            .collect::<String>()
                            .parse()
                            .unwrap_or(0);
                        max = max.max(n);
                    }
                    i = j;
                } else {
                    i += 1;
                }
            }
            max
        }
        Placeholder::Question => {
            let mut count = 0usize;
            let mut in_single = false;
            let mut in_double = false;
            for c in query.chars() {
                match c {
                    '\'' if !in_double => in_single = !in_single,
                    '"' if !in_single => in_double = !in_double,
                    '?' if !in_single && !in_double => count += 1,
                    _ => {}
                }
            }
            count
        }
    }
}

/// Validate that a positional parameter list matches the query shape.
pub fn validate_positional(
    query: &str,
    placeholder: Placeholder,
    given: usize,
) -> Result<(), SqlError> {
    let expected = count_placeholders(query, placeholder);
    if expected != given {
        return Err(SqlError::ParamCount { expected, given });
    }
    Ok(())
}

/// Identifiers interpolated into queries allow only `[A-Za-z0-9_.]` and
/// must not start with a digit.
pub fn sanitize_identifier(name: &str) -> Result<&str, SqlError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(SqlError::BadIdentifier(name.to_string()));
    };
    if first.is_ascii_digit() {
        return Err(SqlError::BadIdentifier(name.to_string()));
    }
    let valid =
        |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';
    if !valid(first) || !chars.all(valid) {
        return Err(SqlError::BadIdentifier(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod params_tests;
