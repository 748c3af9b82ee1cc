/*
 * indent.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Removal of the common leading indentation of expression fragments.

use thiserror::Error;

/// A fragment line that does not share the fragment's indentation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: \"{text}\" is not indented by {width} columns")]
pub struct IndentationError {
    /// Template line of the offending fragment line.
    pub line: usize,
    pub text: String,
    pub width: usize,
}

/// Strip the indentation of the first non-blank line from every line.
///
/// Tabs count as four spaces. Blank lines become empty. When the first
/// non-blank line is not indented, the code is returned unchanged. `line` is
/// the template line the fragment starts on and is only used for errors.
pub fn gobble(code: &str, line: usize) -> Result<String, IndentationError> {
    let mut prefix: Option<String> = None;
    let mut lines = Vec::new();

    for (offset, raw) in code.lines().enumerate() {
        if raw.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let expanded = raw.replace('\t', "    ");
        let indent = prefix.get_or_insert_with(|| {
            expanded
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect::<String>()
        });
        if indent.is_empty() {
            return Ok(code.to_string());
        }
        match expanded.strip_prefix(indent.as_str()) {
            Some(rest) => lines.push(rest.to_string()),
            None => {
                return Err(IndentationError {
                    line: line + offset,
                    text: expanded.trim_end().to_string(),
                    width: indent.chars().count(),
                });
            }
        }
    }

    Ok(lines.join("\n"))
}
