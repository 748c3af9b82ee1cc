/*
 * diagnostics.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Source listings for failed renders.

use colored::Colorize;
use once_cell::sync::Lazy;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lines of context shown on each side of the failing line.
pub const DISPLAY_LINES: usize = 2;

static COLOR: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(detect_color()));

fn detect_color() -> bool {
    std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").is_ok_and(|term| term.contains("color"))
}

/// Whether diagnostics are colored by default.
pub fn color_enabled() -> bool {
    COLOR.load(Ordering::Relaxed)
}

/// Force diagnostics coloring on or off for the whole process.
pub fn set_color_enabled(enabled: bool) {
    COLOR.store(enabled, Ordering::Relaxed);
    colored::control::set_override(enabled);
}

/// Format an error message with the source lines around `line`.
///
/// ```text
/// *** Error occurred in file "page.tmpl":
/// page.tmpl, line 3: attempt to call a nil value (global 'f')
/// *** Source:
///       1 | ...
///       2 | x = 1
/// -->   3 | {# f() #}
/// ```
pub fn format_exception(file: &str, message: &str, source: &str, line: usize, color: bool) -> String {
    let mut out = String::new();
    let header = format!("*** Error occurred in file \"{file}\":");
    let _ = writeln!(out, "{}", paint(&header, color, |s| s.red()));
    let _ = writeln!(out, "{message}");
    let _ = writeln!(out, "{}", paint("*** Source:", color, |s| s.red()));

    for (idx, text) in source.lines().enumerate() {
        let number = idx + 1;
        let distance = number.abs_diff(line);
        if distance == DISPLAY_LINES + 1 {
            let _ = writeln!(out, "   {number:4} | ...");
        } else if distance > DISPLAY_LINES {
            continue;
        } else if number == line {
            let marker = format!("-->{number:4}");
            let _ = writeln!(
                out,
                "{} | {}",
                paint(&marker, color, |s| s.green()),
                paint(text, color, |s| s.yellow())
            );
        } else {
            let _ = writeln!(out, "   {number:4} | {text}");
        }
    }
    out
}

fn paint(text: &str, color: bool, style: fn(&str) -> colored::ColoredString) -> String {
    if color {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven";

    #[test]
    fn test_window_around_failing_line() {
        let listing = format_exception("page.tmpl", "boom", SOURCE, 4, false);
        let expected = [
            "*** Error occurred in file \"page.tmpl\":",
            "boom",
            "*** Source:",
            "      1 | ...",
            "      2 | two",
            "      3 | three",
            "-->   4 | four",
            "      5 | five",
            "      6 | six",
            "      7 | ...",
        ];
        assert_eq!(listing, format!("{}\n", expected.join("\n")));
    }

    #[test]
    fn test_window_at_first_line() {
        let listing = format_exception("t", "m", SOURCE, 1, false);
        let source_lines: Vec<&str> = listing.lines().skip(3).collect();
        assert_eq!(
            source_lines,
            vec!["-->   1 | one", "      2 | two", "      3 | three", "      4 | ..."]
        );
    }

    #[test]
    fn test_colored_listing_keeps_text() {
        let listing = format_exception("t", "m", SOURCE, 2, true);
        assert!(listing.contains("two"));
        assert!(listing.contains("*** Source:"));
    }
}
