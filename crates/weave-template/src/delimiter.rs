/*
 * delimiter.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The delimiter table.
//!
//! Templates use five paired markers:
//!
//! - `{# ... #}` for expressions and statements
//! - `{% for ... %}`, `{% if ... %}`, `{% elif ... %}`, `{% else %}` and
//!   `{% end %}` for control blocks
//!
//! The table is built once per process and only read afterwards.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// The kind of a lexed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Text,
    Expr,
    For,
    If,
    Elif,
    Else,
    End,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Text => "text",
            TokenKind::Expr => "expr",
            TokenKind::For => "for",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::End => "end",
        }
    }

    /// Whether this kind opens a block that must be closed by `end`.
    pub fn opens_block(self) -> bool {
        matches!(self, TokenKind::For | TokenKind::If)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closing half of a delimiter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closer {
    /// `#}`
    Expr,
    /// `%}`
    Control,
}

impl Closer {
    pub fn as_str(self) -> &'static str {
        match self {
            Closer::Expr => "#}",
            Closer::Control => "%}",
        }
    }
}

/// A registered delimiter pair.
#[derive(Debug, Clone, Copy)]
pub struct Delimiter {
    pub kind: TokenKind,
    /// Regex source for the opening marker.
    pub open: &'static str,
    pub close: Closer,
}

/// One delimiter occurrence found in template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Open(TokenKind),
    Close(Closer),
}

/// A marker together with its byte range in the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch {
    pub marker: Marker,
    pub start: usize,
    pub end: usize,
}

const DELIMITERS: [Delimiter; 6] = [
    Delimiter {
        kind: TokenKind::Expr,
        open: r"\{#",
        close: Closer::Expr,
    },
    Delimiter {
        kind: TokenKind::For,
        open: r"\{%\s*for\b",
        close: Closer::Control,
    },
    Delimiter {
        kind: TokenKind::If,
        open: r"\{%\s*if\b",
        close: Closer::Control,
    },
    Delimiter {
        kind: TokenKind::Elif,
        open: r"\{%\s*elif\b",
        close: Closer::Control,
    },
    Delimiter {
        kind: TokenKind::Else,
        open: r"\{%\s*else\b",
        close: Closer::Control,
    },
    Delimiter {
        kind: TokenKind::End,
        open: r"\{%\s*end\b",
        close: Closer::Control,
    },
];

/// The compiled delimiter table.
pub struct DelimiterTable {
    delimiters: &'static [Delimiter],
    scanner: Regex,
}

static TABLE: Lazy<DelimiterTable> = Lazy::new(DelimiterTable::build);

impl DelimiterTable {
    /// The process-wide table.
    pub fn get() -> &'static DelimiterTable {
        &TABLE
    }

    fn build() -> Self {
        // One alternation with a named group per marker. Openers come before
        // closers so that `{#}` is read as an opener followed by text.
        let mut alternatives: Vec<String> = DELIMITERS
            .iter()
            .map(|d| format!("(?P<open_{}>{})", d.kind.as_str(), d.open))
            .collect();
        alternatives.push(r"(?P<close_expr>#\})".to_string());
        alternatives.push(r"(?P<close_control>%\})".to_string());

        let scanner =
            Regex::new(&alternatives.join("|")).expect("delimiter patterns form a valid regex");

        Self {
            delimiters: &DELIMITERS,
            scanner,
        }
    }

    pub fn delimiters(&self) -> &[Delimiter] {
        self.delimiters
    }

    /// The closer registered for an opener kind.
    pub fn closer_for(&self, kind: TokenKind) -> Option<Closer> {
        self.delimiters
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| d.close)
    }

    /// Find the first marker at or after byte offset `from`.
    pub fn find_at(&self, text: &str, from: usize) -> Option<MarkerMatch> {
        let caps = self.scanner.captures_at(text, from)?;
        for delimiter in self.delimiters {
            let group = format!("open_{}", delimiter.kind.as_str());
            if let Some(m) = caps.name(&group) {
                return Some(MarkerMatch {
                    marker: Marker::Open(delimiter.kind),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        for (group, closer) in [
            ("close_expr", Closer::Expr),
            ("close_control", Closer::Control),
        ] {
            if let Some(m) = caps.name(group) {
                return Some(MarkerMatch {
                    marker: Marker::Close(closer),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        None
    }
}
