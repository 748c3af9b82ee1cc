/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template lexer.
//!
//! Splits template source into a flat sequence of [`Token`]s: literal text
//! spans and the bodies of delimited code blocks, each tagged with the kind of
//! its opening delimiter and the line it starts on.

use crate::delimiter::{DelimiterTable, Marker, TokenKind};
use thiserror::Error;

/// A lexed span of template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Literal text, or the code between the delimiters.
    pub content: String,
    pub kind: TokenKind,
    /// 1-based line on which the span starts.
    pub line: usize,
}

impl Token {
    pub fn new(content: impl Into<String>, kind: TokenKind, line: usize) -> Self {
        Self {
            content: content.into(),
            kind,
            line,
        }
    }
}

/// Errors detected while splitting the source into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// An opening delimiter whose matching closer is not the next delimiter.
    #[error("line {line}, \"{snippet}\": code block is not terminated")]
    Unterminated { line: usize, snippet: String },

    /// A closing delimiter with no open block.
    #[error("line {line}, \"{delimiter}\": no code block to terminate")]
    NoBlockToTerminate { line: usize, delimiter: String },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::Unterminated { line, .. } | LexError::NoBlockToTerminate { line, .. } => *line,
        }
    }
}

const SNIPPET_LIMIT: usize = 40;

/// Lex template source into tokens.
///
/// Empty text spans are dropped; empty code bodies are kept.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let table = DelimiterTable::get();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;

    while let Some(found) = table.find_at(source, pos) {
        if found.start > pos {
            let text = &source[pos..found.start];
            tokens.push(Token::new(text, TokenKind::Text, line));
            line += count_newlines(text);
        }

        let kind = match found.marker {
            Marker::Open(kind) => kind,
            Marker::Close(closer) => {
                return Err(LexError::NoBlockToTerminate {
                    line,
                    delimiter: closer.as_str().to_string(),
                });
            }
        };

        let expected = table.closer_for(kind);
        let closing = table
            .find_at(source, found.end)
            .filter(|next| Some(next.marker) == expected.map(Marker::Close));
        let Some(closing) = closing else {
            let stop = table
                .find_at(source, found.end)
                .map_or(source.len(), |next| next.start);
            return Err(LexError::Unterminated {
                line,
                snippet: snippet(&source[found.start..stop]),
            });
        };

        tokens.push(Token::new(&source[found.end..closing.start], kind, line));
        line += count_newlines(&source[found.start..closing.end]);
        pos = closing.end;
    }

    if pos < source.len() {
        tokens.push(Token::new(&source[pos..], TokenKind::Text, line));
    }

    tracing::debug!(tokens = tokens.len(), lines = line, "lexed template");
    Ok(tokens)
}

fn count_newlines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

fn snippet(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > SNIPPET_LIMIT {
        let cut: String = first_line.chars().take(SNIPPET_LIMIT).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}
