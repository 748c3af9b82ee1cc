/*
 * structure.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Block structurer.
//!
//! Rebuilds nested control blocks from the flat token sequence produced by
//! the lexer. For every `for`/`if` token it finds the matching `elif`,
//! `else` and `end` tokens at the same nesting depth and recursively
//! structures each branch body.

use crate::ast::{
    Branch, ExprNode, ForNode, Fragment, IfChainNode, LoopHeader, Node, TextNode, guard_fragment,
};
use crate::delimiter::TokenKind;
use crate::error::TemplateResult;
use crate::indent::gobble;
use crate::lexer::{Token, lex};
use thiserror::Error;

/// Errors in the nesting of control blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    /// `elif` or `else` inside a `for` block.
    #[error("line {line}: \"for\" cannot be followed by \"{found}\"")]
    LoopBranch { line: usize, found: TokenKind },

    /// `elif` or `else` after the `else` branch of a chain.
    #[error("line {line}: \"{found}\" cannot follow \"else\"")]
    BranchAfterElse { line: usize, found: TokenKind },

    /// A control block without its `end`.
    #[error("line {line}: control statement \"{keyword}\" is not terminated")]
    UnterminatedControl { line: usize, keyword: TokenKind },

    /// `end` with no open control block.
    #[error("line {line}: no control statement to terminate")]
    StrayEnd { line: usize },

    /// A token that cannot appear where it was found.
    #[error("line {line}: unexpected \"{kind}\"")]
    UnexpectedToken { line: usize, kind: TokenKind },

    /// A `for` header that is neither `name = bounds` nor `names in explist`.
    #[error("line {line}: malformed loop header \"{header}\"")]
    MalformedLoop { line: usize, header: String },
}

impl StructureError {
    pub fn line(&self) -> usize {
        match self {
            StructureError::LoopBranch { line, .. }
            | StructureError::BranchAfterElse { line, .. }
            | StructureError::UnterminatedControl { line, .. }
            | StructureError::StrayEnd { line }
            | StructureError::UnexpectedToken { line, .. }
            | StructureError::MalformedLoop { line, .. } => *line,
        }
    }
}

/// The result of scanning for the token that closes one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enclosed<'t> {
    /// Index of the terminating token.
    pub end: usize,
    pub terminator: TokenKind,
    /// Tokens between the header and the terminator.
    pub body: &'t [Token],
}

/// One branch of a control block, still as tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchSpan<'t> {
    pub kind: TokenKind,
    /// Guard source for `for`/`if`/`elif`; `None` for `else`.
    pub guard: Option<&'t str>,
    pub body: &'t [Token],
    pub line: usize,
}

/// Find the token that closes the branch opened at `header`.
///
/// Nested `for`/`if` tokens increase the depth and `end` decreases it. The
/// branch closes when the depth drops back to zero, or when an `elif` or
/// `else` appears at depth one. Returns `None` when the tokens run out first.
pub fn enclosing_block(tokens: &[Token], header: usize) -> Option<Enclosed<'_>> {
    let mut depth = 1usize;
    for (end, token) in tokens.iter().enumerate().skip(header + 1) {
        if token.kind.opens_block() {
            depth += 1;
        } else if token.kind == TokenKind::End {
            depth -= 1;
        }
        let separator = matches!(token.kind, TokenKind::Elif | TokenKind::Else);
        if depth == 0 || (depth == 1 && separator) {
            return Some(Enclosed {
                end,
                terminator: token.kind,
                body: &tokens[header + 1..end],
            });
        }
    }
    None
}

/// Split the control block opened at `header` into its branches.
///
/// Returns the branches in order and the index of the closing `end` token.
pub fn split_branches(
    tokens: &[Token],
    header: usize,
) -> Result<(Vec<BranchSpan<'_>>, usize), StructureError> {
    let opener = &tokens[header];
    let mut branches = Vec::new();
    let mut current = header;
    let mut kind = opener.kind;
    let mut guard = Some(opener.content.as_str());

    loop {
        let enclosed =
            enclosing_block(tokens, current).ok_or(StructureError::UnterminatedControl {
                line: opener.line,
                keyword: opener.kind,
            })?;
        branches.push(BranchSpan {
            kind,
            guard,
            body: enclosed.body,
            line: tokens[current].line,
        });

        let terminator = &tokens[enclosed.end];
        match terminator.kind {
            TokenKind::End => {
                warn_ignored(terminator);
                return Ok((branches, enclosed.end));
            }
            TokenKind::Elif | TokenKind::Else if opener.kind == TokenKind::For => {
                return Err(StructureError::LoopBranch {
                    line: terminator.line,
                    found: terminator.kind,
                });
            }
            TokenKind::Elif | TokenKind::Else if kind == TokenKind::Else => {
                return Err(StructureError::BranchAfterElse {
                    line: terminator.line,
                    found: terminator.kind,
                });
            }
            TokenKind::Elif => guard = Some(terminator.content.as_str()),
            TokenKind::Else => {
                warn_ignored(terminator);
                guard = None;
            }
            other => {
                return Err(StructureError::UnexpectedToken {
                    line: terminator.line,
                    kind: other,
                });
            }
        }
        kind = terminator.kind;
        current = enclosed.end;
    }
}

fn warn_ignored(token: &Token) {
    let extra = token.content.trim();
    if !extra.is_empty() {
        tracing::warn!(
            line = token.line,
            keyword = %token.kind,
            ignored = extra,
            "ignoring text after control keyword"
        );
    }
}

/// Lex and structure template source.
pub fn parse(source: &str) -> TemplateResult<Vec<Node>> {
    let tokens = lex(source)?;
    let nodes = build(&tokens)?;
    tracing::debug!(tokens = tokens.len(), nodes = nodes.len(), "structured template");
    Ok(nodes)
}

/// Build the template tree from a token sequence.
pub fn build(tokens: &[Token]) -> TemplateResult<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut idx = 0;

    while idx < tokens.len() {
        let token = &tokens[idx];
        match token.kind {
            TokenKind::Text => {
                nodes.push(Node::Text(TextNode {
                    text: token.content.clone(),
                    line: token.line,
                }));
                idx += 1;
            }
            TokenKind::Expr => {
                let source = gobble(&token.content, token.line)?;
                nodes.push(Node::Expr(ExprNode {
                    fragment: Fragment::new(source, token.line),
                }));
                idx += 1;
            }
            TokenKind::For | TokenKind::If => {
                let (branches, end) = split_branches(tokens, idx)?;
                nodes.push(block_node(token, &branches)?);
                idx = end + 1;
            }
            TokenKind::End => return Err(StructureError::StrayEnd { line: token.line }.into()),
            TokenKind::Elif | TokenKind::Else => {
                return Err(StructureError::UnexpectedToken {
                    line: token.line,
                    kind: token.kind,
                }
                .into());
            }
        }
    }

    Ok(nodes)
}

fn block_node(opener: &Token, branches: &[BranchSpan<'_>]) -> TemplateResult<Node> {
    if opener.kind == TokenKind::For {
        // split_branches rejects elif/else after a loop header
        let body = branches.first().map_or(&[][..], |b| b.body);
        return Ok(Node::For(ForNode {
            header: LoopHeader::parse(&opener.content, opener.line)?,
            body: build(body)?,
            line: opener.line,
        }));
    }

    let branches = branches
        .iter()
        .map(|span| {
            Ok(Branch {
                guard: span.guard.map(|g| guard_fragment(g, span.line)),
                body: build(span.body)?,
            })
        })
        .collect::<TemplateResult<Vec<_>>>()?;
    Ok(Node::IfChain(IfChainNode {
        branches,
        line: opener.line,
    }))
}
