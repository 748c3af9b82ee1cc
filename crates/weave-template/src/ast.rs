/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! The block structurer turns the flat token sequence into this tree once per
//! render; the renderer walks it without re-reading the source.

use crate::structure::StructureError;
use once_cell::sync::Lazy;
use regex::Regex;

/// A node in the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, emitted as-is.
    Text(TextNode),

    /// Expression or statement fragment: `{# ... #}`
    Expr(ExprNode),

    /// Loop: `{% for ... %}...{% end %}`
    For(ForNode),

    /// Conditional chain: `{% if ... %}...{% elif ... %}...{% else %}...{% end %}`
    IfChain(IfChainNode),
}

/// A span of embedded code and the template line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub source: String,
    pub line: usize,
}

impl Fragment {
    pub fn new(source: impl Into<String>, line: usize) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    /// The fragment with its common indentation already removed.
    pub fragment: Fragment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub header: LoopHeader,
    pub body: Vec<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfChainNode {
    /// Branches in source order; only the last may lack a guard.
    pub branches: Vec<Branch>,
    pub line: usize,
}

/// One guard and body pair of a conditional chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `None` for the `else` branch.
    pub guard: Option<Fragment>,
    pub body: Vec<Node>,
}

/// The header of a `for` block, in Lua loop syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopHeader {
    /// `for i = start, limit[, step]`
    Numeric { var: String, bounds: Fragment },

    /// `for a, b in explist`
    Generic { vars: Vec<String>, iterable: Fragment },
}

static NUMERIC_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=([^=].*)$").unwrap());
static GENERIC_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*(?:\s*,\s*[A-Za-z_][A-Za-z0-9_]*)*)\s+in\b(.*)$")
        .unwrap()
});
static TRAILING_DO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+do\s*$").unwrap());
static TRAILING_THEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+then\s*$").unwrap());

impl LoopHeader {
    /// Parse the content of a `for` token.
    pub fn parse(content: &str, line: usize) -> Result<Self, StructureError> {
        let malformed = || StructureError::MalformedLoop {
            line,
            header: content.trim().to_string(),
        };
        let header = TRAILING_DO.replace(content, "");

        if let Some(caps) = NUMERIC_HEADER.captures(&header) {
            let bounds = caps[2].trim();
            if bounds.is_empty() {
                return Err(malformed());
            }
            return Ok(LoopHeader::Numeric {
                var: caps[1].to_string(),
                bounds: Fragment::new(bounds, line),
            });
        }

        if let Some(caps) = GENERIC_HEADER.captures(&header) {
            let iterable = caps[2].trim();
            if iterable.is_empty() {
                return Err(malformed());
            }
            let vars = caps[1].split(',').map(|v| v.trim().to_string()).collect();
            return Ok(LoopHeader::Generic {
                vars,
                iterable: Fragment::new(iterable, line),
            });
        }

        Err(malformed())
    }

    /// Names bound on every iteration.
    pub fn vars(&self) -> Vec<&str> {
        match self {
            LoopHeader::Numeric { var, .. } => vec![var.as_str()],
            LoopHeader::Generic { vars, .. } => vars.iter().map(String::as_str).collect(),
        }
    }
}

/// Build a guard fragment from `if`/`elif` token content.
pub fn guard_fragment(content: &str, line: usize) -> Fragment {
    Fragment::new(TRAILING_THEN.replace(content, "").trim(), line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_header() {
        let header = LoopHeader::parse(" i = 1, 10, 2 ", 3).unwrap();
        assert_eq!(
            header,
            LoopHeader::Numeric {
                var: "i".to_string(),
                bounds: Fragment::new("1, 10, 2", 3)
            }
        );
        assert_eq!(header.vars(), vec!["i"]);
    }

    #[test]
    fn test_generic_header() {
        let header = LoopHeader::parse(" k, v in pairs(t) do ", 1).unwrap();
        assert_eq!(
            header,
            LoopHeader::Generic {
                vars: vec!["k".to_string(), "v".to_string()],
                iterable: Fragment::new("pairs(t)", 1)
            }
        );
    }

    #[test]
    fn test_generic_header_over_table_constructor() {
        let header = LoopHeader::parse(" i in {1, 2, 3} ", 1).unwrap();
        assert_eq!(header.vars(), vec!["i"]);
    }

    #[test]
    fn test_comparison_is_not_numeric_header() {
        assert!(matches!(
            LoopHeader::parse(" i == 3 ", 7),
            Err(StructureError::MalformedLoop { line: 7, .. })
        ));
    }

    #[test]
    fn test_missing_iterable() {
        assert!(LoopHeader::parse(" x in ", 1).is_err());
        assert!(LoopHeader::parse(" ", 1).is_err());
    }

    #[test]
    fn test_guard_strips_then() {
        assert_eq!(guard_fragment(" x > 1 then ", 2), Fragment::new("x > 1", 2));
        assert_eq!(guard_fragment(" athen ", 2), Fragment::new("athen", 2));
    }
}
