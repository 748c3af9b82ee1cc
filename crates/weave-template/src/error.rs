/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template lexing, structuring and evaluation.

use crate::indent::IndentationError;
use crate::lexer::LexError;
use crate::structure::StructureError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Malformed delimiters.
    #[error(transparent)]
    Lex(#[from] LexError),

    /// Malformed block nesting.
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Expression fragment with inconsistent indentation.
    #[error(transparent)]
    Indentation(#[from] IndentationError),

    /// An embedded fragment failed at run time.
    #[error("{template}, line {line}: {message}")]
    Evaluation {
        /// Name of the template owning the fragment.
        template: String,
        line: usize,
        message: String,
    },

    /// Reading a template or writing output failed.
    #[error("I/O error on \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An error that has already been formatted with its source context.
    #[error("{source}")]
    Reported {
        /// The formatted source listing.
        context: String,
        source: Box<TemplateError>,
    },
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TemplateError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Template line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateError::Lex(e) => Some(e.line()),
            TemplateError::Structure(e) => Some(e.line()),
            TemplateError::Indentation(e) => Some(e.line),
            TemplateError::Evaluation { line, .. } => Some(*line),
            TemplateError::Io { .. } => None,
            TemplateError::Reported { source, .. } => source.line(),
        }
    }

    /// Whether source context has already been attached.
    pub fn is_reported(&self) -> bool {
        matches!(self, TemplateError::Reported { .. })
    }

    /// The formatted source listing, once reported.
    pub fn context(&self) -> Option<&str> {
        match self {
            TemplateError::Reported { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The underlying error, looking through [`TemplateError::Reported`].
    pub fn root(&self) -> &TemplateError {
        match self {
            TemplateError::Reported { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delimiter::TokenKind;

    #[test]
    fn test_line_of_each_variant() {
        let lex: TemplateError = LexError::NoBlockToTerminate {
            line: 4,
            delimiter: "%}".to_string(),
        }
        .into();
        assert_eq!(lex.line(), Some(4));

        let structure: TemplateError = StructureError::LoopBranch {
            line: 2,
            found: TokenKind::Elif,
        }
        .into();
        assert_eq!(structure.line(), Some(2));

        let io = TemplateError::io("/nowhere", std::io::Error::other("boom"));
        assert_eq!(io.line(), None);
    }

    #[test]
    fn test_reported_wraps_transparently() {
        let inner = TemplateError::Evaluation {
            template: "page.tmpl".to_string(),
            line: 3,
            message: "attempt to call a nil value".to_string(),
        };
        let reported = TemplateError::Reported {
            context: "*** Source:".to_string(),
            source: Box::new(inner.clone()),
        };
        assert!(reported.is_reported());
        assert_eq!(reported.line(), Some(3));
        assert_eq!(reported.to_string(), inner.to_string());
        assert_eq!(reported.context(), Some("*** Source:"));
        assert!(matches!(reported.root(), TemplateError::Evaluation { .. }));
    }

    #[test]
    fn test_structure_message() {
        let err: TemplateError = StructureError::StrayEnd { line: 9 }.into();
        assert_eq!(err.to_string(), "line 9: no control statement to terminate");
    }
}
