/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Block-structured text templates with embedded Lua.
//!
//! Templates are literal text interspersed with delimited Lua fragments:
//!
//! - Expressions and statements: `{# name #}`, `{# x = 1 #}`
//! - Loops: `{% for i = 1, 3 %}...{% end %}`, `{% for k, v in pairs(t) %}...{% end %}`
//! - Conditionals: `{% if a %}...{% elif b %}...{% else %}...{% end %}`
//!
//! Fragments share one global scope for the whole render, so a function
//! defined early in a template is callable later in it. Built-in functions
//! (`include`, `emit`, `set_emit_enable`, ...) let fragments steer the output.
//!
//! # Architecture
//!
//! Rendering runs in three stages: the [`lexer`] splits the source into
//! tokens, the [`structure`] module rebuilds the nested block tree, and the
//! [`render`] module walks that tree against a [`FragmentEvaluator`]. The
//! Lua implementation of the evaluator lives in [`lua`].
//!
//! # Example
//!
//! ```ignore
//! use weave_template::{Namespace, Template};
//!
//! let mut template = Template::new("Hello {# name #}!");
//! let output = template.render(Namespace::new().with("name", "world"))?;
//! assert_eq!(output, "Hello world!");
//! ```

pub mod ast;
pub mod builtins;
pub mod delimiter;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod indent;
pub mod lexer;
pub mod lua;
pub mod namespace;
pub mod output;
pub mod render;
pub mod scope;
pub mod selfcheck;
pub mod structure;
pub mod template;

// Re-export main types at crate root
pub use ast::{Fragment, LoopHeader, Node};
pub use builtins::Capability;
pub use diagnostics::{color_enabled, format_exception, set_color_enabled};
pub use error::{TemplateError, TemplateResult};
pub use evaluator::FragmentEvaluator;
pub use lexer::{LexError, Token, lex};
pub use lua::LuaEvaluator;
pub use namespace::Namespace;
pub use output::{EmitPolicy, RenderBuffer};
pub use structure::{StructureError, enclosing_block, parse};
pub use template::{Origin, Template};
