/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The capability the renderer needs from a fragment host.
//!
//! The renderer never looks inside fragments. It asks an evaluator to run
//! them against a scope, to decide the truth of guards and to produce the
//! bindings of each loop iteration. [`crate::lua::LuaEvaluator`] is the
//! production implementation.

use crate::ast::{Fragment, LoopHeader};
use crate::error::TemplateResult;

/// Lazily produced loop bindings.
pub type Iterations<'s, B> = Box<dyn Iterator<Item = TemplateResult<B>> + 's>;

pub trait FragmentEvaluator {
    /// The variable scope fragments run in.
    type Scope;

    /// One iteration's worth of loop variable bindings.
    type Bindings;

    /// Run a fragment and return its stringified result, if any.
    ///
    /// A fragment that is a statement rather than an expression, or an
    /// expression yielding the null value, returns `None`.
    fn evaluate(&self, fragment: &Fragment, scope: &Self::Scope)
    -> TemplateResult<Option<String>>;

    /// Evaluate a guard fragment for an `if`/`elif` branch.
    fn truth(&self, fragment: &Fragment, scope: &Self::Scope) -> TemplateResult<bool>;

    /// Start a loop. Each item is the set of bindings for one iteration.
    fn iterate<'s>(
        &'s self,
        header: &LoopHeader,
        scope: &'s Self::Scope,
    ) -> TemplateResult<Iterations<'s, Self::Bindings>>;

    /// Make one iteration's bindings visible to the loop body.
    fn bind(&self, bindings: Self::Bindings, scope: &Self::Scope) -> TemplateResult<()>;
}
