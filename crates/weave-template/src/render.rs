/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tree-walking renderer.
//!
//! Walks the template tree in source order, emitting literal text and
//! driving an evaluator for every fragment. Output flows through the shared
//! [`RenderBuffer`], which built-ins may also write to while a fragment runs,
//! so the buffer is only borrowed for the duration of each emit.

use crate::ast::{ForNode, IfChainNode, Node};
use crate::error::TemplateResult;
use crate::evaluator::FragmentEvaluator;
use crate::output::RenderBuffer;
use std::cell::RefCell;

pub struct Renderer<'r, E: FragmentEvaluator> {
    evaluator: &'r E,
    scope: &'r E::Scope,
    output: &'r RefCell<RenderBuffer>,
}

impl<'r, E: FragmentEvaluator> Renderer<'r, E> {
    pub fn new(evaluator: &'r E, scope: &'r E::Scope, output: &'r RefCell<RenderBuffer>) -> Self {
        Self {
            evaluator,
            scope,
            output,
        }
    }

    /// Render a sequence of nodes.
    pub fn render(&self, nodes: &[Node]) -> TemplateResult<()> {
        nodes.iter().try_for_each(|node| self.render_node(node))
    }

    fn render_node(&self, node: &Node) -> TemplateResult<()> {
        match node {
            Node::Text(text) => {
                self.emit(&text.text);
                Ok(())
            }
            Node::Expr(expr) => {
                if let Some(text) = self.evaluator.evaluate(&expr.fragment, self.scope)? {
                    self.emit(&text);
                }
                Ok(())
            }
            Node::For(for_node) => self.render_loop(for_node),
            Node::IfChain(chain) => self.render_chain(chain),
        }
    }

    fn render_loop(&self, node: &ForNode) -> TemplateResult<()> {
        for bindings in self.evaluator.iterate(&node.header, self.scope)? {
            self.evaluator.bind(bindings?, self.scope)?;
            self.render(&node.body)?;
        }
        Ok(())
    }

    /// Render the first branch whose guard holds, or the `else` branch.
    fn render_chain(&self, chain: &IfChainNode) -> TemplateResult<()> {
        for branch in &chain.branches {
            let taken = match &branch.guard {
                Some(guard) => self.evaluator.truth(guard, self.scope)?,
                None => true,
            };
            if taken {
                return self.render(&branch.body);
            }
        }
        Ok(())
    }

    fn emit(&self, text: &str) {
        self.output.borrow_mut().emit(text);
    }
}
