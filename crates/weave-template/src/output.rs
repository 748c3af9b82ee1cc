/*
 * output.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The render buffer and its emission policy.
//!
//! All rendered text reaches the buffer through [`RenderBuffer::emit`], so the
//! whitespace and blank-line policies apply uniformly to literal text,
//! expression results and included templates.

/// Flags controlling what [`RenderBuffer::emit`] appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitPolicy {
    /// When false, emitted text is discarded.
    pub emit_enabled: bool,
    /// Strip leading whitespace from every line that is not blank.
    pub eat_whitespaces: bool,
    /// Drop emitted text that is only whitespace ending in a newline.
    pub eat_blanklines: bool,
}

impl Default for EmitPolicy {
    fn default() -> Self {
        Self {
            emit_enabled: true,
            eat_whitespaces: false,
            eat_blanklines: false,
        }
    }
}

/// Accumulated output of one render call.
#[derive(Debug, Clone, Default)]
pub struct RenderBuffer {
    text: String,
    policy: EmitPolicy,
}

impl RenderBuffer {
    pub fn new(policy: EmitPolicy) -> Self {
        Self {
            text: String::new(),
            policy,
        }
    }

    /// Append text subject to the current policy.
    pub fn emit(&mut self, text: &str) {
        if !self.policy.emit_enabled || text.is_empty() {
            return;
        }
        if self.policy.eat_blanklines && is_blank_line(text) {
            return;
        }
        if self.policy.eat_whitespaces {
            for line in text.split_inclusive('\n') {
                if line.trim().is_empty() {
                    self.text.push_str(line);
                } else {
                    self.text.push_str(line.trim_start());
                }
            }
        } else {
            self.text.push_str(text);
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn policy(&self) -> EmitPolicy {
        self.policy
    }

    pub fn policy_mut(&mut self) -> &mut EmitPolicy {
        &mut self.policy
    }
}

fn is_blank_line(text: &str) -> bool {
    text.ends_with('\n') && text.trim().is_empty()
}
