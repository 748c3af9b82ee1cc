/*
 * lua.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Lua 5.4 fragment host.
//!
//! Fragments are compiled as chunks named after the owning template and
//! padded with blank lines, so Lua positions in error messages are template
//! line numbers. An expression fragment is tried as `return <fragment>`
//! first and falls back to a statement chunk when that does not parse.

use crate::ast::{Fragment, LoopHeader};
use crate::error::{TemplateError, TemplateResult};
use crate::evaluator::{FragmentEvaluator, Iterations};
use crate::scope::Scope;
use mlua::{Function, Lua, MultiValue, Table, Value};
use regex::Regex;

/// Names and values bound for one loop iteration.
pub type Bindings = Vec<(String, Value)>;

/// Evaluates fragments in a shared Lua state.
///
/// Cloning is cheap; clones share the same state.
#[derive(Debug, Clone)]
pub struct LuaEvaluator {
    lua: Lua,
}

impl Default for LuaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaEvaluator {
    /// Open a fresh Lua state with the standard library loaded.
    pub fn new() -> Self {
        Self { lua: Lua::new() }
    }

    /// Wrap an existing state, as built-ins do when they re-enter rendering.
    pub(crate) fn from_lua(lua: Lua) -> Self {
        Self { lua }
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Load and run a fragment, returning every value it produced.
    fn run(&self, fragment: &Fragment, scope: &Scope) -> TemplateResult<MultiValue> {
        let function = self
            .compile(fragment, scope)
            .map_err(|e| evaluation_error(e, scope.label(), fragment.line))?;
        let values = function
            .call::<MultiValue>(())
            .map_err(|e| evaluation_error(e, scope.label(), fragment.line))?;
        scope
            .settle()
            .map_err(|e| evaluation_error(e, scope.label(), fragment.line))?;
        Ok(values)
    }

    fn compile(&self, fragment: &Fragment, scope: &Scope) -> mlua::Result<Function> {
        let padding = "\n".repeat(fragment.line.saturating_sub(1));
        let load = |code: String| {
            self.lua
                .load(code)
                .set_name(format!("={}", scope.label()))
                .set_environment(scope.env().clone())
                .into_function()
        };

        match load(format!("{padding}return {}", fragment.source)) {
            Err(mlua::Error::SyntaxError { .. }) => load(format!("{padding}{}", fragment.source)),
            result => result,
        }
    }

    /// Stringify a value the way Lua's `tostring` does.
    pub fn stringify(&self, value: Value) -> mlua::Result<String> {
        let tostring: Function = self.lua.globals().get("tostring")?;
        tostring.call(value)
    }
}

impl FragmentEvaluator for LuaEvaluator {
    type Scope = Scope;
    type Bindings = Bindings;

    fn evaluate(&self, fragment: &Fragment, scope: &Scope) -> TemplateResult<Option<String>> {
        let value = first(self.run(fragment, scope)?);
        if value.is_nil() {
            return Ok(None);
        }
        self.stringify(value)
            .map(Some)
            .map_err(|e| evaluation_error(e, scope.label(), fragment.line))
    }

    fn truth(&self, fragment: &Fragment, scope: &Scope) -> TemplateResult<bool> {
        Ok(is_truthy(&first(self.run(fragment, scope)?)))
    }

    fn iterate<'s>(
        &'s self,
        header: &LoopHeader,
        scope: &'s Scope,
    ) -> TemplateResult<Iterations<'s, Bindings>> {
        match header {
            LoopHeader::Numeric { var, bounds } => {
                let values = self.run(bounds, scope)?;
                let range = NumericRange::new(values.into_iter().collect())
                    .map_err(|message| loop_error(scope, bounds, message))?;
                let var = var.clone();
                Ok(Box::new(
                    range.map(move |value| Ok::<_, TemplateError>(vec![(var.clone(), value)])),
                ))
            }
            LoopHeader::Generic { vars, iterable } => {
                let mut values = self.run(iterable, scope)?.into_iter();
                let source = values.next().unwrap_or(Value::Nil);
                let state = values.next().unwrap_or(Value::Nil);
                let control = values.next().unwrap_or(Value::Nil);

                let walk = match source {
                    Value::Table(table) if vars.len() == 1 => Walk::Sequence { table, index: 0 },
                    Value::Table(table) => Walk::Protocol {
                        function: self
                            .lua
                            .globals()
                            .get("next")
                            .map_err(|e| evaluation_error(e, scope.label(), iterable.line))?,
                        state: Value::Table(table),
                        control: Value::Nil,
                    },
                    Value::Function(function) => Walk::Protocol {
                        function,
                        state,
                        control,
                    },
                    other => {
                        return Err(loop_error(
                            scope,
                            iterable,
                            format!("cannot iterate over a value of type {}", other.type_name()),
                        ));
                    }
                };

                Ok(Box::new(GenericLoop {
                    walk,
                    vars: vars.clone(),
                    label: scope.label().to_string(),
                    line: iterable.line,
                    done: false,
                }))
            }
        }
    }

    fn bind(&self, bindings: Bindings, scope: &Scope) -> TemplateResult<()> {
        let bound = bindings
            .into_iter()
            .try_for_each(|(name, value)| scope.bind(&name, value))
            .and_then(|_| scope.settle());
        bound.map_err(|e| evaluation_error(e, scope.label(), 0))
    }
}

fn first(values: MultiValue) -> Value {
    values.into_iter().next().unwrap_or(Value::Nil)
}

/// Lua truthiness: only `nil` and `false` are false.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

fn loop_error(scope: &Scope, fragment: &Fragment, message: impl Into<String>) -> TemplateError {
    TemplateError::Evaluation {
        template: scope.label().to_string(),
        line: fragment.line,
        message: message.into(),
    }
}

/// Convert a Lua error raised while running a fragment of `template`.
///
/// A [`TemplateError`] raised inside a built-in is recovered. One that an
/// included template already reported passes through unchanged; any other
/// (a missing include file, a failing `render` snippet) is pinned to `line`,
/// the line of the calling fragment. Plain Lua errors take the template line
/// from the Lua position in the message, falling back to `line`.
pub(crate) fn evaluation_error(err: mlua::Error, template: &str, line: usize) -> TemplateError {
    match template_error(&err) {
        Some(inner) if inner.is_reported() => return inner.clone(),
        Some(TemplateError::Evaluation { message, .. }) => {
            return TemplateError::Evaluation {
                template: template.to_string(),
                line,
                message: message.clone(),
            };
        }
        Some(inner) => {
            return TemplateError::Evaluation {
                template: template.to_string(),
                line,
                message: inner.to_string(),
            };
        }
        None => {}
    }
    TemplateError::Evaluation {
        template: template.to_string(),
        line: lua_line(&err.to_string(), template).unwrap_or(line),
        message: innermost_message(&err),
    }
}

fn template_error(err: &mlua::Error) -> Option<&TemplateError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<TemplateError>(),
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            template_error(cause)
        }
        _ => None,
    }
}

fn innermost_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            innermost_message(cause)
        }
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::RuntimeError(message) => message.clone(),
        other => other.to_string(),
    }
}

fn lua_line(message: &str, template: &str) -> Option<usize> {
    let pattern = Regex::new(&format!(r"{}:(\d+):", regex::escape(template))).ok()?;
    pattern.captures(message)?[1].parse().ok()
}

/// The `for i = start, limit[, step]` counter.
#[derive(Debug)]
enum NumericRange {
    Integer { next: i64, limit: i64, step: i64 },
    Float { next: f64, limit: f64, step: f64 },
    Done,
}

impl NumericRange {
    fn new(bounds: Vec<Value>) -> Result<Self, String> {
        let start = bounds.first().cloned().unwrap_or(Value::Nil);
        let limit = bounds.get(1).cloned().unwrap_or(Value::Nil);
        let step = bounds.get(2).cloned().unwrap_or(Value::Integer(1));

        match (&start, &step) {
            // An integer start and step make an integer loop; a float limit is
            // clipped to the last integer the counter can reach.
            (Value::Integer(start), Value::Integer(step)) => {
                if *step == 0 {
                    return Err("'for' step is zero".to_string());
                }
                let limit = match limit {
                    Value::Integer(limit) => Some(limit),
                    Value::Number(limit) => integer_limit(limit, *step),
                    _ => return Err("'for' limit value must be a number".to_string()),
                };
                Ok(match limit {
                    Some(limit) => NumericRange::Integer {
                        next: *start,
                        limit,
                        step: *step,
                    },
                    None => NumericRange::Done,
                })
            }
            _ => {
                let start = number(&start, "initial")?;
                let limit = number(&limit, "limit")?;
                let step = number(&step, "step")?;
                if step == 0.0 {
                    return Err("'for' step is zero".to_string());
                }
                Ok(NumericRange::Float {
                    next: start,
                    limit,
                    step,
                })
            }
        }
    }
}

/// Floor (counting up) or ceil (counting down) a float limit into the
/// integer range. `None` when no iteration can run.
fn integer_limit(limit: f64, step: i64) -> Option<i64> {
    let limit = if step > 0 { limit.floor() } else { limit.ceil() };
    if limit.is_nan() {
        None
    } else if limit >= i64::MAX as f64 {
        (step > 0).then_some(i64::MAX)
    } else if limit < i64::MIN as f64 {
        (step < 0).then_some(i64::MIN)
    } else {
        Some(limit as i64)
    }
}

fn number(value: &Value, role: &str) -> Result<f64, String> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Number(n) => Ok(*n),
        _ => Err(format!("'for' {role} value must be a number")),
    }
}

impl Iterator for NumericRange {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match *self {
            NumericRange::Integer { next, limit, step } => {
                let in_range = if step > 0 { next <= limit } else { next >= limit };
                if !in_range {
                    *self = NumericRange::Done;
                    return None;
                }
                *self = match next.checked_add(step) {
                    Some(following) => NumericRange::Integer {
                        next: following,
                        limit,
                        step,
                    },
                    None => NumericRange::Done,
                };
                Some(Value::Integer(next))
            }
            NumericRange::Float { next, limit, step } => {
                let in_range = if step > 0.0 { next <= limit } else { next >= limit };
                if !in_range {
                    *self = NumericRange::Done;
                    return None;
                }
                *self = NumericRange::Float {
                    next: next + step,
                    limit,
                    step,
                };
                Some(Value::Number(next))
            }
            NumericRange::Done => None,
        }
    }
}

enum Walk {
    /// Values of a table's sequence part, in order.
    Sequence { table: Table, index: i64 },
    /// Lua's generic `for` protocol: call `function(state, control)`.
    Protocol {
        function: Function,
        state: Value,
        control: Value,
    },
}

struct GenericLoop {
    walk: Walk,
    vars: Vec<String>,
    label: String,
    line: usize,
    done: bool,
}

impl GenericLoop {
    fn step(&mut self) -> mlua::Result<Option<Vec<Value>>> {
        match &mut self.walk {
            Walk::Sequence { table, index } => {
                *index += 1;
                let value: Value = table.get(*index)?;
                Ok((!value.is_nil()).then(|| vec![value]))
            }
            Walk::Protocol {
                function,
                state,
                control,
            } => {
                let values: Vec<Value> = function
                    .call::<MultiValue>((state.clone(), control.clone()))?
                    .into_iter()
                    .collect();
                match values.first() {
                    None | Some(Value::Nil) => Ok(None),
                    Some(head) => {
                        *control = head.clone();
                        Ok(Some(values))
                    }
                }
            }
        }
    }
}

impl Iterator for GenericLoop {
    type Item = TemplateResult<Bindings>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(mut values)) => {
                values.resize(self.vars.len(), Value::Nil);
                Some(Ok(self.vars.iter().cloned().zip(values).collect()))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(evaluation_error(e, &self.label, self.line)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (LuaEvaluator, Scope) {
        let evaluator = LuaEvaluator::new();
        let globals = evaluator.lua().create_table().unwrap();
        let scope = Scope::new(evaluator.lua(), globals, "page.tmpl").unwrap();
        (evaluator, scope)
    }

    fn eval(evaluator: &LuaEvaluator, scope: &Scope, source: &str) -> Option<String> {
        evaluator
            .evaluate(&Fragment::new(source, 1), scope)
            .unwrap()
    }

    fn loop_values(evaluator: &LuaEvaluator, scope: &Scope, header: &str) -> Vec<String> {
        let header = LoopHeader::parse(header, 1).unwrap();
        evaluator
            .iterate(&header, scope)
            .unwrap()
            .map(|bindings| {
                bindings
                    .unwrap()
                    .into_iter()
                    .map(|(name, value)| format!("{name}={}", evaluator.stringify(value).unwrap()))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    #[test]
    fn test_expression_and_statement_fragments() {
        let (evaluator, scope) = setup();
        assert_eq!(eval(&evaluator, &scope, "1 + 1"), Some("2".to_string()));
        assert_eq!(eval(&evaluator, &scope, "x = 3"), None);
        assert_eq!(eval(&evaluator, &scope, "x * 2"), Some("6".to_string()));
        assert_eq!(eval(&evaluator, &scope, "function f() return 42 end"), None);
        assert_eq!(eval(&evaluator, &scope, "f()"), Some("42".to_string()));
    }

    #[test]
    fn test_stringification_follows_tostring() {
        let (evaluator, scope) = setup();
        assert_eq!(eval(&evaluator, &scope, "1.0"), Some("1.0".to_string()));
        assert_eq!(eval(&evaluator, &scope, "true"), Some("true".to_string()));
        assert_eq!(eval(&evaluator, &scope, "nil"), None);
        assert_eq!(eval(&evaluator, &scope, "'a' .. 'b'"), Some("ab".to_string()));
    }

    #[test]
    fn test_truthiness() {
        let (evaluator, scope) = setup();
        let truth = |src: &str| evaluator.truth(&Fragment::new(src, 1), &scope).unwrap();
        assert!(truth("0"));
        assert!(truth("''"));
        assert!(!truth("nil"));
        assert!(!truth("false"));
        assert!(truth("1 < 2"));
    }

    #[test]
    fn test_numeric_loops() {
        let (evaluator, scope) = setup();
        assert_eq!(loop_values(&evaluator, &scope, " i = 1, 3 "), vec!["i=1", "i=2", "i=3"]);
        assert_eq!(loop_values(&evaluator, &scope, " i = 3, 1, -1 do"), vec!["i=3", "i=2", "i=1"]);
        assert_eq!(loop_values(&evaluator, &scope, " i = 0, 1, 0.5"), vec!["i=0.0", "i=0.5", "i=1.0"]);
        assert!(loop_values(&evaluator, &scope, " i = 1, 0 ").is_empty());
    }

    #[test]
    fn test_float_limit_keeps_integer_loop() {
        let (evaluator, scope) = setup();
        assert_eq!(loop_values(&evaluator, &scope, " i = 1, 3.5 "), vec!["i=1", "i=2", "i=3"]);
        assert_eq!(loop_values(&evaluator, &scope, " i = 3, 0.5, -1 "), vec!["i=3", "i=2", "i=1"]);
        assert_eq!(loop_values(&evaluator, &scope, " i = 1.0, 2 "), vec!["i=1.0", "i=2.0"]);
        assert!(loop_values(&evaluator, &scope, " i = 1, 0/0 ").is_empty());
        assert!(loop_values(&evaluator, &scope, " i = 1, -math.huge ").is_empty());
    }

    #[test]
    fn test_zero_step_is_an_error() {
        let (evaluator, scope) = setup();
        let header = LoopHeader::parse(" i = 1, 3, 0 ", 4).unwrap();
        let err = evaluator.iterate(&header, &scope).err().unwrap();
        assert!(matches!(err, TemplateError::Evaluation { line: 4, .. }));
        assert!(err.to_string().contains("step is zero"));
    }

    #[test]
    fn test_generic_loops() {
        let (evaluator, scope) = setup();
        assert_eq!(loop_values(&evaluator, &scope, " v in {'a', 'b'} "), vec!["v=a", "v=b"]);
        assert_eq!(
            loop_values(&evaluator, &scope, " i, v in ipairs({'a', 'b'}) "),
            vec!["i=1 v=a", "i=2 v=b"]
        );
        assert_eq!(loop_values(&evaluator, &scope, " k, v in {x = 1} "), vec!["k=x v=1"]);
    }

    #[test]
    fn test_iterating_a_number_fails() {
        let (evaluator, scope) = setup();
        let header = LoopHeader::parse(" v in 42 ", 2).unwrap();
        let err = evaluator.iterate(&header, &scope).err().unwrap();
        assert_eq!(
            err.to_string(),
            "page.tmpl, line 2: cannot iterate over a value of type integer"
        );
    }

    #[test]
    fn test_bind_settles_into_globals() {
        let (evaluator, scope) = setup();
        evaluator
            .bind(vec![("i".to_string(), Value::Integer(7))], &scope)
            .unwrap();
        assert_eq!(scope.globals().raw_get::<i64>("i").unwrap(), 7);
        assert_eq!(eval(&evaluator, &scope, "i"), Some("7".to_string()));
    }

    #[test]
    fn test_runtime_error_reports_template_line() {
        let (evaluator, scope) = setup();
        let err = evaluator
            .evaluate(&Fragment::new("x = 1\nundefined_fn()", 5), &scope)
            .unwrap_err();
        match err {
            TemplateError::Evaluation {
                template,
                line,
                message,
            } => {
                assert_eq!(template, "page.tmpl");
                assert_eq!(line, 6);
                assert!(message.contains("undefined_fn"), "{message}");
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_reports_template_line() {
        let (evaluator, scope) = setup();
        let err = evaluator
            .evaluate(&Fragment::new("x = = 1", 3), &scope)
            .unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    fn raising(evaluator: &LuaEvaluator, scope: &Scope, err: TemplateError) {
        let raise = evaluator
            .lua()
            .create_function(move |_, ()| -> mlua::Result<()> {
                Err(mlua::Error::external(err.clone()))
            })
            .unwrap();
        scope.builtins().set("raise", raise).unwrap();
    }

    #[test]
    fn test_reported_error_survives_lua_boundary() {
        let (evaluator, scope) = setup();
        let reported = TemplateError::Reported {
            context: "*** Source:".to_string(),
            source: Box::new(TemplateError::Evaluation {
                template: "child.tmpl".to_string(),
                line: 9,
                message: "boom".to_string(),
            }),
        };
        raising(&evaluator, &scope, reported);
        let err = evaluator
            .evaluate(&Fragment::new("raise()", 1), &scope)
            .unwrap_err();
        assert_eq!(err.context(), Some("*** Source:"));
        assert_eq!(err.to_string(), "child.tmpl, line 9: boom");
    }

    #[test]
    fn test_builtin_errors_are_pinned_to_the_calling_fragment() {
        let (evaluator, scope) = setup();
        raising(
            &evaluator,
            &scope,
            TemplateError::Evaluation {
                template: "page.tmpl".to_string(),
                line: 1,
                message: "inner".to_string(),
            },
        );
        let err = evaluator
            .evaluate(&Fragment::new("raise()", 4), &scope)
            .unwrap_err();
        assert_eq!(err.to_string(), "page.tmpl, line 4: inner");

        raising(
            &evaluator,
            &scope,
            TemplateError::io("missing.tmpl", std::io::Error::other("not found")),
        );
        let err = evaluator
            .evaluate(&Fragment::new("raise()", 7), &scope)
            .unwrap_err();
        assert_eq!(err.line(), Some(7));
        assert!(err.to_string().contains("missing.tmpl"), "{err}");
    }
}
