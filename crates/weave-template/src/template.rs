/*
 * template.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The template facade.
//!
//! A [`Template`] owns its source and the state that survives a render: the
//! emission policy, the last rendered text, the exported global scope and
//! the first diagnostic it reported. Lua state lives only for the duration
//! of a top-level render and is shared with every template it includes.

use crate::builtins;
use crate::diagnostics::{color_enabled, format_exception};
use crate::error::{TemplateError, TemplateResult};
use crate::lua::{LuaEvaluator, evaluation_error};
use crate::namespace::Namespace;
use crate::output::{EmitPolicy, RenderBuffer};
use crate::render::Renderer;
use crate::scope::{Scope, namespace_table};
use crate::structure::parse;
use mlua::Table;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Name given to templates not read from a file.
pub const UNTITLED: &str = "untitled";

/// Where a template was read from, or where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    name: String,
    dir: PathBuf,
    path: Option<PathBuf>,
}

impl Origin {
    fn untitled() -> Self {
        Self {
            name: UNTITLED.to_string(),
            dir: PathBuf::from("."),
            path: None,
        }
    }

    /// Describe a file; relative paths are made absolute.
    pub fn from_path(path: &Path) -> TemplateResult<Self> {
        let path = std::path::absolute(path).map_err(|e| TemplateError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self {
            name,
            dir,
            path: Some(path),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// State shared between the renderer and the built-ins during one render.
pub(crate) struct Session {
    pub origin: Origin,
    pub target: Option<Origin>,
    pub exc: Option<String>,
    pub scope: Scope,
    pub output: RefCell<RenderBuffer>,
    /// Values stored with `set_attr` for the duration of the render.
    pub attrs: Table,
}

#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    origin: Origin,
    target: Option<Origin>,
    policy: EmitPolicy,
    rendered: Option<String>,
    scope: Namespace,
    exc: Option<String>,
}

impl Template {
    /// Create a template from source text.
    ///
    /// A single trailing newline is dropped, so a template file ending in a
    /// newline does not add one to its output.
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_origin(source.into(), Origin::untitled())
    }

    /// Read a template file. Its directory becomes the include root.
    pub fn from_path(path: impl AsRef<Path>) -> TemplateResult<Self> {
        let origin = Origin::from_path(path.as_ref())?;
        let file = origin.path().unwrap_or(path.as_ref());
        let source = std::fs::read_to_string(file).map_err(|e| TemplateError::io(file, e))?;
        Ok(Self::with_origin(source, origin))
    }

    /// Read a template from an open stream.
    pub fn from_reader(mut reader: impl Read) -> TemplateResult<Self> {
        let mut source = String::new();
        reader
            .read_to_string(&mut source)
            .map_err(|e| TemplateError::io("<reader>", e))?;
        Ok(Self::new(source))
    }

    fn with_origin(mut source: String, origin: Origin) -> Self {
        if source.ends_with('\n') {
            source.pop();
        }
        Self {
            source,
            origin,
            target: None,
            policy: EmitPolicy::default(),
            rendered: None,
            scope: Namespace::new(),
            exc: None,
        }
    }

    pub fn with_policy(mut self, policy: EmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn name(&self) -> &str {
        self.origin.name()
    }

    pub fn dir(&self) -> &Path {
        self.origin.dir()
    }

    pub fn path(&self) -> Option<&Path> {
        self.origin.path()
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().map(Origin::name)
    }

    pub fn target_dir(&self) -> Option<&Path> {
        self.target.as_ref().map(Origin::dir)
    }

    pub fn target_path(&self) -> Option<&Path> {
        self.target.as_ref().and_then(Origin::path)
    }

    pub fn policy(&self) -> EmitPolicy {
        self.policy
    }

    pub fn policy_mut(&mut self) -> &mut EmitPolicy {
        &mut self.policy
    }

    /// The formatted diagnostic of the first failure, if any.
    pub fn exc(&self) -> Option<&str> {
        self.exc.as_deref()
    }

    /// Output of the last successful render.
    pub fn rendered(&self) -> Option<&str> {
        self.rendered.as_deref()
    }

    /// Global bindings left by the last successful render.
    pub fn scope(&self) -> &Namespace {
        &self.scope
    }

    /// Discard rendered output.
    pub fn clear(&mut self) {
        self.rendered = Some(String::new());
    }

    /// Render with `namespace` as the initial global scope.
    pub fn render(&mut self, namespace: Namespace) -> TemplateResult<String> {
        let evaluator = LuaEvaluator::new();
        let globals = match namespace_table(evaluator.lua(), &namespace) {
            Ok(globals) => globals,
            Err(e) => {
                let err = evaluation_error(e, self.origin.name(), 0);
                return Err(self.report(err));
            }
        };
        let (text, _) = self.render_in(&evaluator, globals)?;
        Ok(text)
    }

    /// Render with `overrides` layered over `namespace`.
    pub fn render_with(
        &mut self,
        mut namespace: Namespace,
        overrides: Namespace,
    ) -> TemplateResult<String> {
        namespace.merge(overrides);
        self.render(namespace)
    }

    /// Render in an existing Lua state with `globals` as the global scope.
    ///
    /// Returns the text and the global scope table after rendering. Failures
    /// are reported (formatted with source context) before they are returned.
    pub(crate) fn render_in(
        &mut self,
        evaluator: &LuaEvaluator,
        globals: Table,
    ) -> TemplateResult<(String, Table)> {
        self.rendered = None;
        let lua = evaluator.lua();
        let label = self.origin.name().to_string();
        let lua_error = |e: mlua::Error| evaluation_error(e, &label, 0);

        let scope = Scope::new(lua, globals, label.as_str()).map_err(lua_error)?;
        let session = Rc::new(Session {
            origin: self.origin.clone(),
            target: self.target.clone(),
            exc: self.exc.clone(),
            scope,
            output: RefCell::new(RenderBuffer::new(self.policy)),
            attrs: lua.create_table().map_err(lua_error)?,
        });
        builtins::install(lua, &session).map_err(lua_error)?;

        let result = parse(&self.source).and_then(|nodes| {
            Renderer::new(evaluator, &session.scope, &session.output).render(&nodes)
        });
        self.policy = session.output.borrow().policy();
        if let Err(err) = result {
            return Err(self.report(err));
        }

        let text = session.output.borrow().as_str().to_string();
        self.scope = session.scope.export(lua).map_err(lua_error)?;
        self.rendered = Some(text.clone());
        Ok((text, session.scope.globals().clone()))
    }

    /// Attach source context to an error, once.
    ///
    /// Only the first failure of a template is formatted; errors that were
    /// already formatted by an included template pass through unchanged.
    fn report(&mut self, err: TemplateError) -> TemplateError {
        if let Some(context) = err.context() {
            if self.exc.is_none() {
                self.exc = Some(context.to_string());
            }
            return err;
        }
        if self.exc.is_some() {
            return err;
        }
        let Some(line) = err.line() else {
            return err;
        };

        let file = self
            .origin
            .path()
            .map_or_else(|| self.origin.name().to_string(), |p| p.display().to_string());
        let context = format_exception(&file, &err.to_string(), &self.source, line, color_enabled());
        tracing::error!(template = %file, line, "{err}");
        self.exc = Some(context.clone());
        TemplateError::Reported {
            context,
            source: Box::new(err),
        }
    }

    /// Render if needed and write the output to `path`.
    ///
    /// When `path` is a directory the template's own name is appended.
    /// Missing parent directories are created. Returns the written path.
    pub fn save(&mut self, path: impl AsRef<Path>, overrides: Namespace) -> TemplateResult<PathBuf> {
        let mut path = path.as_ref().to_path_buf();
        if path.is_dir() {
            path.push(self.origin.name());
        }
        self.target = Some(Origin::from_path(&path)?);
        let text = self.rendered_or_render(overrides)?;

        match std::fs::write(&path, &text) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| TemplateError::io(parent, e))?;
                }
                std::fs::write(&path, &text).map_err(|e| TemplateError::io(&path, e))?;
            }
            result => result.map_err(|e| TemplateError::io(&path, e))?,
        }
        tracing::debug!(path = %path.display(), bytes = text.len(), "saved rendered template");
        Ok(path)
    }

    /// Render if needed and write the output to an open stream.
    pub fn save_to(&mut self, writer: &mut impl Write, overrides: Namespace) -> TemplateResult<()> {
        let text = self.rendered_or_render(overrides)?;
        writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| TemplateError::io("<stream>", e))
    }

    fn rendered_or_render(&mut self, overrides: Namespace) -> TemplateResult<String> {
        match &self.rendered {
            Some(text) if !text.is_empty() => Ok(text.clone()),
            _ => self.render(overrides),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::set_color_enabled;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(source: &str) -> String {
        Template::new(source).render(Namespace::new()).unwrap()
    }

    #[test]
    fn test_template_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Template>();
    }

    #[test]
    fn test_hello_world() {
        let mut template = Template::new("Hello {# name #}!");
        let out = template
            .render(Namespace::new().with("name", "world"))
            .unwrap();
        assert_eq!(out, "Hello world!");
        assert_eq!(template.rendered(), Some("Hello world!"));
    }

    #[test]
    fn test_trailing_newline_is_stripped_once() {
        assert_eq!(render("text\n\n"), "text\n");
        assert_eq!(Template::new("a\n").source(), "a");
    }

    #[test]
    fn test_functions_defined_in_fragments() {
        assert_eq!(
            render("{# function f() return 42 end #}The answer is: {# f() #}"),
            "The answer is: 42"
        );
    }

    #[test]
    fn test_loops_and_chains() {
        assert_eq!(render("{% for i in {1, 2, 3} %}{# i #},{% end %}"), "1,2,3,");
        assert_eq!(
            render("{% if false %}a{% elif true %}b{% else %}c{% end %}"),
            "b"
        );
        assert_eq!(
            render("{% for i = 0, 1 %}{% if i == 1 %}{# i #}{% end %}{% end %}"),
            "1"
        );
    }

    #[test]
    fn test_emission_toggle() {
        assert_eq!(
            render("1{# set_emit_enable(false) #}2{# set_emit_enable(true) #}3"),
            "13"
        );
    }

    #[test]
    fn test_policy_persists_on_instance() {
        let mut template = Template::new("{# set_eat_blanklines(true) #}");
        template.render(Namespace::new()).unwrap();
        assert!(template.policy().eat_blanklines);
    }

    #[test]
    fn test_emit_and_clear_builtins() {
        assert_eq!(render("a{# clear() #}b{# emit(1 + 1) #}"), "b2");
    }

    #[test]
    fn test_render_builtin_shares_scope() {
        assert_eq!(render("{# x = 'y' #}{# render('<{' .. '# x #' .. '}>') #}"), "<y>");
    }

    #[test]
    fn test_render_builtin_error_marks_calling_line() {
        set_color_enabled(false);
        let mut template = Template::new("l1\nl2\n{# render('{' .. '# nope() #' .. '}') #}");
        let err = template.render(Namespace::new()).unwrap_err();
        assert!(err.is_reported());
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("nope"), "{err}");
        assert!(template.exc().unwrap().contains("-->   3 | {# render("));
    }

    #[test]
    fn test_statements_and_nil_emit_nothing() {
        assert_eq!(render("{# x = 1 #}"), "");
        assert_eq!(render("{# s = 'a' #}|{# s #}"), "|a");
        assert_eq!(render("{# emit(nil) #}{# emit(1) #}{# missing #}"), "1");
    }

    #[test]
    fn test_attributes() {
        assert_eq!(render("{# set_attr('k', 5) #}{# get_attr('k') #}"), "5");
    }

    #[test]
    fn test_template_info_builtins() {
        assert_eq!(render("{# name() #} {# dir() #} {# path() #}"), "untitled . ");
    }

    #[test]
    fn test_rerender_sees_only_new_namespace() {
        let mut template = Template::new("{# a #}{# b #}");
        assert_eq!(
            template.render(Namespace::new().with("a", 1)).unwrap(),
            "1"
        );
        assert_eq!(
            template.render(Namespace::new().with("b", 2)).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_render_with_overrides() {
        let mut template = Template::new("{# a #}-{# b #}");
        let out = template
            .render_with(
                Namespace::new().with("a", 1).with("b", 1),
                Namespace::new().with("b", 2),
            )
            .unwrap();
        assert_eq!(out, "1-2");
    }

    #[test]
    fn test_scope_is_exported() {
        let mut template = Template::new("{# total = 0 #}{% for i = 1, 4 %}{# total = total + i #}{% end %}");
        template.render(Namespace::new()).unwrap();
        assert_eq!(template.scope().get("total"), Some(&json!(10)));
        assert_eq!(template.scope().get("i"), Some(&json!(4)));
    }

    #[test]
    fn test_failure_is_reported_once() {
        let mut template = Template::new("line one\n{# nope() #}");
        let err = template.render(Namespace::new()).unwrap_err();
        assert!(err.is_reported());
        assert_eq!(err.line(), Some(2));
        assert_eq!(template.rendered(), None);

        let context = template.exc().unwrap().to_string();
        assert!(context.contains("*** Source:"));
        assert!(context.contains("nope"));

        let again = template.render(Namespace::new()).unwrap_err();
        assert!(!again.is_reported());
        assert_eq!(template.exc(), Some(context.as_str()));
    }

    #[test]
    fn test_structure_errors_are_reported() {
        let mut template = Template::new("{% if x %}y");
        let err = template.render(Namespace::new()).unwrap_err();
        assert!(matches!(err.root(), TemplateError::Structure(_)));
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_save_to_stream() {
        let mut template = Template::new("v={# v #}");
        let mut out = Vec::new();
        template
            .save_to(&mut out, Namespace::new().with("v", "x"))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "v=x");
    }
}
