/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Functions every fragment can call.
//!
//! The capability table is installed into the scope's built-ins layer at the
//! start of each render, bound to that render's [`Session`]. Fragments reach
//! it through ordinary global lookups, so a template binding of the same
//! name shadows the built-in.

use crate::lua::{LuaEvaluator, is_truthy};
use crate::render::Renderer;
use crate::structure::parse;
use crate::template::{Origin, Session, Template};
use mlua::{Function, Lua, Table, Value};
use std::path::Path;
use std::rc::Rc;

/// The built-in functions, by the name fragments call them with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Name,
    Dir,
    Path,
    TargetName,
    TargetDir,
    TargetPath,
    EmitEnable,
    SetEmitEnable,
    EatWhitespaces,
    SetEatWhitespaces,
    EatBlanklines,
    SetEatBlanklines,
    Exc,
    Clear,
    Emit,
    Include,
    Render,
    SetAttr,
    GetAttr,
}

impl Capability {
    pub const ALL: [Capability; 19] = [
        Capability::Name,
        Capability::Dir,
        Capability::Path,
        Capability::TargetName,
        Capability::TargetDir,
        Capability::TargetPath,
        Capability::EmitEnable,
        Capability::SetEmitEnable,
        Capability::EatWhitespaces,
        Capability::SetEatWhitespaces,
        Capability::EatBlanklines,
        Capability::SetEatBlanklines,
        Capability::Exc,
        Capability::Clear,
        Capability::Emit,
        Capability::Include,
        Capability::Render,
        Capability::SetAttr,
        Capability::GetAttr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Name => "name",
            Capability::Dir => "dir",
            Capability::Path => "path",
            Capability::TargetName => "target_name",
            Capability::TargetDir => "target_dir",
            Capability::TargetPath => "target_path",
            Capability::EmitEnable => "emit_enable",
            Capability::SetEmitEnable => "set_emit_enable",
            Capability::EatWhitespaces => "eat_whitespaces",
            Capability::SetEatWhitespaces => "set_eat_whitespaces",
            Capability::EatBlanklines => "eat_blanklines",
            Capability::SetEatBlanklines => "set_eat_blanklines",
            Capability::Exc => "exc",
            Capability::Clear => "clear",
            Capability::Emit => "emit",
            Capability::Include => "include",
            Capability::Render => "render",
            Capability::SetAttr => "set_attr",
            Capability::GetAttr => "get_attr",
        }
    }
}

/// Register every capability in the session scope's built-ins table.
pub(crate) fn install(lua: &Lua, session: &Rc<Session>) -> mlua::Result<()> {
    let table = session.scope.builtins();
    for capability in Capability::ALL {
        table.raw_set(capability.name(), function(lua, session, capability)?)?;
    }
    Ok(())
}

fn function(lua: &Lua, session: &Rc<Session>, capability: Capability) -> mlua::Result<Function> {
    let session = Rc::clone(session);
    match capability {
        Capability::Name => lua.create_function(move |_, ()| Ok(session.origin.name().to_string())),
        Capability::Dir => lua.create_function(move |_, ()| Ok(path_string(session.origin.dir()))),
        Capability::Path => {
            lua.create_function(move |_, ()| Ok(session.origin.path().map(path_string)))
        }
        Capability::TargetName => lua.create_function(move |_, ()| {
            Ok(session.target.as_ref().map(|t| t.name().to_string()))
        }),
        Capability::TargetDir => lua.create_function(move |_, ()| {
            Ok(session.target.as_ref().map(|t| path_string(t.dir())))
        }),
        Capability::TargetPath => lua.create_function(move |_, ()| {
            Ok(session.target.as_ref().and_then(Origin::path).map(path_string))
        }),
        Capability::EmitEnable => {
            lua.create_function(move |_, ()| Ok(session.output.borrow().policy().emit_enabled))
        }
        Capability::SetEmitEnable => lua.create_function(move |_, enable: Value| {
            session.output.borrow_mut().policy_mut().emit_enabled = is_truthy(&enable);
            Ok(())
        }),
        Capability::EatWhitespaces => {
            lua.create_function(move |_, ()| Ok(session.output.borrow().policy().eat_whitespaces))
        }
        Capability::SetEatWhitespaces => lua.create_function(move |_, eat: Value| {
            session.output.borrow_mut().policy_mut().eat_whitespaces = is_truthy(&eat);
            Ok(())
        }),
        Capability::EatBlanklines => {
            lua.create_function(move |_, ()| Ok(session.output.borrow().policy().eat_blanklines))
        }
        Capability::SetEatBlanklines => lua.create_function(move |_, eat: Value| {
            session.output.borrow_mut().policy_mut().eat_blanklines = is_truthy(&eat);
            Ok(())
        }),
        Capability::Exc => lua.create_function(move |_, ()| Ok(session.exc.clone())),
        Capability::Clear => lua.create_function(move |_, ()| {
            session.output.borrow_mut().clear();
            Ok(())
        }),
        Capability::Emit => lua.create_function(move |lua, value: Value| {
            if value.is_nil() {
                return Ok(());
            }
            let text = LuaEvaluator::from_lua(lua.clone()).stringify(value)?;
            session.output.borrow_mut().emit(&text);
            Ok(())
        }),
        Capability::Include => {
            lua.create_function(move |lua, (path, options): (String, Value)| {
                include(lua, &session, &path, IncludeOptions::from_lua(options)?)
            })
        }
        Capability::Render => lua.create_function(move |lua, source: String| {
            let nodes = parse(&source).map_err(mlua::Error::external)?;
            let evaluator = LuaEvaluator::from_lua(lua.clone());
            Renderer::new(&evaluator, &session.scope, &session.output)
                .render(&nodes)
                .map_err(mlua::Error::external)
        }),
        Capability::SetAttr => lua.create_function(move |_, (key, value): (Value, Value)| {
            session.attrs.raw_set(key, value)
        }),
        Capability::GetAttr => {
            lua.create_function(move |_, key: Value| session.attrs.raw_get::<Value>(key))
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Options understood by `include` itself; every other key is a binding.
const EMIT_OPTION: &str = "emit";
const NAMESPACE_OPTION: &str = "namespace";

/// The second argument of `include`: an option table, or a bare `emit` flag.
enum IncludeOptions {
    Table(Table),
    Emit(bool),
}

impl IncludeOptions {
    fn from_lua(value: Value) -> mlua::Result<Self> {
        match value {
            Value::Nil => Ok(IncludeOptions::Emit(true)),
            Value::Boolean(emit) => Ok(IncludeOptions::Emit(emit)),
            Value::Table(table) => Ok(IncludeOptions::Table(table)),
            other => Err(mlua::Error::runtime(format!(
                "include options must be a table or a boolean, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Name under which an included template sees its includer.
pub const PARENT_BINDING: &str = "parent";

/// Render another template file into the current output.
///
/// The included template starts from a copy of the includer's global scope,
/// overlaid with `options.namespace`, then with any other option keys, plus
/// a `parent` table describing the includer. Its global scope is merged back
/// afterwards. A boolean in place of the table only sets `emit`.
fn include(lua: &Lua, session: &Session, path: &str, options: IncludeOptions) -> mlua::Result<()> {
    let resolved = session.origin.dir().join(path);
    tracing::debug!(
        includer = session.origin.name(),
        path = %resolved.display(),
        "including template"
    );
    let mut child = Template::from_path(&resolved).map_err(mlua::Error::external)?;

    let scope = session.scope.snapshot(lua)?;
    let emit = match options {
        IncludeOptions::Emit(emit) => emit,
        IncludeOptions::Table(options) => overlay_options(&scope, &options)?,
    };
    scope.raw_set(PARENT_BINDING, parent_table(lua, &session.origin)?)?;

    let evaluator = LuaEvaluator::from_lua(lua.clone());
    let (text, globals) = child
        .render_in(&evaluator, scope)
        .map_err(mlua::Error::external)?;
    session.scope.absorb(&globals, &[PARENT_BINDING])?;

    if emit {
        session.output.borrow_mut().emit(&text);
    }
    Ok(())
}

/// Copy `options.namespace`, then the other option keys, into `scope`.
/// Returns the `emit` flag.
fn overlay_options(scope: &Table, options: &Table) -> mlua::Result<bool> {
    if let Value::Table(namespace) = options.raw_get::<Value>(NAMESPACE_OPTION)? {
        for pair in namespace.pairs::<Value, Value>() {
            let (key, value) = pair?;
            scope.raw_set(key, value)?;
        }
    }
    let mut emit = true;
    for pair in options.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let option = key
            .as_string()
            .and_then(|s| s.to_str().ok())
            .map(|s| s.to_string());
        match option.as_deref() {
            Some(EMIT_OPTION) => emit = is_truthy(&value),
            Some(NAMESPACE_OPTION) => {}
            _ => scope.raw_set(key, value)?,
        }
    }
    Ok(emit)
}

fn parent_table(lua: &Lua, origin: &Origin) -> mlua::Result<Table> {
    let parent = lua.create_table()?;
    parent.raw_set("name", origin.name())?;
    parent.raw_set("dir", path_string(origin.dir()))?;
    parent.raw_set("path", origin.path().map(path_string))?;
    Ok(parent)
}
