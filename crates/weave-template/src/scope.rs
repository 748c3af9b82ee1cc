/*
 * scope.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The two-layer variable scope fragments run in.
//!
//! Lookups from a fragment walk four tables, linked with `__index`:
//!
//! ```text
//! local -> global -> built-ins -> Lua standard library
//! ```
//!
//! Fragments run with the local table as their environment, so every global
//! assignment lands there. [`Scope::settle`] folds the local layer into the
//! global one after each evaluation step and clears it.

use crate::namespace::Namespace;
use mlua::{DeserializeOptions, Lua, LuaSerdeExt, Result, SerializeOptions, Table, Value};

#[derive(Debug, Clone)]
pub struct Scope {
    globals: Table,
    locals: Table,
    builtins: Table,
    /// Chunk name used for fragments of the owning template.
    label: String,
}

impl Scope {
    /// Open a scope whose global layer is `globals`.
    pub fn new(lua: &Lua, globals: Table, label: impl Into<String>) -> Result<Self> {
        let builtins = lua.create_table()?;
        builtins.set_metatable(Some(index_metatable(lua, lua.globals())?))?;
        globals.set_metatable(Some(index_metatable(lua, builtins.clone())?))?;
        let locals = lua.create_table()?;
        locals.set_metatable(Some(index_metatable(lua, globals.clone())?))?;

        Ok(Self {
            globals,
            locals,
            builtins,
            label: label.into(),
        })
    }

    /// The environment table fragments are loaded with.
    pub fn env(&self) -> &Table {
        &self.locals
    }

    pub fn globals(&self) -> &Table {
        &self.globals
    }

    /// Table the built-in capabilities are registered in.
    pub fn builtins(&self) -> &Table {
        &self.builtins
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind a name in the local layer.
    pub fn bind(&self, name: &str, value: Value) -> Result<()> {
        self.locals.raw_set(name, value)
    }

    /// Fold local bindings into the global layer and clear the local layer.
    pub fn settle(&self) -> Result<()> {
        let pending = raw_pairs(&self.locals)?;
        for (key, value) in pending {
            self.locals.raw_set(key.clone(), Value::Nil)?;
            self.globals.raw_set(key, value)?;
        }
        Ok(())
    }

    /// A shallow copy of the global layer, without metatable.
    pub fn snapshot(&self, lua: &Lua) -> Result<Table> {
        copy_table(lua, &self.globals)
    }

    /// Copy every binding of `other` into the global layer, except `skip`.
    pub fn absorb(&self, other: &Table, skip: &[&str]) -> Result<()> {
        for (key, value) in raw_pairs(other)? {
            if let Value::String(name) = &key {
                if name
                    .to_str()
                    .is_ok_and(|name| skip.iter().any(|s| *s == &*name))
                {
                    continue;
                }
            }
            self.globals.raw_set(key, value)?;
        }
        Ok(())
    }

    /// Export the JSON-representable global bindings.
    pub fn export(&self, lua: &Lua) -> Result<Namespace> {
        export_table(lua, &self.globals)
    }
}

/// Convert a namespace into a fresh Lua table.
pub fn namespace_table(lua: &Lua, namespace: &Namespace) -> Result<Table> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    let table = lua.create_table()?;
    for (key, value) in namespace.iter() {
        table.raw_set(key.as_str(), lua.to_value_with(value, options)?)?;
    }
    Ok(table)
}

/// Export the string-keyed, JSON-representable entries of a table.
pub fn export_table(lua: &Lua, table: &Table) -> Result<Namespace> {
    let options = DeserializeOptions::new().deny_recursive_tables(false);
    let mut namespace = Namespace::new();
    for (key, value) in raw_pairs(table)? {
        let Value::String(name) = key else { continue };
        let Ok(name) = name.to_str().map(|s| s.to_string()) else {
            continue;
        };
        if let Ok(json) = lua.from_value_with::<serde_json::Value>(value, options) {
            namespace.insert(name, json);
        }
    }
    Ok(namespace)
}

fn index_metatable(lua: &Lua, parent: Table) -> Result<Table> {
    let metatable = lua.create_table()?;
    metatable.raw_set("__index", parent)?;
    Ok(metatable)
}

fn copy_table(lua: &Lua, source: &Table) -> Result<Table> {
    let copy = lua.create_table()?;
    for (key, value) in raw_pairs(source)? {
        copy.raw_set(key, value)?;
    }
    Ok(copy)
}

/// Collect the raw key/value pairs of a table.
///
/// `Table::pairs` would honour a `__pairs` metamethod; the scope layers only
/// care about their own entries.
fn raw_pairs(table: &Table) -> Result<Vec<(Value, Value)>> {
    let mut pairs = Vec::new();
    table.for_each(|key: Value, value: Value| {
        pairs.push((key, value));
        Ok(())
    })?;
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(lua: &Lua) -> Scope {
        Scope::new(lua, lua.create_table().unwrap(), "test").unwrap()
    }

    fn run(lua: &Lua, scope: &Scope, code: &str) {
        lua.load(code)
            .set_environment(scope.env().clone())
            .exec()
            .unwrap();
    }

    #[test]
    fn test_assignments_land_in_locals_until_settled() {
        let lua = Lua::new();
        let scope = scope(&lua);
        run(&lua, &scope, "x = 1");
        assert_eq!(scope.globals().raw_get::<Value>("x").unwrap(), Value::Nil);
        scope.settle().unwrap();
        assert_eq!(scope.globals().raw_get::<i64>("x").unwrap(), 1);
        assert_eq!(scope.env().raw_get::<Value>("x").unwrap(), Value::Nil);
    }

    #[test]
    fn test_lookup_chain_reaches_builtins_and_stdlib() {
        let lua = Lua::new();
        let scope = scope(&lua);
        scope.builtins().set("answer", 42).unwrap();
        run(&lua, &scope, "a = answer; b = math.max(1, 2)");
        scope.settle().unwrap();
        assert_eq!(scope.globals().raw_get::<i64>("a").unwrap(), 42);
        assert_eq!(scope.globals().raw_get::<i64>("b").unwrap(), 2);
    }

    #[test]
    fn test_locals_never_observe_stale_bindings() {
        let lua = Lua::new();
        let scope = scope(&lua);
        scope.bind("i", Value::Integer(1)).unwrap();
        scope.settle().unwrap();
        scope.bind("i", Value::Integer(2)).unwrap();
        scope.settle().unwrap();
        assert_eq!(scope.globals().raw_get::<i64>("i").unwrap(), 2);
    }

    #[test]
    fn test_namespace_round_trip() {
        let lua = Lua::new();
        let ns = Namespace::new()
            .with("name", "world")
            .with("items", json!([1, 2, 3]))
            .with("nothing", json!(null));
        let table = namespace_table(&lua, &ns).unwrap();
        assert_eq!(table.raw_get::<Value>("nothing").unwrap(), Value::Nil);

        let scope = Scope::new(&lua, table, "test").unwrap();
        run(&lua, &scope, "f = function() end; n = #items");
        scope.settle().unwrap();

        let exported = scope.export(&lua).unwrap();
        assert_eq!(exported.get("name"), Some(&json!("world")));
        assert_eq!(exported.get("n"), Some(&json!(3)));
        assert!(!exported.contains("f"));
    }

    #[test]
    fn test_snapshot_and_absorb() {
        let lua = Lua::new();
        let parent = scope(&lua);
        parent.globals().raw_set("kept", 1).unwrap();

        let copy = parent.snapshot(&lua).unwrap();
        copy.raw_set("added", 2).unwrap();
        copy.raw_set("parent", "self").unwrap();
        assert_eq!(parent.globals().raw_get::<Value>("added").unwrap(), Value::Nil);

        parent.absorb(&copy, &["parent"]).unwrap();
        assert_eq!(parent.globals().raw_get::<i64>("added").unwrap(), 2);
        assert_eq!(parent.globals().raw_get::<Value>("parent").unwrap(), Value::Nil);
    }
}
