//! The restricted global environment scripts run in.

use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use serde_json::Map;

/// Pure base functions copied into the environment.
const BASE_FUNCTIONS: &[&str] = &[
    "assert", "error", "ipairs", "next", "pairs", "pcall", "rawequal", "rawlen", "select",
    "tonumber", "tostring", "type", "xpcall",
];

/// Standard libraries copied into the environment.
const LIBRARIES: &[&str] = &["table", "string", "math", "utf8"];

/// Build the environment table for the script `name`.
pub(crate) fn build(
    lua: &Lua,
    name: &str,
    global_context: &Map<String, serde_json::Value>,
) -> mlua::Result<Table> {
    let globals = lua.globals();
    let env = lua.create_table()?;

    for function in BASE_FUNCTIONS.iter().chain(LIBRARIES) {
        env.raw_set(*function, globals.raw_get::<Value>(*function)?)?;
    }
    let table: Table = globals.raw_get("table")?;
    env.raw_set("unpack", table.raw_get::<Value>("unpack")?)?;
    env.raw_set("null", Value::NULL)?;

    let global = lua.to_value(&serde_json::Value::Object(global_context.clone()))?;
    let context = lua.create_table()?;
    context.raw_set("global", read_only(lua, global, "context.global")?)?;
    env.raw_set("context", read_only(lua, Value::Table(context), "context")?)?;

    let meta = lua.create_table()?;
    let script = name.to_string();
    meta.raw_set(
        "__index",
        lua.create_function(move |lua, (_, key): (Table, String)| -> mlua::Result<Value> {
            let mut text = format!("ReferenceError: {} is not defined", key);
            let line = lua.inspect_stack(1).map(|frame| frame.curr_line());
            if let Some(line) = line.filter(|l| *l > 0) {
                text.push_str(&format!("\n    at {}:{}", script, line));
            }
            Err(mlua::Error::RuntimeError(text))
        })?,
    )?;
    meta.raw_set(
        "__newindex",
        lua.create_function(|_, (_, key, _): (Table, String, Value)| -> mlua::Result<()> {
            Err(mlua::Error::RuntimeError(format!(
                "TypeError: cannot assign to undeclared global {}",
                key
            )))
        })?,
    )?;
    meta.raw_set("__metatable", false)?;

    attach(lua, env, meta)
}

/// Wrap `inner` in a proxy table that rejects writes.
fn read_only(lua: &Lua, inner: Value, label: &str) -> mlua::Result<Table> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;
    let label = label.to_string();
    meta.raw_set("__index", inner)?;
    meta.raw_set(
        "__newindex",
        lua.create_function(move |_, (_, key, _): (Table, String, Value)| -> mlua::Result<()> {
            Err(mlua::Error::RuntimeError(format!(
                "TypeError: {} is read-only (assigning {})",
                label, key
            )))
        })?,
    )?;
    meta.raw_set("__metatable", false)?;
    attach(lua, proxy, meta)
}

/// Set a protected metatable through the base library's `setmetatable`.
fn attach(lua: &Lua, table: Table, meta: Table) -> mlua::Result<Table> {
    let setmetatable: Function = lua.globals().raw_get("setmetatable")?;
    setmetatable.call((table, meta))
}
