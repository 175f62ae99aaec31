//! Compiled transform scripts.

use std::sync::{Arc, Mutex};

use jobflow_core::{DoneCallback, LogLevel, NodeStatus};
use mlua::{DeserializeOptions, Function, Lua, LuaOptions, LuaSerdeExt, RegistryKey, StdLib, Value};
use serde_json::Map;

use crate::bridge::{Bridge, Invocation};
use crate::failure::ScriptFailure;
use crate::{SandboxError, env};

/// A handler registered with `node.on`.
struct Listener {
    event: String,
    /// Where the handler function was defined.
    origin: String,
    key: RegistryKey,
}

type Listeners = Arc<Mutex<Vec<Listener>>>;

/// A script compiled once and run once per job.
///
/// The Lua state, the compiled function and handlers registered through
/// `node.on` are shared by all runs. Arguments, the `node` bridge and `done`
/// are created for each run.
pub struct SandboxExecutor {
    name: String,
    lua: Mutex<Lua>,
    function: RegistryKey,
    listeners: Listeners,
}

impl SandboxExecutor {
    /// Compile `body` as the transform script `name`.
    ///
    /// The body becomes the inside of `function(msg, node, job, done)`; the
    /// header takes exactly one line, so reported lines are one ahead of the
    /// body's own numbering.
    pub fn compile(
        name: impl Into<String>,
        body: &str,
        global_context: &Map<String, serde_json::Value>,
    ) -> Result<Self, SandboxError> {
        let name = name.into();
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::new(),
        )?;
        let env = env::build(&lua, &name, global_context)?;

        let source = format!("return function(msg, node, job, done)\n{}\nend", body);
        let function: Function = lua
            .load(source)
            .set_name(format!("={}", name))
            .set_environment(env)
            .eval()
            .map_err(|e| match e {
                mlua::Error::SyntaxError { message, .. } => SandboxError::Compile {
                    name: name.clone(),
                    message,
                },
                other => SandboxError::Lua(other),
            })?;
        let function = lua.create_registry_value(function)?;

        tracing::debug!("Compiled script {}", name);

        Ok(Self {
            name,
            lua: Mutex::new(lua),
            function,
            listeners: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the script for one job and return its raw result.
    ///
    /// Blocks the calling thread until the script returns.
    pub fn run(&self, invocation: Invocation) -> Result<serde_json::Value, ScriptFailure> {
        let lua = self
            .lua
            .lock()
            .map_err(|_| ScriptFailure::new(SandboxError::Poisoned.to_string()))?;
        self.call(&lua, invocation)
            .map_err(|e| ScriptFailure::from_lua(&e))
    }

    fn call(&self, lua: &Lua, invocation: Invocation) -> mlua::Result<serde_json::Value> {
        let Invocation {
            message,
            job,
            done,
            bridge,
        } = invocation;

        let function: Function = lua.registry_value(&self.function)?;
        let msg = lua.to_value(&message)?;
        let job = lua.to_value(&job)?;
        let node = self.node_table(lua, bridge)?;
        let done = done_function(lua, done)?;

        let result: Value = function.call((msg, node, job, done))?;
        to_json(lua, result)
    }

    /// Invoke every handler registered for `event` with `node.on`.
    ///
    /// Handler failures are logged and do not stop the remaining handlers.
    pub fn emit(&self, event: &str) -> Result<(), SandboxError> {
        let lua = self.lua.lock().map_err(|_| SandboxError::Poisoned)?;
        let handlers = {
            let listeners = self.listeners.lock().map_err(|_| SandboxError::Poisoned)?;
            listeners
                .iter()
                .filter(|listener| listener.event == event)
                .map(|listener| lua.registry_value::<Function>(&listener.key))
                .collect::<mlua::Result<Vec<_>>>()?
        };

        for handler in handlers {
            if let Err(e) = handler.call::<()>(()) {
                tracing::warn!("Script {} {} handler failed: {}", self.name, event, e);
            }
        }
        Ok(())
    }

    /// Build the `node` bridge table for one run.
    fn node_table(&self, lua: &Lua, bridge: Arc<dyn Bridge>) -> mlua::Result<mlua::Table> {
        let node = lua.create_table()?;

        for (name, level) in [
            ("log", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let bridge = bridge.clone();
            node.raw_set(
                name,
                lua.create_function(move |lua, value: Value| {
                    bridge.log(level, &display(lua, value)?);
                    Ok(())
                })?,
            )?;
        }

        let status_bridge = bridge.clone();
        node.raw_set(
            "status",
            lua.create_function(move |lua, value: Value| {
                let status: NodeStatus = lua.from_value(value)?;
                status_bridge.status(status);
                Ok(())
            })?,
        )?;

        node.raw_set(
            "send",
            lua.create_function(move |lua, value: Value| {
                bridge.send(to_json(lua, value)?);
                Ok(())
            })?,
        )?;

        // One handler per event and definition site: a script that calls
        // `node.on` on every job replaces its earlier registration.
        let listeners = self.listeners.clone();
        node.raw_set(
            "on",
            lua.create_function(move |lua, (event, handler): (String, Function)| {
                let info = handler.info();
                let origin = format!("{:?}:{:?}", info.short_src, info.line_defined);
                let key = lua.create_registry_value(handler)?;
                let mut listeners = listeners
                    .lock()
                    .map_err(|_| mlua::Error::RuntimeError("listener registry unavailable".into()))?;
                match listeners
                    .iter_mut()
                    .find(|l| l.event == event && l.origin == origin)
                {
                    Some(existing) => existing.key = key,
                    None => listeners.push(Listener { event, origin, key }),
                }
                Ok(())
            })?,
        )?;

        Ok(node)
    }
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("name", &self.name)
            .finish()
    }
}

/// `done(err?)`: a missing or nil argument completes the job successfully.
fn done_function(lua: &Lua, done: DoneCallback) -> mlua::Result<Function> {
    lua.create_function(move |lua, error: Option<Value>| {
        let outcome = match error {
            None => Ok(()),
            Some(Value::LightUserData(ud)) if ud.0.is_null() => Ok(()),
            Some(value) => Err(display(lua, value)?),
        };
        if !done.complete(outcome) {
            tracing::debug!("done called more than once");
        }
        Ok(())
    })
}

/// List levels whose `nil` holes are kept: the result list and the
/// per-output lists inside it.
const LIST_DEPTH: usize = 2;

/// Convert a script value to JSON. Functions and other host-only values
/// become `null`.
fn to_json(lua: &Lua, value: Value) -> mlua::Result<serde_json::Value> {
    let value = fill_holes(lua, value, LIST_DEPTH)?;
    lua.from_value_with(value, DeserializeOptions::new().deny_unsupported_types(false))
}

/// Rebuild list tables with `nil` holes so every hole becomes `null`.
///
/// `{a, nil, b}` has no key 2, and its length may be reported as 1; the
/// rebuilt table runs from 1 to the highest index with `null` in the gaps.
/// Tables with non-index keys are left alone, as are very sparse ones.
fn fill_holes(lua: &Lua, value: Value, depth: usize) -> mlua::Result<Value> {
    let Value::Table(table) = value else {
        return Ok(value);
    };
    if depth == 0 {
        return Ok(Value::Table(table));
    }

    let mut entries = Vec::new();
    let mut highest = 0;
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, item) = pair?;
        match key {
            Value::Integer(index) if index > 0 => {
                highest = highest.max(index);
                entries.push((index, item));
            }
            _ => return Ok(Value::Table(table)),
        }
    }
    if entries.is_empty() || highest > 2 * entries.len() as i64 + 8 {
        return Ok(Value::Table(table));
    }

    let list = lua.create_table_with_capacity(highest as usize, 0)?;
    for index in 1..=highest {
        list.raw_set(index, Value::NULL)?;
    }
    for (index, item) in entries {
        list.raw_set(index, fill_holes(lua, item, depth - 1)?)?;
    }
    Ok(Value::Table(list))
}

/// Text of a logged value: strings as-is, anything else as JSON.
fn display(lua: &Lua, value: Value) -> mlua::Result<String> {
    Ok(match to_json(lua, value)? {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}
