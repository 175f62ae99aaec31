//! Isolated execution of user transform scripts.
//!
//! A script body is compiled once into a [`SandboxExecutor`] and then run
//! once per job. Scripts are Lua and see only a curated environment:
//!
//! - `table`, `string`, `math` and `utf8`, plus the pure base functions
//! - `null`, the empty-slot marker for result lists
//! - `context.global`, a read-only view of the configured global context
//! - the per-invocation arguments `msg`, `node`, `job` and `done`
//!
//! There is no file, process, module loading or debug access. Reading an
//! undeclared global raises `ReferenceError: <name> is not defined` and
//! assigning one raises a `TypeError`.

mod bridge;
mod env;
mod executor;
mod failure;

pub use bridge::{Bridge, Invocation, JobInfo};
pub use executor::SandboxExecutor;
pub use failure::{ScriptFailure, diagnose};

/// Sandbox errors raised outside of a script run.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to compile {name}: {message}")]
    Compile { name: String, message: String },
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("Script runtime unavailable")]
    Poisoned,
}
