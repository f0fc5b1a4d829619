//! The narrow interface the pool and renderer need from a script engine.

use serde_json::Value as JsonValue;

/// Diagnostic produced by an engine call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// One isolated execution context.
///
/// Implementations own their cleanup: after `reset_to_baseline` nothing a
/// previous script defined may be visible to the next one.
pub trait ScriptEngine: Send + 'static {
    /// Evaluates `source` and returns the completion value as a string.
    /// `origin` names the script in diagnostics.
    fn run_script(&mut self, source: &str, origin: &str) -> Result<String, ScriptError>;

    /// Binds `name` on the global object to a native copy of `value`.
    fn set_global(&mut self, name: &str, value: &JsonValue) -> Result<(), ScriptError>;

    /// Returns the engine to the state it had right after construction.
    fn reset_to_baseline(&mut self) -> Result<(), ScriptError>;
}

/// Creates engines for a pool.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: ScriptEngine;

    fn create(&self) -> Result<Self::Engine, ScriptError>;
}

impl<E, F> EngineFactory for F
where
    E: ScriptEngine,
    F: Fn() -> Result<E, ScriptError> + Send + Sync + 'static,
{
    type Engine = E;

    fn create(&self) -> Result<E, ScriptError> {
        self()
    }
}
