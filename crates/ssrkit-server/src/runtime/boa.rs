//! Boa-backed [`ScriptEngine`].
//!
//! A Boa `Context` is neither `Send` nor `Sync`, so each engine owns a
//! dedicated worker thread that creates the context and serves commands over
//! a channel. The handle itself is `Send` and can move freely between the
//! blocking threads tokio hands renders to.

use boa_engine::{
    js_string,
    object::ObjectInitializer,
    property::Attribute,
    Context, JsResult, JsValue, NativeFunction, Source,
};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use crate::resource_limits::ResourceLimits;
use crate::runtime::conversions::json_to_js_value;
use crate::runtime::engine::{EngineFactory, ScriptEngine, ScriptError};

type Reply<T> = mpsc::Sender<Result<T, ScriptError>>;

enum Command {
    Run {
        source: String,
        origin: String,
        reply: Reply<String>,
    },
    SetGlobal {
        name: String,
        value: JsonValue,
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
}

/// Handle to a Boa context running on its own thread.
///
/// Dropping the handle closes the command channel; the worker thread then
/// drops its context and exits.
pub struct BoaEngine {
    commands: mpsc::Sender<Command>,
}

impl BoaEngine {
    /// Starts the worker thread and waits for its context to be ready.
    pub fn spawn(limits: &ResourceLimits) -> Result<Self, ScriptError> {
        static ENGINE_COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = ENGINE_COUNTER.fetch_add(1, Ordering::Relaxed);

        let (commands, inbox) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), ScriptError>>(1);
        let limits = limits.clone();

        std::thread::Builder::new()
            .name(format!("ssrkit-engine-{}", n))
            .spawn(move || {
                let mut worker = match Worker::new(&limits) {
                    Ok(worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(command) = inbox.recv() {
                    worker.handle(command);
                }
                tracing::trace!("engine worker {} exiting", n);
            })
            .map_err(|e| ScriptError::new(format!("failed to spawn engine thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| ScriptError::new("engine thread exited during startup"))??;

        Ok(Self { commands })
    }

    fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, ScriptError> {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ScriptError::new("engine thread has stopped"))?;
        response
            .recv()
            .map_err(|_| ScriptError::new("engine thread stopped before replying"))?
    }
}

impl ScriptEngine for BoaEngine {
    fn run_script(&mut self, source: &str, origin: &str) -> Result<String, ScriptError> {
        self.call(|reply| Command::Run {
            source: source.to_string(),
            origin: origin.to_string(),
            reply,
        })
    }

    fn set_global(&mut self, name: &str, value: &JsonValue) -> Result<(), ScriptError> {
        self.call(|reply| Command::SetGlobal {
            name: name.to_string(),
            value: value.clone(),
            reply,
        })
    }

    fn reset_to_baseline(&mut self) -> Result<(), ScriptError> {
        self.call(|reply| Command::Reset { reply })
    }
}

/// Creates [`BoaEngine`]s with the given limits.
#[derive(Debug, Clone, Default)]
pub struct BoaEngineFactory {
    limits: ResourceLimits,
}

impl BoaEngineFactory {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl EngineFactory for BoaEngineFactory {
    type Engine = BoaEngine;

    fn create(&self) -> Result<BoaEngine, ScriptError> {
        BoaEngine::spawn(&self.limits)
    }
}

/// Owns the context on the worker thread.
struct Worker {
    ctx: Context,
}

impl Worker {
    fn new(limits: &ResourceLimits) -> Result<Self, ScriptError> {
        let mut ctx = Context::default();
        ctx.runtime_limits_mut()
            .set_loop_iteration_limit(limits.loop_iteration_limit);
        ctx.runtime_limits_mut()
            .set_recursion_limit(limits.recursion_limit);
        install_baseline(&mut ctx)?;
        Ok(Self { ctx })
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Run { source, origin, reply } => {
                let _ = reply.send(self.run(&source, &origin));
            }
            Command::SetGlobal { name, value, reply } => {
                let _ = reply.send(self.set_global(&name, &value));
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.reset());
            }
        }
    }

    fn run(&mut self, source: &str, origin: &str) -> Result<String, ScriptError> {
        tracing::trace!("evaluating {} ({} bytes)", origin, source.len());
        let value = self
            .ctx
            .eval(Source::from_bytes(source))
            .map_err(|e| ScriptError::new(e.to_string()))?;
        value
            .to_string(&mut self.ctx)
            .map(|s| s.to_std_string_escaped())
            .map_err(|e| ScriptError::new(e.to_string()))
    }

    fn set_global(&mut self, name: &str, value: &JsonValue) -> Result<(), ScriptError> {
        let value = json_to_js_value(value, &mut self.ctx)?;
        let global = self.ctx.global_object();
        global
            .set(js_string!(name), value, true, &mut self.ctx)
            .map(|_| ())
            .map_err(|e| ScriptError::new(e.to_string()))
    }

    /// Swaps in a fresh realm, dropping every global and top-level lexical
    /// binding the previous scripts created.
    fn reset(&mut self) -> Result<(), ScriptError> {
        let realm = self
            .ctx
            .create_realm()
            .map_err(|e| ScriptError::new(format!("failed to create realm: {}", e)))?;
        self.ctx.enter_realm(realm);
        install_baseline(&mut self.ctx)
    }
}

/// Globals every fragment may rely on: `window`/`self` aliasing the global
/// object and a `console` that forwards to tracing.
fn install_baseline(ctx: &mut Context) -> Result<(), ScriptError> {
    let global = ctx.global_object();
    let register_err = |e: boa_engine::JsError| ScriptError::new(e.to_string());

    ctx.register_global_property(js_string!("window"), global.clone(), Attribute::all())
        .map_err(register_err)?;
    ctx.register_global_property(js_string!("self"), global, Attribute::all())
        .map_err(register_err)?;

    let console = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("log"), 0)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("info"), 0)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("debug"), 0)
        .function(NativeFunction::from_fn_ptr(console_warn), js_string!("warn"), 0)
        .function(NativeFunction::from_fn_ptr(console_error), js_string!("error"), 0)
        .build();
    ctx.register_global_property(js_string!("console"), console, Attribute::all())
        .map_err(register_err)?;
    Ok(())
}

fn console_text(args: &[JsValue], ctx: &mut Context) -> String {
    args.iter()
        .map(|arg| {
            arg.to_string(ctx)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|_| "<unprintable>".to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_debug(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    tracing::debug!(target: "ssrkit::js", "{}", console_text(args, ctx));
    Ok(JsValue::undefined())
}

fn console_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    tracing::warn!(target: "ssrkit::js", "{}", console_text(args, ctx));
    Ok(JsValue::undefined())
}

fn console_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    tracing::error!(target: "ssrkit::js", "{}", console_text(args, ctx));
    Ok(JsValue::undefined())
}
