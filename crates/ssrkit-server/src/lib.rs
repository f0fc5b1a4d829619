//! ssrkit server
//!
//! Renders bundled UI components to HTML on a pool of embedded Boa
//! JavaScript engines, caches anonymous renders on disk and pushes live
//! reload events to browsers during development.
//!
//! # Components
//!
//! - [`EnginePool`]: bounded, recycled set of script engines
//! - [`Renderer`]: runs a fragment bundle with the request context and
//!   returns its markup
//! - [`RenderCache`]: size and count bounded on-disk markup cache
//! - [`ChangeDetector`]: persisted content digests for source trees
//! - [`EventBroadcaster`]: throttled live-reload fan-out
//! - [`DocumentComposer`]: wraps markup in a full HTML page
//! - [`HttpServer`]: hyper front end tying the above together

pub mod app;
pub mod change_detector;
pub mod document;
pub mod hmr;
pub mod http_router;
pub mod http_server;
pub mod render;
pub mod resource_limits;
pub mod runtime;

pub use app::{App, BackgroundTasks};
pub use change_detector::{ChangeCheck, ChangeDetector, WatchTarget};
pub use document::{DocumentComposer, PageSpec};
pub use hmr::{
    BroadcasterConfig, DevWatcher, EventBroadcaster, HmrMessage, HmrSession, RebuildOutcome,
    Rebuilder,
};
pub use http_router::{AnonymousProvider, ContextProvider, SsrRouter};
pub use http_server::HttpServer;
pub use render::{cache_key, RenderCache, Renderer};
pub use resource_limits::ResourceLimits;
pub use runtime::{
    BoaEngine, BoaEngineFactory, EngineFactory, EnginePool, PoolConfig, PooledEngine,
    ScriptEngine, ScriptError,
};
