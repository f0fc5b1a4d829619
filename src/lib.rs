//! ssrkit
//!
//! Facade over the workspace crates: renders bundled UI components to HTML
//! on pooled Boa JavaScript engines, caches the markup on disk and drives
//! live reload during development.

pub use ssrkit_common as common;
pub use ssrkit_metrics as metrics;
pub use ssrkit_server as server;

pub use ssrkit_common::{Result, SsrConfig, SsrError};
pub use ssrkit_server::{EnginePool, RenderCache, Renderer};
