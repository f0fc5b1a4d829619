//! ssrkit common types
//!
//! Error taxonomy, configuration and per-request context shared by the
//! server, metrics and CLI crates.

pub mod config;
pub mod context;
pub mod error;

pub use config::{CacheConfig, HmrConfig, PoolSettings, RouteConfig, SsrConfig};
pub use context::{Location, RequestContext};
pub use error::{Result, SsrError};
