pub mod cache;
pub mod cache_key;
pub mod renderer;

pub use cache::{CacheStats, RenderCache};
pub use cache_key::cache_key;
pub use renderer::{fragment_path, RenderJob, Renderer};
