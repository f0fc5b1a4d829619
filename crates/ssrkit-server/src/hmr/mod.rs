//! Live reload: event fan-out to browsers, plus the development watcher
//! that rebuilds the bundle and triggers reloads.

pub mod broadcaster;
pub mod rebuilder;
pub mod session;
pub mod throttle;
pub mod watcher;

pub use broadcaster::{BroadcasterConfig, EventBroadcaster};
pub use rebuilder::{RebuildOutcome, Rebuilder, RELOAD_EVENT};
pub use session::{HmrMessage, HmrSession};
pub use throttle::{Throttle, ThrottleState};
pub use watcher::{Debouncer, DevWatcher};
