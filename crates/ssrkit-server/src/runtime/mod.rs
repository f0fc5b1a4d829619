pub mod boa;
pub mod engine;
pub mod engine_pool;
pub mod memory;

mod conversions;


pub use boa::{BoaEngine, BoaEngineFactory};
pub use engine::{EngineFactory, ScriptEngine, ScriptError};
pub use engine_pool::{EnginePool, PoolConfig, PoolStats, PooledEngine};
pub use memory::{MemoryMonitor, MemoryProbe, MonitorConfig, ProcStatusProbe};
