//! 核心层：错误类型、搜索上下文、可注入随机源

pub mod context;
pub mod error;
pub mod random;

pub use context::{Phase, SearchConfig, SearchContext};
pub use error::{RepairError, Result};
pub use random::{RandomSource, ScriptedRandom, StdRandom};
