pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use logging::*;
pub use models::{
    Bind, CommandSpec, CompletedContainer, CompletedProcess, ComputeResource, ContainerSpec,
    Machine, NonZeroExitError, ScriptEngine, ScriptRecord,
};
pub use traits::{CodeCheckout, ContainerExecutor};

/// 统一的Result类型
pub type BatchResult<T> = std::result::Result<T, BatchError>;
