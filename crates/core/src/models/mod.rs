pub mod container;
pub mod engine;
pub mod machine;
pub mod process;
pub mod resource;
pub mod script;

pub use container::{Bind, CompletedContainer, ContainerSpec};
pub use engine::ScriptEngine;
pub use machine::Machine;
pub use process::{CommandSpec, CompletedProcess, NonZeroExitError};
pub use resource::ComputeResource;
pub use script::ScriptRecord;
