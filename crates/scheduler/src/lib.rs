//! 脚本批次调度
//!
//! 对共享可变状态的一组脚本执行不动点重试：
//! 每轮按固定顺序运行所有待定脚本，直到一轮不再产生新的成功，
//! 由此隐式发现脚本间经由副作用形成的执行顺序。

pub mod batch;
pub mod classify;
pub mod results;

pub use batch::{BatchOutcome, BatchReport, BatchRequest, ScriptBatchScheduler};
pub use classify::{classify_exit, ExecutionClass, KILL_EXIT, TIMEOUT_EXIT};
pub use results::{fs_escape, ResultLayout};
