//! 每次触发的执行守卫
//!
//! 检查顺序：前置钩子、IP黑名单、主节点亲和性、在途标记、单次触发锁、
//! 本地重入、分发决策，全部通过后才执行任务体。无论结果如何都会释放资源并记录完成。

pub mod guard;
pub mod hooks;

pub use guard::{ExecutionGuard, ExecutionGuardConfig, FireOutcome};
pub use hooks::PreHook;
