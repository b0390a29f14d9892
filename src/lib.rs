//! 分布式定时任务协调层的宿主进程
//!
//! 把集群成员、选举、分发、可靠队列和执行守卫组装成一个可运行的节点。

pub mod app;
pub mod invoker;
pub mod log_sink;
pub mod shutdown;
pub mod trigger;

pub use app::{Application, ApplicationBuilder};
pub use invoker::ShellJobInvoker;
pub use log_sink::TracingLogSink;
pub use shutdown::{join_all_with_timeout, wait_for_shutdown_signal, ShutdownManager};
pub use trigger::{CronTrigger, ScheduledJob};
