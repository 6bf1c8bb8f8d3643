//! 事件循环契约。
//!
//! # 契约维度速览
//! - **语义**：[`EventLoop`] 是一个单线程、串行、FIFO 的任务执行上下文；通道一旦绑定到某个循环，
//!   其全部 Pipeline 操作与 Handler 回调都只在该循环线程上执行，直到通道生命周期结束。
//! - **错误**：`execute` 被拒绝时返回 [`RejectedExecution`]；携带 Promise 的调用方必须以该原因
//!   失败 Promise，单向事件则记录日志后丢弃。
//! - **并发**：任意外部线程都可以调用 `execute`；挂起只是一次调度跳转，调用线程在入队后立即返回。
//! - **分配**：[`EventLoopGroup::next`] 采用确定性的轮询策略为新通道选择循环。

mod group;
mod single_thread;

use std::sync::Arc;

pub use group::{DefaultEventLoopGroup, EventLoopChooser};
pub use single_thread::SingleThreadEventLoop;

use crate::{
    channel::Channel,
    error::{ChannelError, RejectedExecution},
    promise::{ChannelFuture, ChannelPromise, Promise},
};

/// 投递到事件循环的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 单线程串行执行上下文。
pub trait EventLoop: Send + Sync + 'static {
    /// 循环名称，通常等于其线程名。
    fn name(&self) -> &str;

    /// 当前线程是否就是该循环的线程。
    fn in_event_loop(&self) -> bool;

    /// 将任务排入队尾，由循环线程按入队顺序独占执行。
    fn execute(&self, task: Task) -> Result<(), RejectedExecution>;

    /// 是否已进入关闭流程（此后 `execute` 一律拒绝）。
    fn is_shutting_down(&self) -> bool;

    /// 发起优雅关闭：已入队的任务继续执行完毕，返回值在循环线程退出后完成。
    fn shutdown_gracefully(&self) -> Promise<()>;
}

impl std::fmt::Debug for dyn EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").field("name", &self.name()).finish()
    }
}

/// 一组事件循环。
pub trait EventLoopGroup: Send + Sync {
    /// 为新通道选出一个循环。
    fn next(&self) -> Arc<dyn EventLoop>;

    /// 将通道注册到 `next()` 选出的循环，并触发 registered/active 状态迁移。
    fn register(&self, channel: &Channel) -> ChannelFuture {
        channel.register(self.next())
    }

    /// 使用调用方提供的 Promise 完成注册。
    fn register_with(
        &self,
        channel: &Channel,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        channel.register_with(self.next(), promise)
    }

    /// 关闭组内全部循环。
    fn shutdown_gracefully(&self) -> Promise<()>;
}

/// 在 `executor` 上运行 `task`：已处于其线程时内联执行，否则投递。
///
/// 拒绝原因原样返回给调用方，由调用方决定失败 Promise 还是记录日志。
pub(crate) fn run_on(
    executor: &dyn EventLoop,
    task: impl FnOnce() + Send + 'static,
) -> Result<(), RejectedExecution> {
    if executor.in_event_loop() {
        task();
        Ok(())
    } else {
        executor.execute(Box::new(task))
    }
}
