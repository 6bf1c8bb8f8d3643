use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, OnceLock},
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{EventLoop, Task};
use crate::{
    error::{ChannelError, RejectedExecution},
    promise::Promise,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopState {
    Running,
    ShuttingDown,
    Terminated,
}

struct LoopQueue {
    tasks: VecDeque<Task>,
    state: LoopState,
}

struct LoopShared {
    name: String,
    queue: Mutex<LoopQueue>,
    available: Condvar,
    thread_id: Arc<OnceLock<ThreadId>>,
    capacity: Option<usize>,
    termination: Promise<()>,
}

/// 独占一个 OS 线程的事件循环。
///
/// # 教案式说明
/// - **意图（Why）**：为通道提供“同一时刻只有一个线程触碰 Handler”的执行上下文，
///   跨线程调用者只需入队即可返回。
/// - **逻辑（How）**：
///   1. 构造时立即派生具名线程，线程启动后第一件事是登记自身 `ThreadId`；
///   2. 任务队列为 `VecDeque`，由 `parking_lot::Mutex + Condvar` 保护，严格 FIFO；
///   3. 任务内的 panic 被捕获并记录，循环本身不会因单个任务崩溃而退出；
///   4. 关闭时先切换到 `ShuttingDown`，排空队列后进入 `Terminated` 并完成终止 Promise。
/// - **契约（What）**：
///   - 外部线程在 `ShuttingDown` 之后提交的任务被拒绝；循环线程自身在排空阶段追加的任务仍会执行；
///   - 配置了容量时，队列满即返回 [`RejectedExecution::QueueFull`]。
pub struct SingleThreadEventLoop {
    shared: Arc<LoopShared>,
}

impl SingleThreadEventLoop {
    /// 以无界队列启动循环。
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>, ChannelError> {
        Self::spawn_with_capacity(name, None)
    }

    /// 以指定容量启动循环。
    pub fn spawn_with_capacity(
        name: impl Into<String>,
        capacity: Option<usize>,
    ) -> Result<Arc<Self>, ChannelError> {
        let name = name.into();
        let thread_id = Arc::new(OnceLock::new());
        let marker = Arc::new(LoopThreadMarker {
            name: name.clone(),
            thread_id: Arc::clone(&thread_id),
        });
        let shared = Arc::new(LoopShared {
            name: name.clone(),
            queue: Mutex::new(LoopQueue {
                tasks: VecDeque::new(),
                state: LoopState::Running,
            }),
            available: Condvar::new(),
            thread_id,
            capacity,
            termination: Promise::with_executor(marker),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|err| ChannelError::Spawn(Arc::new(err)))?;

        Ok(Arc::new(Self { shared }))
    }

    /// 尚未执行的任务数。
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.queue.lock().state == LoopState::Terminated
    }

    /// 循环线程退出后完成的 Promise。
    pub fn termination_future(&self) -> Promise<()> {
        self.shared.termination.clone()
    }
}

impl LoopShared {
    fn in_event_loop(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    fn run(self: Arc<Self>) {
        let _ = self.thread_id.set(thread::current().id());
        debug!(event_loop = %self.name, "event loop started");
        while let Some(task) = self.take_task() {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                warn!(event_loop = %self.name, "a task raised a panic; the loop keeps running");
            }
        }
        debug!(event_loop = %self.name, "event loop terminated");
        self.termination.try_success(());
    }

    fn take_task(&self) -> Option<Task> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if queue.state != LoopState::Running {
                queue.state = LoopState::Terminated;
                return None;
            }
            self.available.wait(&mut queue);
        }
    }
}

impl EventLoop for SingleThreadEventLoop {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn in_event_loop(&self) -> bool {
        self.shared.in_event_loop()
    }

    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        let mut queue = self.shared.queue.lock();
        let accepting = match queue.state {
            LoopState::Running => true,
            LoopState::ShuttingDown => self.shared.in_event_loop(),
            LoopState::Terminated => false,
        };
        if !accepting {
            return Err(RejectedExecution::ShuttingDown(self.shared.name.clone()));
        }
        if let Some(capacity) = self.shared.capacity
            && queue.tasks.len() >= capacity
        {
            return Err(RejectedExecution::QueueFull {
                name: self.shared.name.clone(),
                capacity,
            });
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    fn is_shutting_down(&self) -> bool {
        self.shared.queue.lock().state != LoopState::Running
    }

    fn shutdown_gracefully(&self) -> Promise<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.state == LoopState::Running {
                queue.state = LoopState::ShuttingDown;
            }
        }
        self.shared.available.notify_one();
        self.shared.termination.clone()
    }
}

impl Drop for SingleThreadEventLoop {
    fn drop(&mut self) {
        self.shutdown_gracefully();
    }
}

/// 终止 Promise 的执行器：只回答“是否处于该循环线程”，从不接受任务。
///
/// 让 `termination_future().sync()` 在循环线程内调用时被识别为自锁，而不是真的挂死。
struct LoopThreadMarker {
    name: String,
    thread_id: Arc<OnceLock<ThreadId>>,
}

impl EventLoop for LoopThreadMarker {
    fn name(&self) -> &str {
        &self.name
    }

    fn in_event_loop(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    fn execute(&self, _task: Task) -> Result<(), RejectedExecution> {
        Err(RejectedExecution::ShuttingDown(self.name.clone()))
    }

    fn is_shutting_down(&self) -> bool {
        true
    }

    fn shutdown_gracefully(&self) -> Promise<()> {
        Promise::succeeded(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn tasks_run_in_submission_order_on_the_loop_thread() {
        let event_loop = SingleThreadEventLoop::spawn("order-loop").expect("spawn");
        assert!(!event_loop.in_event_loop());
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            let tx = tx.clone();
            let on_loop_check = Arc::clone(&event_loop);
            event_loop
                .execute(Box::new(move || {
                    tx.send((i, on_loop_check.in_event_loop())).unwrap();
                }))
                .expect("accepted");
        }
        let seen: Vec<_> = (0..16).map(|_| rx.recv().unwrap()).collect();
        assert!(seen.iter().all(|(_, inside)| *inside));
        assert_eq!(
            seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            (0..16).collect::<Vec<_>>()
        );
        event_loop.shutdown_gracefully().sync().expect("terminates");
    }

    #[test]
    fn bounded_queue_rejects_overflow() {
        let event_loop = SingleThreadEventLoop::spawn_with_capacity("tiny-loop", Some(1))
            .expect("spawn");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        event_loop
            .execute(Box::new(move || {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
            }))
            .unwrap();
        started_rx.recv().unwrap();
        event_loop.execute(Box::new(|| {})).expect("one slot free");
        let rejected = event_loop.execute(Box::new(|| {})).unwrap_err();
        assert!(matches!(rejected, RejectedExecution::QueueFull { capacity: 1, .. }));
        gate_tx.send(()).unwrap();
        event_loop.shutdown_gracefully().sync().unwrap();
    }

    #[test]
    fn shutdown_drains_then_rejects() {
        let event_loop = SingleThreadEventLoop::spawn("drain-loop").expect("spawn");
        let (tx, rx) = mpsc::channel();
        event_loop
            .execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                tx.send("drained").unwrap();
            }))
            .unwrap();
        let termination = event_loop.shutdown_gracefully();
        assert!(event_loop.is_shutting_down());
        assert!(matches!(
            event_loop.execute(Box::new(|| {})),
            Err(RejectedExecution::ShuttingDown(_))
        ));
        termination.sync().unwrap();
        assert_eq!(rx.recv().unwrap(), "drained");
        assert!(event_loop.is_terminated());
    }

    #[test]
    fn panicking_task_does_not_kill_the_loop() {
        let event_loop = SingleThreadEventLoop::spawn("panic-loop").expect("spawn");
        event_loop.execute(Box::new(|| panic!("task bug"))).unwrap();
        let (tx, rx) = mpsc::channel();
        event_loop
            .execute(Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).expect("loop survived");
        event_loop.shutdown_gracefully().sync().unwrap();
    }

    #[test]
    fn waiting_for_termination_on_the_loop_thread_is_rejected() {
        let event_loop = SingleThreadEventLoop::spawn("self-wait-loop").expect("spawn");
        let termination = event_loop.termination_future();
        let (tx, rx) = mpsc::channel();
        event_loop
            .execute(Box::new(move || tx.send(termination.sync()).unwrap()))
            .unwrap();
        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(ChannelError::BlockingOnEventLoop)));
        event_loop.shutdown_gracefully().sync().unwrap();
    }
}
