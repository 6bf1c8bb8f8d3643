//! 单赋值 Promise / Future。
//!
//! # 教案级说明
//! - **意图（Why）**：每一个出站操作（`write`、`close` 等）都在调用线程立即返回，真实结果在
//!   事件循环线程上才产生，调用方需要一个可共享、可监听、可等待的结果槽位。
//! - **逻辑（How）**：
//!   1. `state` 原子变量承担 CAS 仲裁：`PENDING/UNCANCELLABLE → COMPLETING → DONE`，
//!      只有赢得 CAS 的一方能写入 `OnceLock` 结果槽；
//!   2. 监听器、`Waker` 与阻塞等待者都挂在同一把 `parking_lot::Mutex` 下，完成方在锁内
//!      置位 `notified` 并取走全部监听器，保证“注册早于完成的监听器恰好执行一次”；
//!   3. 若 Promise 声明了执行器且完成方不在该执行器线程上，监听器整体作为一个任务投递过去。
//! - **契约（What）**：终态不可变；对终态 Promise 调用 `set_*` 返回
//!   [`ChannelError::PromiseAlreadyCompleted`]；在所属事件循环线程上阻塞等待未完成的 Promise 返回
//!   [`ChannelError::BlockingOnEventLoop`]。

use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::{channel::ChannelId, error::ChannelError, runtime::EventLoop};

const PENDING: u8 = 0;
const UNCANCELLABLE: u8 = 1;
const COMPLETING: u8 = 2;
const DONE: u8 = 3;

/// Promise 的终态。
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(ChannelError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// 失败原因；取消视为 [`ChannelError::Cancelled`]。
    pub fn cause(&self) -> Option<ChannelError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err.clone()),
            Self::Cancelled => Some(ChannelError::Cancelled),
        }
    }

    pub fn into_result(self) -> Result<T, ChannelError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
            Self::Cancelled => Err(ChannelError::Cancelled),
        }
    }
}

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

struct Waiters<T> {
    listeners: Vec<Listener<T>>,
    wakers: Vec<Waker>,
    notified: bool,
}

struct Shared<T> {
    state: AtomicU8,
    outcome: OnceLock<Outcome<T>>,
    waiters: Mutex<Waiters<T>>,
    completed: Condvar,
    executor: Option<Arc<dyn EventLoop>>,
    channel: Option<ChannelId>,
}

/// 通道操作使用的 Promise。
pub type ChannelPromise = Promise<()>;
/// 调用方视角下的同一对象；命名上区分“可写端”与“只读端”。
pub type ChannelFuture = Promise<()>;

/// 共享所有权的单赋值异步结果。
///
/// 克隆只增加引用计数，所有克隆观察同一个结果槽位。
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 未绑定执行器的 Promise：监听器总在完成方线程上执行，阻塞等待不做死锁检测。
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// 绑定执行器：监听器在该执行器上执行，并在其线程内拒绝阻塞等待。
    pub fn with_executor(executor: Arc<dyn EventLoop>) -> Self {
        Self::build(Some(executor), None)
    }

    pub(crate) fn for_channel(channel: ChannelId, executor: Option<Arc<dyn EventLoop>>) -> Self {
        Self::build(executor, Some(channel))
    }

    fn build(executor: Option<Arc<dyn EventLoop>>, channel: Option<ChannelId>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                waiters: Mutex::new(Waiters {
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                    notified: false,
                }),
                completed: Condvar::new(),
                executor,
                channel,
            }),
        }
    }

    /// 已成功完成的 Promise。
    pub fn succeeded(value: T) -> Self {
        let promise = Self::new();
        promise.try_success(value);
        promise
    }

    /// 已失败的 Promise。
    pub fn failed(cause: ChannelError) -> Self {
        let promise = Self::new();
        promise.try_failure(cause);
        promise
    }

    /// 所属通道，用于出站操作的 Promise 复用校验。
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.shared.channel
    }

    /// 出站操作接收调用方 Promise 前的复用校验。
    ///
    /// 返回 `Ok(false)` 表示 Promise 已被取消，操作应被跳过。
    pub(crate) fn accept_for(&self, channel: ChannelId) -> Result<bool, ChannelError> {
        if self.is_done() {
            return if self.is_cancelled() {
                Ok(false)
            } else {
                Err(ChannelError::PromiseAlreadyCompleted)
            };
        }
        match self.shared.channel {
            Some(owner) if owner == channel => Ok(true),
            owner => Err(ChannelError::PromiseChannelMismatch {
                expected: channel.to_string(),
                found: owner.map_or_else(|| "unbound".to_owned(), |id| id.to_string()),
            }),
        }
    }

    pub fn executor(&self) -> Option<&Arc<dyn EventLoop>> {
        self.shared.executor.as_ref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    pub fn is_success(&self) -> bool {
        self.outcome().is_some_and(Outcome::is_success)
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome().is_some_and(Outcome::is_cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == PENDING
    }

    pub fn outcome(&self) -> Option<&Outcome<T>> {
        self.shared.outcome.get()
    }

    pub fn cause(&self) -> Option<ChannelError> {
        self.outcome().and_then(Outcome::cause)
    }

    /// 尝试以成功终结；已是终态时返回 `false`。
    pub fn try_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(value))
    }

    /// 以成功终结；已是终态属于契约违规。
    pub fn set_success(&self, value: T) -> Result<(), ChannelError> {
        if self.try_success(value) {
            Ok(())
        } else {
            Err(ChannelError::PromiseAlreadyCompleted)
        }
    }

    pub fn try_failure(&self, cause: ChannelError) -> bool {
        self.complete(Outcome::Failure(cause))
    }

    pub fn set_failure(&self, cause: ChannelError) -> Result<(), ChannelError> {
        if self.try_failure(cause) {
            Ok(())
        } else {
            Err(ChannelError::PromiseAlreadyCompleted)
        }
    }

    /// 取消仍处于 pending 且未被标记为不可取消的 Promise。
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled)
    }

    /// 标记为不可取消。
    ///
    /// 返回 `true` 表示此后再也不会被取消：要么成功置位，要么已以非取消终态完成。
    pub fn set_uncancellable(&self) -> bool {
        loop {
            match self.shared.state.compare_exchange(
                PENDING,
                UNCANCELLABLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) | Err(UNCANCELLABLE) => return true,
                Err(_) => {
                    if let Some(outcome) = self.outcome() {
                        return !outcome.is_cancelled();
                    }
                    // 另一线程正处在 COMPLETING 与写入结果之间。
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let cancelling = outcome.is_cancelled();
        let won = self
            .shared
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || (!cancelling
                && self
                    .shared
                    .state
                    .compare_exchange(UNCANCELLABLE, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok());
        if !won {
            return false;
        }
        let _ = self.shared.outcome.set(outcome);
        self.shared.state.store(DONE, Ordering::Release);
        self.notify_waiters();
        true
    }

    fn notify_waiters(&self) {
        let (listeners, wakers) = {
            let mut waiters = self.shared.waiters.lock();
            waiters.notified = true;
            self.shared.completed.notify_all();
            (
                std::mem::take(&mut waiters.listeners),
                std::mem::take(&mut waiters.wakers),
            )
        };
        for waker in wakers {
            waker.wake();
        }
        if listeners.is_empty() {
            return;
        }
        match &self.shared.executor {
            Some(executor) if !executor.in_event_loop() => {
                let promise = self.clone();
                let slot = Arc::new(Mutex::new(Some(listeners)));
                let task_slot = Arc::clone(&slot);
                let submitted = executor.execute(Box::new(move || {
                    if let Some(listeners) = task_slot.lock().take() {
                        promise.run_listeners(listeners);
                    }
                }));
                if let Err(rejected) = submitted {
                    warn!(%rejected, "listener executor rejected notification, running inline");
                    if let Some(listeners) = slot.lock().take() {
                        self.run_listeners(listeners);
                    }
                }
            }
            _ => self.run_listeners(listeners),
        }
    }

    fn run_listeners(&self, listeners: Vec<Listener<T>>) {
        let Some(outcome) = self.outcome() else {
            return;
        };
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
                warn!("a promise listener panicked; remaining listeners still run");
            }
        }
    }

    /// 注册完成监听器。
    ///
    /// 已通知的 Promise 在调用线程上立即执行监听器；否则按注册顺序排队，完成时恰好执行一次。
    pub fn add_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        {
            let mut waiters = self.shared.waiters.lock();
            if !waiters.notified {
                waiters.listeners.push(Box::new(listener));
                return self;
            }
        }
        self.run_listeners(vec![Box::new(listener)]);
        self
    }

    fn check_dead_lock(&self) -> Result<(), ChannelError> {
        if self.is_done() {
            return Ok(());
        }
        match &self.shared.executor {
            Some(executor) if executor.in_event_loop() => Err(ChannelError::BlockingOnEventLoop),
            _ => Ok(()),
        }
    }

    /// 阻塞直至终态并返回结果。
    pub fn wait(&self) -> Result<Outcome<T>, ChannelError> {
        self.check_dead_lock()?;
        let mut waiters = self.shared.waiters.lock();
        while !waiters.notified {
            self.shared.completed.wait(&mut waiters);
        }
        drop(waiters);
        self.outcome().cloned().ok_or(ChannelError::Timeout)
    }

    /// 带超时的阻塞等待；超时返回 [`ChannelError::Timeout`]。
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Outcome<T>, ChannelError> {
        self.check_dead_lock()?;
        let deadline = Instant::now() + timeout;
        let mut waiters = self.shared.waiters.lock();
        while !waiters.notified {
            if self
                .shared
                .completed
                .wait_until(&mut waiters, deadline)
                .timed_out()
            {
                break;
            }
        }
        drop(waiters);
        self.outcome().cloned().ok_or(ChannelError::Timeout)
    }

    /// 阻塞直至终态，失败与取消以 `Err` 返回。
    pub fn sync(&self) -> Result<T, ChannelError> {
        self.wait()?.into_result()
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.outcome() {
            return Poll::Ready(outcome.clone().into_result());
        }
        let mut waiters = self.shared.waiters.lock();
        if waiters.notified {
            drop(waiters);
            return match self.outcome() {
                Some(outcome) => Poll::Ready(outcome.clone().into_result()),
                None => Poll::Pending,
            };
        }
        if !waiters.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            waiters.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Promise<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("channel", &self.shared.channel)
            .field("outcome", &self.shared.outcome.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn uncancellable_blocks_cancel_but_not_success() {
        let promise: Promise<u8> = Promise::new();
        assert!(promise.is_cancellable());
        assert!(promise.set_uncancellable());
        assert!(!promise.cancel());
        assert!(promise.try_success(1));
        assert!(promise.set_uncancellable());
    }

    #[test]
    fn set_uncancellable_after_cancel_reports_false() {
        let promise: Promise<u8> = Promise::new();
        assert!(promise.cancel());
        assert!(!promise.set_uncancellable());
        assert!(matches!(promise.cause(), Some(ChannelError::Cancelled)));
    }

    #[test]
    fn panicking_listener_does_not_starve_the_rest() {
        let promise: Promise<()> = Promise::new();
        let hits = Arc::new(AtomicUsize::new(0));
        promise.add_listener(|_| panic!("listener bug"));
        let counter = Arc::clone(&hits);
        promise.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        promise.try_success(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_timeout_on_pending_promise_times_out() {
        let promise: Promise<()> = Promise::new();
        let err = promise
            .wait_timeout(Duration::from_millis(10))
            .expect_err("nobody completes it");
        assert!(matches!(err, ChannelError::Timeout));
    }
}
