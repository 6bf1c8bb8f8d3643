//! 通道：一个网络端点与它独占的 Pipeline。
//!
//! # 契约维度速览
//! - **所有权**：[`Channel`] 是 `Arc<ChannelInner>` 的廉价克隆句柄；Pipeline 节点只持有
//!   `Weak` 回指，通道的生命周期由外部持有者决定。
//! - **线程绑定**：通道一旦注册到某个 [`EventLoop`] 便终生绑定，注销后也不会迁移。
//! - **状态**：`registered` 随 `register`/`deregister` 切换；open/active 由 [`Transport`] 报告。

mod transport;

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::{debug, warn};

pub use transport::Transport;

use crate::{
    attribute::{AttributeKey, AttributeMap},
    config::ChannelConfig,
    error::ChannelError,
    message::PipelineMessage,
    pipeline::ChannelPipeline,
    promise::{ChannelFuture, ChannelPromise, Promise},
    runtime::{self, EventLoop},
};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的通道标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

pub(crate) struct ChannelInner {
    id: ChannelId,
    pub(crate) pipeline: ChannelPipeline,
    pub(crate) event_loop: OnceLock<Arc<dyn EventLoop>>,
    registered: AtomicBool,
    attributes: AttributeMap,
    transport: Box<dyn Transport>,
    config: ChannelConfig,
    pub(crate) close_future: ChannelPromise,
}

/// 网络通道句柄。
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: impl Transport, config: ChannelConfig) -> Self {
        let id = ChannelId::next();
        let inner = Arc::new_cyclic(|weak| ChannelInner {
            id,
            pipeline: ChannelPipeline::new(weak.clone(), id),
            event_loop: OnceLock::new(),
            registered: AtomicBool::new(false),
            attributes: AttributeMap::new(),
            transport: Box::new(transport),
            config,
            close_future: Promise::for_channel(id, None),
        });
        debug!(channel = %id, "channel created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    pub fn pipeline(&self) -> &ChannelPipeline {
        &self.inner.pipeline
    }

    /// 绑定的事件循环；尚未调用 `register` 时为 `None`。
    pub fn event_loop(&self) -> Option<&Arc<dyn EventLoop>> {
        self.inner.event_loop.get()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.inner.transport.is_open()
    }

    pub fn is_active(&self) -> bool {
        self.inner.transport.is_active()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.remote_addr()
    }

    pub fn attr<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<Arc<T>> {
        self.inner.attributes.get(key)
    }

    pub fn has_attr<T>(&self, key: AttributeKey<T>) -> bool {
        self.inner.attributes.has(key)
    }

    /// 设置属性并返回旧值。
    pub fn set_attr<T: Any + Send + Sync>(&self, key: AttributeKey<T>, value: T) -> Option<Arc<T>> {
        self.inner.attributes.set(key, value)
    }

    pub fn remove_attr<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<Arc<T>> {
        self.inner.attributes.remove(key)
    }

    /// 通道关闭时完成的 Future。
    pub fn close_future(&self) -> ChannelFuture {
        self.inner.close_future.clone()
    }

    pub fn new_promise(&self) -> ChannelPromise {
        Promise::for_channel(self.inner.id, self.event_loop().cloned())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 绑定到 `event_loop` 并在其线程上完成注册。
    ///
    /// 注册在循环线程上依次执行：补齐首次注册前登记的 Handler 回调、完成 Promise、
    /// 触发 `channel_registered`，传输层已激活时再触发 `channel_active`。
    pub fn register(&self, event_loop: Arc<dyn EventLoop>) -> ChannelFuture {
        let promise = Promise::for_channel(self.inner.id, Some(Arc::clone(&event_loop)));
        self.register_internal(event_loop, promise.clone());
        promise
    }

    /// 以调用方提供的 Promise 注册；Promise 的复用规则与出站操作一致。
    pub fn register_with(
        &self,
        event_loop: Arc<dyn EventLoop>,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        if promise.accept_for(self.inner.id)? {
            self.register_internal(event_loop, promise.clone());
        }
        Ok(promise)
    }

    fn register_internal(&self, event_loop: Arc<dyn EventLoop>, promise: ChannelPromise) {
        if self.inner.event_loop.set(Arc::clone(&event_loop)).is_err() {
            promise.try_failure(ChannelError::AlreadyRegistered);
            return;
        }
        let channel = self.clone();
        let task_promise = promise.clone();
        let submitted = runtime::run_on(event_loop.as_ref(), move || channel.register0(task_promise));
        if let Err(rejected) = submitted {
            warn!(
                channel = %self.inner.id,
                event_loop = event_loop.name(),
                %rejected,
                "registration rejected by the event loop, closing the channel"
            );
            if let Err(err) = self.inner.transport.close() {
                debug!(channel = %self.inner.id, error = %err, "transport close after rejected registration failed");
            }
            self.inner.close_future.try_success(());
            promise.try_failure(rejected.into());
        }
    }

    fn register0(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.is_open() {
            promise.try_failure(ChannelError::Closed);
            return;
        }
        let pipeline = self.pipeline();
        // 等待注册前仍在调用线程内联执行的调度结束。
        pipeline.serialize_unbound(|| {
            pipeline.run_pending_callbacks();
            self.inner.registered.store(true, Ordering::Release);
            promise.try_success(());
            debug!(channel = %self.inner.id, "channel registered");
            pipeline.fire_channel_registered();
            if self.is_active() {
                pipeline.fire_channel_active();
            }
        });
    }

    pub fn bind(&self, local: SocketAddr) -> ChannelFuture {
        self.pipeline().bind(local)
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.pipeline().connect(remote, local)
    }

    pub fn disconnect(&self) -> ChannelFuture {
        self.pipeline().disconnect()
    }

    pub fn close(&self) -> ChannelFuture {
        self.pipeline().close()
    }

    pub fn deregister(&self) -> ChannelFuture {
        self.pipeline().deregister()
    }

    pub fn read(&self) -> ChannelFuture {
        self.pipeline().read()
    }

    pub fn write(&self, msg: PipelineMessage) -> ChannelFuture {
        self.pipeline().write(msg)
    }

    pub fn flush(&self) -> ChannelFuture {
        self.pipeline().flush()
    }

    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelFuture {
        self.pipeline().write_and_flush(msg)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("registered", &self.is_registered())
            .field("open", &self.is_open())
            .field("active", &self.is_active())
            .finish()
    }
}
