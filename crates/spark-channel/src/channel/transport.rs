use std::{net::SocketAddr, sync::atomic::Ordering};

use tracing::debug;

use super::Channel;
use crate::{error::ChannelError, message::PipelineMessage, promise::ChannelPromise};

/// Head 哨兵的出口：真正执行 I/O 的传输层。
///
/// # 契约说明（What）
/// - 全部方法只会在通道绑定的事件循环线程上被调用（注册前则在调用方线程上），
///   实现方以内部可变性维护自身状态；
/// - 返回 `Err` 时 head 以该错误失败对应的 Promise；
/// - `is_open`/`is_active` 的变化由 head 在操作前后比较，从而驱动 active/inactive 事件。
pub trait Transport: Send + Sync + 'static {
    fn bind(&self, _local: SocketAddr) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("bind"))
    }

    fn connect(
        &self,
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("connect"))
    }

    fn disconnect(&self) -> Result<(), ChannelError> {
        self.close()
    }

    fn close(&self) -> Result<(), ChannelError>;

    /// 请求传输层在下一次可读时向 Pipeline 投递数据。
    fn begin_read(&self) -> Result<(), ChannelError>;

    fn write(&self, msg: PipelineMessage) -> Result<(), ChannelError>;

    fn flush(&self) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    fn is_active(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

fn complete(promise: &ChannelPromise, result: Result<(), ChannelError>) {
    match result {
        Ok(()) => {
            promise.try_success(());
        }
        Err(err) => {
            promise.try_failure(err);
        }
    }
}

// head 哨兵调用的传输层操作。
impl Channel {
    pub(crate) fn io_bind(&self, local: SocketAddr, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.is_open() {
            promise.try_failure(ChannelError::Closed);
            return;
        }
        let was_active = self.is_active();
        let result = self.inner.transport.bind(local);
        let ok = result.is_ok();
        complete(&promise, result);
        if ok && !was_active && self.is_active() {
            self.pipeline().fire_channel_active();
        }
    }

    pub(crate) fn io_connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.is_open() {
            promise.try_failure(ChannelError::Closed);
            return;
        }
        let was_active = self.is_active();
        let result = self.inner.transport.connect(remote, local);
        let ok = result.is_ok();
        complete(&promise, result);
        if ok && !was_active && self.is_active() {
            self.pipeline().fire_channel_active();
        }
    }

    pub(crate) fn io_disconnect(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        let was_active = self.is_active();
        complete(&promise, self.inner.transport.disconnect());
        if was_active && !self.is_active() {
            self.pipeline().fire_channel_inactive();
        }
    }

    /// 关闭传输层、完成 `close_future`，随后注销。重复关闭直接成功。
    pub(crate) fn io_close(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        if self.inner.close_future.is_done() {
            promise.try_success(());
            return;
        }
        let was_active = self.is_active();
        let result = self.inner.transport.close();
        self.inner.close_future.try_success(());
        complete(&promise, result);
        debug!(channel = %self.inner.id, "channel closed");
        if was_active && !self.is_active() {
            self.pipeline().fire_channel_inactive();
        }
        self.io_deregister(self.new_promise());
    }

    pub(crate) fn io_deregister(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.inner.registered.swap(false, Ordering::AcqRel) {
            promise.try_success(());
            return;
        }
        promise.try_success(());
        debug!(channel = %self.inner.id, "channel deregistered");
        self.pipeline().fire_channel_unregistered();
    }

    pub(crate) fn io_read(&self, promise: ChannelPromise) {
        if !self.is_active() {
            promise.try_success(());
            return;
        }
        complete(&promise, self.inner.transport.begin_read());
    }

    pub(crate) fn io_write(&self, msg: PipelineMessage, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.is_open() {
            promise.try_failure(ChannelError::Closed);
            return;
        }
        complete(&promise, self.inner.transport.write(msg));
    }

    pub(crate) fn io_flush(&self, promise: ChannelPromise) {
        if !self.is_open() {
            promise.try_failure(ChannelError::Closed);
            return;
        }
        complete(&promise, self.inner.transport.flush());
    }
}
