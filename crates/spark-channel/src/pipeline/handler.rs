use std::net::SocketAddr;

use super::{ChannelHandlerContext, EventMask};
use crate::{
    error::{ChannelError, HandlerResult},
    message::PipelineMessage,
    promise::ChannelPromise,
};

/// Pipeline 中的处理器。
///
/// # 教案式说明
/// - **意图（Why）**：以一个 trait 同时承载入站通知与出站操作，Handler 只覆写关心的回调，
///   其余回调的默认实现一律“原样转发给下一个节点”。
/// - **逻辑（How）**：
///   - 入站回调默认调用 `ctx.fire_*`，沿 head→tail 继续传播；
///   - 出站回调默认调用 `ctx.*_with(.., promise)`，沿 tail→head 继续传播并沿用同一个 Promise；
///   - [`ChannelHandler::interest`] 声明实际覆写了哪些回调，调度器据此跳过未覆写的节点。
/// - **契约（What）**：
///   - 所有回调只会在节点绑定的事件循环线程上被调用，同一 Handler 不会被并发重入；
///   - 入站回调返回 `Err`（或 panic）时，错误被转为同一节点上的 `exception_caught`；
///   - 出站回调返回 `Err`（或 panic）时，对应 Promise 以该错误失败，不会产生入站事件；
///   - `interest` 少报会导致事件被跳过，多报只损失一次转发开销，默认值为全部事件。
pub trait ChannelHandler: Send + Sync + 'static {
    /// 该类型覆写的事件集合。
    fn interest() -> EventMask
    where
        Self: Sized,
    {
        EventMask::all()
    }

    /// 节点进入 `ADD_COMPLETE` 时调用。
    fn handler_added(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    /// 节点从链上摘除且此前已完成添加时调用。
    fn handler_removed(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn channel_registered(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_registered();
        Ok(())
    }

    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_unregistered();
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn channel_read_complete(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_read_complete();
        Ok(())
    }

    fn user_event_triggered(
        &self,
        ctx: &ChannelHandlerContext,
        event: PipelineMessage,
    ) -> HandlerResult {
        ctx.fire_user_event_triggered(event);
        Ok(())
    }

    fn channel_writability_changed(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_writability_changed();
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: ChannelError) -> HandlerResult {
        ctx.fire_exception_caught(cause);
        Ok(())
    }

    fn bind(
        &self,
        ctx: &ChannelHandlerContext,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> HandlerResult {
        ctx.bind_with(local, promise).map(drop)
    }

    fn connect(
        &self,
        ctx: &ChannelHandlerContext,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> HandlerResult {
        ctx.connect_with(remote, local, promise).map(drop)
    }

    fn disconnect(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        ctx.disconnect_with(promise).map(drop)
    }

    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        ctx.close_with(promise).map(drop)
    }

    fn deregister(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        ctx.deregister_with(promise).map(drop)
    }

    fn read(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        ctx.read_with(promise).map(drop)
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        ctx.write_with(msg, promise).map(drop)
    }

    fn flush(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        ctx.flush_with(promise).map(drop)
    }
}
