//! Pipeline 两端的固定哨兵。
//!
//! - Head：出站操作的终点，把操作交给通道的传输层并完成 Promise；同时负责 `auto_read`
//!   与关闭后注销时的 Pipeline 销毁。
//! - Tail：入站事件的终点，未被处理的异常以 `warn` 记录，未被消费的消息与用户事件以 `debug` 记录。
//!
//! 两者的兴趣掩码恒为全部比特，且不可移除、不可替换。

use std::net::SocketAddr;

use tracing::{debug, warn};

use super::{ChannelHandler, ChannelHandlerContext};
use crate::{
    channel::Channel,
    error::{ChannelError, HandlerResult},
    message::PipelineMessage,
    promise::ChannelPromise,
};

pub(crate) struct HeadHandler;

impl HeadHandler {
    fn with_channel(
        ctx: &ChannelHandlerContext,
        promise: ChannelPromise,
        op: impl FnOnce(&Channel, ChannelPromise),
    ) -> HandlerResult {
        match ctx.channel() {
            Some(channel) => op(&channel, promise),
            None => {
                promise.try_failure(ChannelError::ChannelDropped);
            }
        }
        Ok(())
    }

    fn read_if_auto_read(ctx: &ChannelHandlerContext) {
        if let Some(channel) = ctx.channel()
            && channel.config().auto_read
        {
            channel.read();
        }
    }
}

impl ChannelHandler for HeadHandler {
    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_unregistered();
        if let Some(channel) = ctx.channel()
            && !channel.is_open()
        {
            channel.pipeline().destroy();
        }
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_active();
        Self::read_if_auto_read(ctx);
        Ok(())
    }

    fn channel_read_complete(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        ctx.fire_channel_read_complete();
        Self::read_if_auto_read(ctx);
        Ok(())
    }

    fn bind(
        &self,
        ctx: &ChannelHandlerContext,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> HandlerResult {
        Self::with_channel(ctx, promise, |channel, promise| channel.io_bind(local, promise))
    }

    fn connect(
        &self,
        ctx: &ChannelHandlerContext,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> HandlerResult {
        Self::with_channel(ctx, promise, |channel, promise| {
            channel.io_connect(remote, local, promise)
        })
    }

    fn disconnect(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        Self::with_channel(ctx, promise, Channel::io_disconnect)
    }

    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        Self::with_channel(ctx, promise, Channel::io_close)
    }

    fn deregister(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        Self::with_channel(ctx, promise, Channel::io_deregister)
    }

    fn read(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        Self::with_channel(ctx, promise, Channel::io_read)
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        Self::with_channel(ctx, promise, |channel, promise| channel.io_write(msg, promise))
    }

    fn flush(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        Self::with_channel(ctx, promise, Channel::io_flush)
    }
}

pub(crate) struct TailHandler;

impl ChannelHandler for TailHandler {
    fn channel_registered(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn channel_unregistered(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn channel_active(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn channel_inactive(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        debug!(
            channel = %ctx.channel_id(),
            message = ?msg,
            "inbound message reached the tail of the pipeline and was discarded"
        );
        Ok(())
    }

    fn channel_read_complete(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn user_event_triggered(
        &self,
        ctx: &ChannelHandlerContext,
        event: PipelineMessage,
    ) -> HandlerResult {
        debug!(
            channel = %ctx.channel_id(),
            event = ?event,
            "user event reached the tail of the pipeline and was discarded"
        );
        Ok(())
    }

    fn channel_writability_changed(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: ChannelError) -> HandlerResult {
        warn!(
            channel = %ctx.channel_id(),
            code = cause.code(),
            error = %cause,
            "exception_caught reached the tail of the pipeline; no handler dealt with it"
        );
        Ok(())
    }
}
