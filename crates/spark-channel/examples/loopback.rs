//! 回环示例：在内存传输层上运行一条“解码 → 回显”的 Pipeline。
//!
//! 运行：`RUST_LOG=spark_channel=debug cargo run -p spark-channel --example loopback`

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use spark_channel::{prelude::*, test_stubs::MemoryTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 把字节帧解码为 UTF-8 文本。
struct Utf8Decoder;

impl ChannelHandler for Utf8Decoder {
    fn interest() -> EventMask {
        EventMask::CHANNEL_READ
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        let Some(bytes) = msg.as_bytes() else {
            ctx.fire_channel_read(msg);
            return Ok(());
        };
        let text = std::str::from_utf8(bytes)
            .map_err(ChannelError::handler)?
            .to_owned();
        ctx.fire_channel_read(PipelineMessage::from_user(text));
        Ok(())
    }
}

/// 把收到的文本原样写回，并统计回显次数。
struct Echo {
    echoed: Arc<AtomicUsize>,
}

impl ChannelHandler for Echo {
    fn interest() -> EventMask {
        EventMask::CHANNEL_READ | EventMask::EXCEPTION_CAUGHT
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        let text = msg
            .downcast::<String>()
            .map_err(|_| ChannelError::message("echo expects decoded text"))?;
        info!(channel = %ctx.channel_id(), %text, "echoing");
        let reply = PipelineMessage::from_bytes(format!("echo: {text}").into_bytes());
        let echoed = Arc::clone(&self.echoed);
        ctx.write_and_flush(reply).add_listener(move |outcome| {
            if outcome.is_success() {
                echoed.fetch_add(1, Ordering::Relaxed);
            }
        });
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: ChannelError) -> HandlerResult {
        tracing::warn!(channel = %ctx.channel_id(), code = cause.code(), error = %cause, "closing after failure");
        ctx.close();
        Ok(())
    }
}

fn main() -> Result<(), ChannelError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let group = DefaultEventLoopGroup::with_threads(2)?;
    let transport = MemoryTransport::active();
    let channel = Channel::new(transport.clone());
    let echoed = Arc::new(AtomicUsize::new(0));
    channel
        .pipeline()
        .add_last("decoder", Utf8Decoder)?
        .add_last(
            "echo",
            Echo {
                echoed: Arc::clone(&echoed),
            },
        )?;

    group.register(&channel).sync()?;
    info!(channel = %channel.id(), pipeline = ?channel.pipeline(), "registered");

    for frame in ["hello", "spark", "pipeline"] {
        channel
            .pipeline()
            .fire_channel_read(PipelineMessage::from_bytes(frame.as_bytes().to_vec()))
            .fire_channel_read_complete();
    }

    channel.close().sync()?;
    group.shutdown_gracefully().sync()?;

    for reply in transport.take_written() {
        if let Some(bytes) = reply.as_bytes() {
            info!(reply = %String::from_utf8_lossy(bytes), "transport received");
        }
    }
    info!(echoed = echoed.load(Ordering::Relaxed), "done");
    Ok(())
}
