//! 集成测试共享的记录型 Handler 与事件循环辅助函数。
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, mpsc},
    time::Duration,
};

use parking_lot::Mutex;
use spark_channel::{
    Channel, ChannelError, ChannelHandler, ChannelHandlerContext, ChannelPromise, EventLoop,
    EventLoopGroup, EventMask, HandlerResult, PipelineMessage, SingleThreadEventLoop,
    test_stubs::MemoryTransport,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().clone()
}

pub fn text(msg: &PipelineMessage) -> String {
    if let Some(s) = msg.downcast_ref::<&'static str>() {
        return (*s).to_owned();
    }
    if let Some(s) = msg.downcast_ref::<String>() {
        return s.clone();
    }
    if let Some(bytes) = msg.as_bytes() {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    "<opaque>".to_owned()
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// 在 `event_loop` 上排入一个屏障任务并等待其执行，借此确认此前入队的任务都已完成。
pub fn drain(event_loop: &Arc<dyn EventLoop>) {
    let (tx, rx) = mpsc::channel();
    event_loop
        .execute(Box::new(move || {
            let _ = tx.send(());
        }))
        .expect("barrier accepted");
    rx.recv_timeout(Duration::from_secs(5))
        .expect("event loop drained in time");
}

/// 堵住事件循环，直到返回的发送端被触发或丢弃。
pub fn block(event_loop: &Arc<dyn EventLoop>) -> mpsc::Sender<()> {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    event_loop
        .execute(Box::new(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        }))
        .expect("blocker accepted");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker started");
    gate_tx
}

pub fn spawn_loop(name: &str) -> Arc<dyn EventLoop> {
    let event_loop: Arc<dyn EventLoop> = SingleThreadEventLoop::spawn(name).expect("spawn loop");
    event_loop
}

/// 注册到新循环并等待 registered/active 事件全部传播完毕。
pub fn register(channel: &Channel, event_loop: &Arc<dyn EventLoop>) {
    channel
        .register(Arc::clone(event_loop))
        .sync()
        .expect("registration succeeds");
    drain(event_loop);
}

pub fn register_via_group(channel: &Channel, group: &dyn EventLoopGroup) -> Arc<dyn EventLoop> {
    group
        .register(channel)
        .sync()
        .expect("registration succeeds");
    let event_loop = Arc::clone(channel.event_loop().expect("bound"));
    drain(&event_loop);
    event_loop
}

pub fn channel() -> (Channel, MemoryTransport) {
    let transport = MemoryTransport::new();
    (Channel::new(transport.clone()), transport)
}

/// 记录收到的每一个回调，并保持默认的转发行为。
pub struct Recording {
    pub name: &'static str,
    pub journal: Journal,
}

impl Recording {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Arc::clone(journal),
        }
    }

    fn push(&self, entry: impl AsRef<str>) {
        self.journal
            .lock()
            .push(format!("{}:{}", self.name, entry.as_ref()));
    }
}

impl ChannelHandler for Recording {
    fn handler_added(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("added");
        Ok(())
    }

    fn handler_removed(&self, _ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("removed");
        Ok(())
    }

    fn channel_registered(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("registered");
        ctx.fire_channel_registered();
        Ok(())
    }

    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("unregistered");
        ctx.fire_channel_unregistered();
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("active");
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("inactive");
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        self.push(format!("read:{}", text(&msg)));
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn channel_read_complete(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("read_complete");
        ctx.fire_channel_read_complete();
        Ok(())
    }

    fn user_event_triggered(
        &self,
        ctx: &ChannelHandlerContext,
        event: PipelineMessage,
    ) -> HandlerResult {
        self.push(format!("user_event:{}", text(&event)));
        ctx.fire_user_event_triggered(event);
        Ok(())
    }

    fn channel_writability_changed(&self, ctx: &ChannelHandlerContext) -> HandlerResult {
        self.push("writability_changed");
        ctx.fire_channel_writability_changed();
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, cause: ChannelError) -> HandlerResult {
        self.push(format!("exception:{}", cause.code()));
        ctx.fire_exception_caught(cause);
        Ok(())
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        self.push(format!("write:{}", text(&msg)));
        ctx.write_with(msg, promise).map(drop)
    }

    fn flush(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        self.push("flush");
        ctx.flush_with(promise).map(drop)
    }

    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> HandlerResult {
        self.push("close");
        ctx.close_with(promise).map(drop)
    }
}

/// 记录读事件但只声明出站兴趣，用于验证掩码跳过。
pub struct OutboundOnly {
    pub name: &'static str,
    pub journal: Journal,
}

impl ChannelHandler for OutboundOnly {
    fn interest() -> EventMask {
        EventMask::OUTBOUND
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        self.journal.lock().push(format!("{}:read", self.name));
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        self.journal.lock().push(format!("{}:write", self.name));
        ctx.write_with(msg, promise).map(drop)
    }
}

/// 记录写操作但只声明入站兴趣。
pub struct InboundOnly {
    pub name: &'static str,
    pub journal: Journal,
}

impl ChannelHandler for InboundOnly {
    fn interest() -> EventMask {
        EventMask::INBOUND | EventMask::EXCEPTION_CAUGHT
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        self.journal.lock().push(format!("{}:read", self.name));
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        self.journal.lock().push(format!("{}:write", self.name));
        ctx.write_with(msg, promise).map(drop)
    }
}
