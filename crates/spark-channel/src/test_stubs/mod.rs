//! 测试与示例使用的传输层桩。
//!
//! # 设计定位（Why）
//! - Pipeline 的调度语义与真实套接字无关，测试只需要一个能记录 head 收到了哪些操作的 [`Transport`]；
//! - 集中在此处定义，集成测试、基准与示例共享同一实现，接口变更时只需改一处。
//!
//! # 契约说明（What）
//! - [`MemoryTransport`] 克隆后共享同一份状态，测试持有一个克隆即可在通道之外观察写入；
//! - `bind`/`connect` 使通道进入 active，`disconnect` 退出 active，`close` 同时退出 open 与 active；
//! - 写入的消息按顺序保存，直到调用 [`MemoryTransport::take_written`]。

use std::{net::SocketAddr, sync::Arc};

use parking_lot::Mutex;

use crate::{channel::Transport, error::ChannelError, message::PipelineMessage};

/// head 交给传输层的操作记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportOp {
    Bind(SocketAddr),
    Connect(SocketAddr),
    Disconnect,
    Close,
    BeginRead,
    Write,
    Flush,
}

#[derive(Default)]
struct MemoryState {
    open: bool,
    active: bool,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    ops: Vec<TransportOp>,
    written: Vec<PipelineMessage>,
    write_failure: Option<ChannelError>,
}

/// 记录型内存传输层。
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// 已打开、尚未激活。
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                open: true,
                ..MemoryState::default()
            })),
        }
    }

    /// 已打开且已激活，注册后立即触发 `channel_active`。
    pub fn active() -> Self {
        let transport = Self::new();
        transport.state.lock().active = true;
        transport
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.state.lock().ops.clone()
    }

    pub fn written_len(&self) -> usize {
        self.state.lock().written.len()
    }

    pub fn take_written(&self) -> Vec<PipelineMessage> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// 此后的每一次写入都以 `err` 失败。
    pub fn fail_writes_with(&self, err: ChannelError) {
        self.state.lock().write_failure = Some(err);
    }

    pub fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn bind(&self, local: SocketAddr) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Bind(local));
        state.local = Some(local);
        state.active = true;
        Ok(())
    }

    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Connect(remote));
        state.remote = Some(remote);
        if local.is_some() {
            state.local = local;
        }
        state.active = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Disconnect);
        state.active = false;
        state.remote = None;
        Ok(())
    }

    fn close(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Close);
        state.open = false;
        state.active = false;
        Ok(())
    }

    fn begin_read(&self) -> Result<(), ChannelError> {
        self.state.lock().ops.push(TransportOp::BeginRead);
        Ok(())
    }

    fn write(&self, msg: PipelineMessage) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Write);
        if let Some(err) = &state.write_failure {
            return Err(err.clone());
        }
        state.written.push(msg);
        Ok(())
    }

    fn flush(&self) -> Result<(), ChannelError> {
        self.state.lock().ops.push(TransportOp::Flush);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.lock().remote
    }
}
