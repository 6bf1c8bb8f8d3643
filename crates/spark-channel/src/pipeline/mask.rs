//! 事件兴趣掩码。
//!
//! # 教案级说明
//! - **意图（Why）**：大多数 Handler 只关心少数几类事件，其余事件的默认实现只是原样转发；
//!   调度时直接跳过这些节点能省掉一次虚调用与可能的线程跳转。
//! - **逻辑（How）**：每种事件占一个比特；Handler 类型通过 [`ChannelHandler::interest`]
//!   声明自己覆写的事件集合，[`mask_of`] 以 `TypeId` 为键在进程级 `DashMap` 中惰性缓存结果，
//!   同一类型第二次建节点时为 O(1) 读取。
//! - **契约（What）**：掩码只是跳过优化而非正确性前提——跳过一个未覆写的 Handler 与调用它的默认
//!   转发实现等价；哨兵节点恒为全比特掩码，保证遍历必然终止。

use std::{
    any::TypeId,
    fmt,
    sync::LazyLock,
};

use bitflags::bitflags;
use dashmap::DashMap;

use super::handler::ChannelHandler;

bitflags! {
    /// 每种 Pipeline 事件一个比特。
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const CHANNEL_REGISTERED = 1 << 0;
        const CHANNEL_UNREGISTERED = 1 << 1;
        const CHANNEL_ACTIVE = 1 << 2;
        const CHANNEL_INACTIVE = 1 << 3;
        const CHANNEL_READ = 1 << 4;
        const CHANNEL_READ_COMPLETE = 1 << 5;
        const USER_EVENT_TRIGGERED = 1 << 6;
        const CHANNEL_WRITABILITY_CHANGED = 1 << 7;
        const EXCEPTION_CAUGHT = 1 << 8;
        const BIND = 1 << 9;
        const CONNECT = 1 << 10;
        const DISCONNECT = 1 << 11;
        const CLOSE = 1 << 12;
        const DEREGISTER = 1 << 13;
        const READ = 1 << 14;
        const WRITE = 1 << 15;
        const FLUSH = 1 << 16;

        /// 全部入站事件（不含 `EXCEPTION_CAUGHT`）。
        const INBOUND = Self::CHANNEL_REGISTERED.bits()
            | Self::CHANNEL_UNREGISTERED.bits()
            | Self::CHANNEL_ACTIVE.bits()
            | Self::CHANNEL_INACTIVE.bits()
            | Self::CHANNEL_READ.bits()
            | Self::CHANNEL_READ_COMPLETE.bits()
            | Self::USER_EVENT_TRIGGERED.bits()
            | Self::CHANNEL_WRITABILITY_CHANGED.bits();

        /// 全部出站操作。
        const OUTBOUND = Self::BIND.bits()
            | Self::CONNECT.bits()
            | Self::DISCONNECT.bits()
            | Self::CLOSE.bits()
            | Self::DEREGISTER.bits()
            | Self::READ.bits()
            | Self::WRITE.bits()
            | Self::FLUSH.bits();
    }
}

/// Pipeline 事件种类，用于日志字段与错误上下文。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    ChannelRegistered,
    ChannelUnregistered,
    ChannelActive,
    ChannelInactive,
    ChannelRead,
    ChannelReadComplete,
    UserEventTriggered,
    ChannelWritabilityChanged,
    ExceptionCaught,
    Bind,
    Connect,
    Disconnect,
    Close,
    Deregister,
    Read,
    Write,
    Flush,
}

impl EventKind {
    pub const fn mask(self) -> EventMask {
        match self {
            Self::ChannelRegistered => EventMask::CHANNEL_REGISTERED,
            Self::ChannelUnregistered => EventMask::CHANNEL_UNREGISTERED,
            Self::ChannelActive => EventMask::CHANNEL_ACTIVE,
            Self::ChannelInactive => EventMask::CHANNEL_INACTIVE,
            Self::ChannelRead => EventMask::CHANNEL_READ,
            Self::ChannelReadComplete => EventMask::CHANNEL_READ_COMPLETE,
            Self::UserEventTriggered => EventMask::USER_EVENT_TRIGGERED,
            Self::ChannelWritabilityChanged => EventMask::CHANNEL_WRITABILITY_CHANGED,
            Self::ExceptionCaught => EventMask::EXCEPTION_CAUGHT,
            Self::Bind => EventMask::BIND,
            Self::Connect => EventMask::CONNECT,
            Self::Disconnect => EventMask::DISCONNECT,
            Self::Close => EventMask::CLOSE,
            Self::Deregister => EventMask::DEREGISTER,
            Self::Read => EventMask::READ,
            Self::Write => EventMask::WRITE,
            Self::Flush => EventMask::FLUSH,
        }
    }

    pub const fn is_inbound(self) -> bool {
        EventMask::INBOUND
            .union(EventMask::EXCEPTION_CAUGHT)
            .contains(self.mask())
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelRegistered => "channel_registered",
            Self::ChannelUnregistered => "channel_unregistered",
            Self::ChannelActive => "channel_active",
            Self::ChannelInactive => "channel_inactive",
            Self::ChannelRead => "channel_read",
            Self::ChannelReadComplete => "channel_read_complete",
            Self::UserEventTriggered => "user_event_triggered",
            Self::ChannelWritabilityChanged => "channel_writability_changed",
            Self::ExceptionCaught => "exception_caught",
            Self::Bind => "bind",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Close => "close",
            Self::Deregister => "deregister",
            Self::Read => "read",
            Self::Write => "write",
            Self::Flush => "flush",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static MASKS: LazyLock<DashMap<TypeId, EventMask>> = LazyLock::new(DashMap::new);

/// 计算并缓存 Handler 类型的兴趣掩码。
pub fn mask_of<H: ChannelHandler>() -> EventMask {
    let key = TypeId::of::<H>();
    if let Some(mask) = MASKS.get(&key) {
        return *mask;
    }
    *MASKS.entry(key).or_insert_with(compute::<H>)
}

fn compute<H: ChannelHandler>() -> EventMask {
    // 未定义的比特直接截断，避免未来扩展的事件被误判为已覆写。
    H::interest() & EventMask::all()
}

/// 当前已缓存的 Handler 类型数量。
pub fn cached_types() -> usize {
    MASKS.len()
}
