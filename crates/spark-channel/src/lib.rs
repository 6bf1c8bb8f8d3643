#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-channel: 通道 Pipeline 调度引擎。"]
#![doc = ""]
#![doc = "提供有序的 Handler 链、两阶段添加/移除生命周期、按事件循环线程亲和的事件调度、"]
#![doc = "按类型缓存的兴趣掩码，以及用于报告异步操作结果的单赋值 Promise。"]
#![doc = "套接字多路复用、编解码与引导装配不在本 crate 范围内，以 [`channel::Transport`] 等窄接口对接。"]

pub mod attribute;
pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod prelude;
pub mod promise;
pub mod runtime;
pub mod test_stubs;

pub use channel::{Channel, ChannelId, Transport};
pub use error::{ChannelError, HandlerResult, RejectedExecution};
pub use message::PipelineMessage;
pub use pipeline::{ChannelHandler, ChannelHandlerContext, ChannelPipeline, EventKind, EventMask};
pub use promise::{ChannelFuture, ChannelPromise, Outcome, Promise};
pub use runtime::{DefaultEventLoopGroup, EventLoop, EventLoopGroup, SingleThreadEventLoop};
