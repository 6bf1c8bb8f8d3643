//! 通道 Pipeline：处理器链、两阶段生命周期与线程亲和调度。
//!
//! # 模块分工
//! - [`mask`]：事件种类、兴趣掩码与按类型缓存的掩码计算；
//! - `handler`：[`ChannelHandler`] 回调契约与默认转发实现；
//! - `chain`：以代际句柄寻址的双向链 arena；
//! - `context`：[`ChannelHandlerContext`] 与调度协议；
//! - `sentinel`：head/tail 哨兵；
//! - `pipeline`：[`ChannelPipeline`] 容器。

mod chain;
mod context;
mod handler;
pub mod mask;
#[allow(clippy::module_inception)]
mod pipeline;
mod sentinel;

pub use context::{ChannelHandlerContext, HandlerState};
pub use handler::ChannelHandler;
pub use mask::{EventKind, EventMask, mask_of};
pub use pipeline::ChannelPipeline;
