//! 常用类型一站式导入：`use spark_channel::prelude::*;`。
//!
//! 只收录编写 Handler 与驱动通道时高频出现的类型，边缘模块（配置、属性、测试桩）仍使用完整路径。

pub use crate::{
    channel::{Channel, ChannelId, Transport},
    error::{ChannelError, HandlerResult},
    message::PipelineMessage,
    pipeline::{ChannelHandler, ChannelHandlerContext, ChannelPipeline, EventMask},
    promise::{ChannelFuture, ChannelPromise, Outcome},
    runtime::{DefaultEventLoopGroup, EventLoop, EventLoopGroup},
};
