use std::{any::Any, error::Error as StdError, fmt, io, sync::Arc};

use crate::{config::ConfigError, pipeline::EventKind};

/// 稳定错误码，遵循 `<域>.<语义>` 命名约定。
///
/// 错误码一经发布即视为契约：日志聚合、告警规则与测试断言都以它为键，
/// 而不是解析 `Display` 文案。
pub mod codes {
    pub const PIPELINE_DUPLICATE_NAME: &str = "pipeline.duplicate_name";
    pub const PIPELINE_INVALID_NAME: &str = "pipeline.invalid_name";
    pub const PIPELINE_NO_SUCH_HANDLER: &str = "pipeline.no_such_handler";
    pub const PIPELINE_SENTINEL: &str = "pipeline.sentinel";
    pub const PIPELINE_EMPTY: &str = "pipeline.empty";
    pub const PIPELINE_HANDLER_ADDED: &str = "pipeline.handler_added_failed";
    pub const PIPELINE_HANDLER_REMOVED: &str = "pipeline.handler_removed_failed";
    pub const PIPELINE_HANDLER_FAILURE: &str = "pipeline.handler_failure";
    pub const PIPELINE_HANDLER_PANIC: &str = "pipeline.handler_panic";
    pub const PROMISE_ALREADY_COMPLETED: &str = "promise.already_completed";
    pub const PROMISE_CHANNEL_MISMATCH: &str = "promise.channel_mismatch";
    pub const PROMISE_CLOSE_FUTURE: &str = "promise.close_future_not_allowed";
    pub const PROMISE_CANCELLED: &str = "promise.cancelled";
    pub const PROMISE_BLOCKING_ON_LOOP: &str = "promise.blocking_on_event_loop";
    pub const PROMISE_TIMEOUT: &str = "promise.timeout";
    pub const RUNTIME_REJECTED: &str = "runtime.rejected";
    pub const RUNTIME_SPAWN: &str = "runtime.spawn_failed";
    pub const CHANNEL_CLOSED: &str = "channel.closed";
    pub const CHANNEL_ALREADY_REGISTERED: &str = "channel.already_registered";
    pub const CHANNEL_DROPPED: &str = "channel.dropped";
    pub const TRANSPORT_IO: &str = "transport.io";
    pub const TRANSPORT_UNSUPPORTED: &str = "transport.unsupported";
    pub const CONFIG_INVALID: &str = "config.invalid";
}

/// 共享的底层原因；`Arc` 让同一错误可以被多个 Promise 监听器克隆观察。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Handler 回调的统一返回类型。
pub type HandlerResult = Result<(), ChannelError>;

/// 事件循环拒绝任务时返回的原因。
///
/// 拒绝只发生在两种情形：循环已进入关闭流程，或有界队列已满。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RejectedExecution {
    #[error("event loop `{0}` is shutting down")]
    ShuttingDown(String),
    #[error("event loop `{name}` task queue is full (capacity {capacity})")]
    QueueFull { name: String, capacity: usize },
}

/// `ChannelError` 是 spark-channel 全部可观察错误的最终形态。
///
/// # 契约说明（What）
/// - 契约违规（重名 Handler、复用 Promise、事件循环线程内阻塞等待）总是同步返回给调用方；
/// - Handler 运行期错误经由 [`ChannelError::handler`] 包装，入站方向被转为 `exception_caught` 事件，
///   出站方向直接失败对应的 Promise；
/// - 类型实现 `Clone`：底层原因以 [`ErrorCause`] 共享，Promise 的多个持有者观察到的是同一份错误。
///
/// # 错误码
/// 每个分支都映射到 [`codes`] 中的稳定错误码，参见 [`ChannelError::code`]。
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("duplicate handler name: {0}")]
    DuplicateName(String),
    #[error("handler name must not be empty")]
    InvalidName,
    #[error("no handler named `{0}` in the pipeline")]
    NoSuchHandler(String),
    #[error("sentinel `{0}` cannot be removed, replaced or used as an insertion target")]
    Sentinel(&'static str),
    #[error("pipeline has no user handlers")]
    EmptyPipeline,
    #[error("{handler}.handler_added() failed; the handler was removed")]
    HandlerAdded {
        handler: String,
        #[source]
        cause: Box<ChannelError>,
    },
    #[error("{handler}.handler_removed() failed")]
    HandlerRemoved {
        handler: String,
        #[source]
        cause: Box<ChannelError>,
    },
    #[error("handler `{handler}` failed while handling {event}")]
    HandlerFailure {
        handler: String,
        event: EventKind,
        #[source]
        cause: Box<ChannelError>,
    },
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Handler(#[source] ErrorCause),
    #[error("promise already completed")]
    PromiseAlreadyCompleted,
    #[error("promise belongs to another channel (expected {expected}, found {found})")]
    PromiseChannelMismatch { expected: String, found: String },
    #[error("the channel close future cannot be used as an operation promise")]
    CloseFutureNotAllowed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("blocking wait on the event loop thread would dead lock")]
    BlockingOnEventLoop,
    #[error("timed out waiting for completion")]
    Timeout,
    #[error("task rejected: {0}")]
    Rejected(#[from] RejectedExecution),
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[source] Arc<io::Error>),
    #[error("channel is closed")]
    Closed,
    #[error("channel is already registered to an event loop")]
    AlreadyRegistered,
    #[error("channel was dropped before the operation ran")]
    ChannelDropped,
    #[error("transport i/o failure: {0}")]
    Io(#[source] Arc<io::Error>),
    #[error("operation `{0}` is not supported by the transport")]
    Unsupported(&'static str),
    #[error("invalid configuration: {0}")]
    Config(#[source] Arc<ConfigError>),
}

impl ChannelError {
    /// 将任意业务错误包装为 Handler 运行期错误。
    pub fn handler(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Handler(Arc::new(err))
    }

    /// 以文本消息构造 Handler 运行期错误，常用于测试与简单业务分支。
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Handler(Arc::new(Message(msg.into())))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let text = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panicked(text)
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName(_) => codes::PIPELINE_DUPLICATE_NAME,
            Self::InvalidName => codes::PIPELINE_INVALID_NAME,
            Self::NoSuchHandler(_) => codes::PIPELINE_NO_SUCH_HANDLER,
            Self::Sentinel(_) => codes::PIPELINE_SENTINEL,
            Self::EmptyPipeline => codes::PIPELINE_EMPTY,
            Self::HandlerAdded { .. } => codes::PIPELINE_HANDLER_ADDED,
            Self::HandlerRemoved { .. } => codes::PIPELINE_HANDLER_REMOVED,
            Self::HandlerFailure { .. } | Self::Handler(_) => codes::PIPELINE_HANDLER_FAILURE,
            Self::Panicked(_) => codes::PIPELINE_HANDLER_PANIC,
            Self::PromiseAlreadyCompleted => codes::PROMISE_ALREADY_COMPLETED,
            Self::PromiseChannelMismatch { .. } => codes::PROMISE_CHANNEL_MISMATCH,
            Self::CloseFutureNotAllowed => codes::PROMISE_CLOSE_FUTURE,
            Self::Cancelled => codes::PROMISE_CANCELLED,
            Self::BlockingOnEventLoop => codes::PROMISE_BLOCKING_ON_LOOP,
            Self::Timeout => codes::PROMISE_TIMEOUT,
            Self::Rejected(_) => codes::RUNTIME_REJECTED,
            Self::Spawn(_) => codes::RUNTIME_SPAWN,
            Self::Closed => codes::CHANNEL_CLOSED,
            Self::AlreadyRegistered => codes::CHANNEL_ALREADY_REGISTERED,
            Self::ChannelDropped => codes::CHANNEL_DROPPED,
            Self::Io(_) => codes::TRANSPORT_IO,
            Self::Unsupported(_) => codes::TRANSPORT_UNSUPPORTED,
            Self::Config(_) => codes::CONFIG_INVALID,
        }
    }

    /// 是否属于调用方违反契约一类的错误。
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName(_)
                | Self::InvalidName
                | Self::NoSuchHandler(_)
                | Self::Sentinel(_)
                | Self::PromiseAlreadyCompleted
                | Self::PromiseChannelMismatch { .. }
                | Self::CloseFutureNotAllowed
                | Self::BlockingOnEventLoop
                | Self::AlreadyRegistered
        )
    }
}

impl From<ConfigError> for ChannelError {
    fn from(err: ConfigError) -> Self {
        Self::Config(Arc::new(err))
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_domain_reason_convention() {
        let samples = [
            ChannelError::DuplicateName("a".into()),
            ChannelError::PromiseAlreadyCompleted,
            ChannelError::Rejected(RejectedExecution::ShuttingDown("loop-0".into())),
            ChannelError::from(io::Error::other("boom")),
            ChannelError::message("custom"),
        ];
        for err in samples {
            let (domain, reason) = err.code().split_once('.').expect("code must contain a dot");
            assert!(!domain.is_empty() && !reason.is_empty(), "{}", err.code());
        }
    }

    #[test]
    fn panic_payloads_keep_their_text() {
        let err = ChannelError::from_panic(Box::new("kaboom"));
        assert_eq!(err.to_string(), "handler panicked: kaboom");
        let err = ChannelError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.code(), codes::PIPELINE_HANDLER_PANIC);
    }

    #[test]
    fn message_errors_render_verbatim() {
        let err = ChannelError::message("decoder exploded");
        assert_eq!(err.to_string(), "decoder exploded");
        assert!(!err.is_contract_violation());
        assert!(ChannelError::DuplicateName("x".into()).is_contract_violation());
    }
}
