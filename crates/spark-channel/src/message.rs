use std::{any::Any, fmt};

use bytes::Bytes;

/// 在 Pipeline 中流动的消息与用户事件载体。
///
/// # 契约说明（What）
/// - `Bytes`：传输层读到或即将写出的原始字节；
/// - `User`：经编解码 Handler 转换后的任意业务对象，通过 [`downcast`](Self::downcast) 取回；
/// - 消息按值移动，每一跳只有一个所有者，Handler 接收后要么向后转发、要么消费。
pub enum PipelineMessage {
    Bytes(Bytes),
    User(Box<dyn Any + Send>),
}

impl PipelineMessage {
    pub fn from_user<T: Any + Send>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// 取出业务对象；类型不匹配时原样返还消息以便继续转发。
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::User(boxed) => boxed.downcast::<T>().map(|v| *v).map_err(Self::User),
            other => Err(other),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(boxed) => boxed.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::User(_) => None,
        }
    }
}

impl From<Bytes> for PipelineMessage {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::User(_) => f.write_str("User(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_mismatch_returns_the_message() {
        let msg = PipelineMessage::from_user(42u32);
        let msg = msg.downcast::<String>().expect_err("type mismatch");
        assert_eq!(msg.downcast_ref::<u32>(), Some(&42));
        assert_eq!(msg.downcast::<u32>().ok(), Some(42));
    }

    #[test]
    fn bytes_are_not_user_payloads() {
        let msg = PipelineMessage::from_bytes(&b"ping"[..]);
        assert_eq!(msg.as_bytes().map(|b| b.as_ref()), Some(&b"ping"[..]));
        assert!(msg.downcast::<Bytes>().is_err());
    }
}
