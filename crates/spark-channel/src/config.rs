//! 事件循环组与通道的配置载体。
//!
//! 两个结构都实现 `serde::Deserialize` 且每个字段都有默认值，因此可以直接嵌入宿主的
//! TOML 配置树，也可以用 [`EventLoopGroupConfig::from_toml_str`] 单独解析。

use serde::Deserialize;

/// 配置解析或校验失败。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 事件循环组配置。
///
/// # 契约说明（What）
/// - `threads`：循环数量；`0` 表示取 `2 × available_parallelism`；
/// - `thread_name_prefix`：线程名前缀，实际名称为 `{prefix}-{index}`；
/// - `max_pending_tasks`：单个循环的队列容量，`None` 表示无界；队列满时 `execute` 返回拒绝。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoopGroupConfig {
    pub threads: usize,
    pub thread_name_prefix: String,
    pub max_pending_tasks: Option<usize>,
}

impl Default for EventLoopGroupConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            thread_name_prefix: "spark-loop".to_owned(),
            max_pending_tasks: None,
        }
    }
}

impl EventLoopGroupConfig {
    /// 固定线程数的便捷构造。
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name_prefix",
                reason: "must not be blank",
            });
        }
        if self.max_pending_tasks == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_pending_tasks",
                reason: "a zero capacity queue rejects every task",
            });
        }
        Ok(())
    }

    /// 解析 `threads = 0` 之后的实际循环数量。
    pub fn resolved_threads(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }
}

/// 单个通道的运行参数。
///
/// `auto_read` 为真时，Head 哨兵在 `channel_active` 与 `channel_read_complete` 之后自动
/// 发起下一次 `read`，与传输层的“读取就绪即继续读”语义一致。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub auto_read: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { auto_read: true }
    }
}

impl ChannelConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
