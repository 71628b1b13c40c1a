//! 错误类型
//!
//! 分为两层：
//! - [`PipelineError`]：单个条目（一篇论文、一次生成调用）的失败，在条目边界被捕获、记录，
//!   不会中断同阶段的其他条目
//! - [`AppError`]：进程级错误（配置、文件、状态机），直接向上传播

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 单个条目的失败类型
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// 网络暂时不可用（可退避重试）
    #[error("网络暂时不可用: {message}")]
    TransientNetwork { message: String },

    /// 请求频率限制（可退避重试，等待时间更长）
    #[error("请求频率限制, 建议等待: {retry_after_secs:?}秒")]
    RateLimit { retry_after_secs: Option<u64> },

    /// 单次调用超时（可退避重试）
    #[error("请求超时 ({timeout_secs}秒)")]
    Timeout { timeout_secs: u64 },

    /// 返回内容未通过结构校验（换用更严格的提示词重试）
    #[error("返回内容未通过校验: {reason}")]
    SchemaValidation { reason: String },

    /// 配额耗尽，当前阶段直接失败
    #[error("调用配额已用尽: {message}")]
    QuotaExceeded { message: String },

    /// 文档超过大小上限，跳过该文档
    #[error("文档大小 {size} 字节超过上限 {limit} 字节")]
    SizeLimit { size: u64, limit: u64 },

    /// 运行被取消
    #[error("运行已取消")]
    Cancelled,

    /// 其他不可重试的错误
    #[error("不可重试的错误: {message}")]
    Fatal { message: String },
}

/// 错误种类（用于运行报告中的错误记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    RateLimit,
    Timeout,
    SchemaValidation,
    QuotaExceeded,
    SizeLimit,
    Cancelled,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::SizeLimit => "size_limit",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    /// 是否属于传输层的瞬时错误（退避后重试）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork { .. }
                | PipelineError::RateLimit { .. }
                | PipelineError::Timeout { .. }
        )
    }

    /// 是否会让整个阶段失败
    pub fn is_stage_fatal(&self) -> bool {
        matches!(self, PipelineError::QuotaExceeded { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            PipelineError::RateLimit { .. } => ErrorKind::RateLimit,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            PipelineError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            PipelineError::SizeLimit { .. } => ErrorKind::SizeLimit,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    // ========== 便捷构造函数 ==========

    pub fn transient(message: impl Into<String>) -> Self {
        PipelineError::TransientNetwork {
            message: message.into(),
        }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        PipelineError::SchemaValidation {
            reason: reason.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        PipelineError::Fatal {
            message: message.into(),
        }
    }

    /// 根据 HTTP 状态码归类错误
    ///
    /// # 参数
    /// - `status`: HTTP 状态码
    /// - `retry_after`: `Retry-After` 头（秒）
    /// - `body`: 响应体（用于识别配额类错误）
    pub fn from_status(status: u16, retry_after: Option<u64>, body: &str) -> Self {
        let lowered = body.to_lowercase();
        match status {
            402 => PipelineError::QuotaExceeded {
                message: truncate(body, 200),
            },
            429 if lowered.contains("quota") => PipelineError::QuotaExceeded {
                message: truncate(body, 200),
            },
            429 => PipelineError::RateLimit {
                retry_after_secs: retry_after,
            },
            408 | 500..=599 => PipelineError::transient(format!("HTTP {}", status)),
            _ => PipelineError::fatal(format!("HTTP {}: {}", status, truncate(body, 200))),
        }
    }

    /// 根据错误描述归类错误
    ///
    /// 生成能力的 SDK 错误只暴露文本描述，这里按关键字归类
    pub fn classify_message(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("insufficient_quota")
            || lowered.contains("quota")
            || lowered.contains("insufficient balance")
        {
            PipelineError::QuotaExceeded {
                message: truncate(message, 200),
            }
        } else if lowered.contains("429") || lowered.contains("rate limit") {
            PipelineError::RateLimit {
                retry_after_secs: None,
            }
        } else if lowered.contains("timed out")
            || lowered.contains("timeout")
            || lowered.contains("connection")
            || lowered.contains("error sending request")
            || lowered.contains("502")
            || lowered.contains("503")
            || lowered.contains("504")
        {
            PipelineError::transient(truncate(message, 200))
        } else {
            PipelineError::fatal(truncate(message, 200))
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return PipelineError::from_status(status.as_u16(), None, &err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            PipelineError::transient(err.to_string())
        } else {
            PipelineError::fatal(err.to_string())
        }
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("流水线错误: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("文件错误: {0}")]
    File(#[from] FileError),

    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP 服务启动或运行失败
    #[error("HTTP 服务错误: {0}")]
    Http(String),

    /// 运行状态机收到非法迁移
    #[error("非法的状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("错误: {0}")]
    Other(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置项取值非法
    #[error("配置项 {field} 非法: {reason}")]
    InvalidValue { field: String, reason: String },

    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// TOML 配置文件解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("文件不存在: {path}")]
    NotFound { path: String },

    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建配置项非法错误
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
