//! Ingestion 错误类型

use contracts::ContractError;
use thiserror::Error;

/// 帧切分错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// 帧超过长度上限，已丢弃
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    Oversized {
        /// 检测到时的帧长度（newline 分帧时为已缓冲的字节数）
        len: usize,
        /// 配置的上限
        max: usize,
    },
}

/// 协议解码错误（帧已丢弃，流继续）
#[derive(Debug, Error)]
pub enum TranslateError {
    /// 不是合法的 JSON
    #[error("malformed JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// 缺少 type 字段
    #[error("envelope has no type tag")]
    MissingType,

    /// 数值字段超出范围
    #[error("{field} out of range")]
    OutOfRange {
        /// 字段名
        field: &'static str,
    },
}

impl From<TranslateError> for ContractError {
    fn from(err: TranslateError) -> Self {
        ContractError::ProtocolDecode {
            message: err.to_string(),
        }
    }
}

impl From<FrameError> for ContractError {
    fn from(err: FrameError) -> Self {
        ContractError::ProtocolDecode {
            message: err.to_string(),
        }
    }
}

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 连接器已在运行
    #[error("source connector is already running")]
    AlreadyRunning,

    /// 帧切分失败
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// 协议解码失败
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// 连接错误
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
