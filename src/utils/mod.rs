pub mod logger;
pub mod scheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuizError {
    #[error("未登录: 该操作需要身份认证")]
    Unauthenticated,

    #[error("权限不足: 需要管理员权限")]
    PermissionDenied,

    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("状态不满足: {0}")]
    FailedPrecondition(String),

    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("提取文本过短: {len} 字符 (至少需要 {min} 字符)")]
    InsufficientContent { len: usize, min: usize },

    #[error("分类失败: {0}")]
    ClassificationFailed(String),

    #[error("内容生成失败: {0}")]
    GenerationFailed(String),

    #[error("事务失败: {0}")]
    TransactionFailed(String),

    #[error("OCR错误: {0}")]
    Ocr(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl QuizError {
    /// RPC 层使用的稳定状态码
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::Unauthenticated => "UNAUTHENTICATED",
            QuizError::PermissionDenied => "PERMISSION_DENIED",
            QuizError::InvalidArgument(_) => "INVALID_ARGUMENT",
            QuizError::NotFound(_) => "NOT_FOUND",
            QuizError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            QuizError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            QuizError::InsufficientContent { .. } => "INSUFFICIENT_CONTENT",
            QuizError::ClassificationFailed(_) => "CLASSIFICATION_FAILED",
            QuizError::GenerationFailed(_) => "GENERATION_FAILED",
            QuizError::TransactionFailed(_) => "TRANSACTION_FAILED",
            QuizError::Ocr(_)
            | QuizError::Database(_)
            | QuizError::Network(_)
            | QuizError::Io(_)
            | QuizError::Serde(_)
            | QuizError::Internal(_) => "INTERNAL",
        }
    }

    /// SQLite 锁冲突（可重试）
    pub fn is_lock_conflict(&self) -> bool {
        match self {
            QuizError::Database(sqlx::Error::Database(db_err)) => {
                let message = db_err.message();
                message.contains("database is locked") || message.contains("database table is locked")
            }
            _ => false,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        QuizError::InvalidArgument(msg.into())
    }
}

pub type QuizResult<T> = Result<T, QuizError>;

/// 按字符边界截断文本
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
