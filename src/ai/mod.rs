pub mod client;
pub mod json;
pub mod mock;
pub mod prompts;

pub use client::ChatCompletionBackend;
pub use mock::ScriptedBackend;

use async_trait::async_trait;

use crate::utils::QuizResult;

/// 请求的输出形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

/// 生成式文本后端：输入单条提示词，返回生成文本。
///
/// `Json` 模式只是向后端请求 JSON，结果仍需经过 [`json::parse_json_output`] 校验。
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> QuizResult<String>;
}
