use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{GenerativeBackend, OutputMode};
use crate::config::AiConfig;
use crate::utils::{QuizError, QuizResult};

/// OpenAI 兼容的 chat-completions 请求体
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// 请求失败的分类：只有网络错误、429、5xx 会重试
enum CallError {
    Retryable(QuizError),
    Fatal(QuizError),
}

pub struct ChatCompletionBackend {
    client: reqwest::Client,
    config: AiConfig,
}

impl ChatCompletionBackend {
    pub fn new(config: AiConfig) -> QuizResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty() && self.config.api_key != "your-api-key"
    }

    async fn do_request(&self, request: &ChatRequest<'_>) -> Result<String, CallError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CallError::Retryable(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = QuizError::Internal(format!("AI 接口返回错误 {}: {}", status, body));
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(CallError::Retryable(err))
            } else {
                Err(CallError::Fatal(err))
            };
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(QuizError::Internal(format!("解析 AI 响应失败: {}", e))))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CallError::Fatal(QuizError::Internal("AI 未返回可用结果".to_string())))
    }
}

#[async_trait]
impl GenerativeBackend for ChatCompletionBackend {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> QuizResult<String> {
        if !self.is_configured() {
            return Err(QuizError::Internal("AI api_key 未配置".to_string()));
        }

        let system = match mode {
            OutputMode::Text => "You are a precise medical education assistant.",
            OutputMode::Json => "You are a precise medical education assistant. Respond with a single valid JSON object and nothing else.",
        };
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.config.temperature,
            response_format: (mode == OutputMode::Json).then_some(ResponseFormat { kind: "json_object" }),
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                info!("AI 请求重试 ({}/{})，等待 {}ms...", attempt + 1, attempts, delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.do_request(&request).await {
                Ok(content) => return Ok(content),
                Err(CallError::Fatal(e)) => return Err(e),
                Err(CallError::Retryable(e)) => {
                    warn!("AI 请求失败 (尝试 {}/{}): {}", attempt + 1, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| QuizError::Internal("AI 请求失败".to_string())))
    }
}
