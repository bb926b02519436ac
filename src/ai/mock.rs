use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{GenerativeBackend, OutputMode};
use crate::utils::{QuizError, QuizResult};

/// 按顺序回放预置响应的后端，用于测试和离线演示
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<QuizResult<String>>>,
    prompts: Mutex<Vec<(OutputMode, String)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: impl Into<String>) -> &Self {
        self.queue().push_back(Ok(response.into()));
        self
    }

    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.queue().push_back(Err(QuizError::Internal(message.into())));
        self
    }

    /// 已收到的提示词（按调用顺序）
    pub fn prompts(&self) -> Vec<(OutputMode, String)> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<QuizResult<String>>> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> QuizResult<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((mode, prompt.to_string()));
        self.queue()
            .pop_front()
            .unwrap_or_else(|| Err(QuizError::Internal("ScriptedBackend 没有剩余响应".to_string())))
    }
}
