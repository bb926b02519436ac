use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::ai::prompts::{advice_prompt, explanation_prompt};
use crate::ai::{GenerativeBackend, OutputMode};
use crate::storage::Database;
use crate::utils::{QuizError, QuizResult};

/// 解释读穿缓存与学习建议
pub struct Explainer {
    db: Database,
    backend: Arc<dyn GenerativeBackend>,
    timeout: Duration,
}

impl Explainer {
    pub fn new(db: Database, backend: Arc<dyn GenerativeBackend>, timeout: Duration) -> Self {
        Self { db, backend, timeout }
    }

    async fn generate_text(&self, prompt: &str) -> QuizResult<String> {
        let text = tokio::time::timeout(self.timeout, self.backend.generate(prompt, OutputMode::Text))
            .await
            .map_err(|_| QuizError::GenerationFailed("AI 调用超时".to_string()))?
            .map_err(|e| QuizError::GenerationFailed(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(QuizError::GenerationFailed("模型返回为空".to_string()));
        }
        Ok(text.to_string())
    }

    /// 已有解释直接返回；否则生成并仅在仍为空时写回。第二个值表示是否命中缓存
    pub async fn get_or_generate_explanation(&self, mcq_id: &str) -> QuizResult<(String, bool)> {
        let mcq = self.db.get_mcq(mcq_id).await?;
        if let Some(explanation) = mcq.explanation.as_deref().filter(|e| !e.trim().is_empty()) {
            debug!("MCQ {} 命中解释缓存", mcq_id);
            return Ok((explanation.to_string(), true));
        }

        let prompt = explanation_prompt(&mcq.question, &mcq.options, mcq.answer);
        let explanation = self.generate_text(&prompt).await?;

        if self.db.set_explanation_if_absent(mcq_id, &explanation).await? {
            info!("MCQ {} 已写入生成的解释", mcq_id);
            return Ok((explanation, false));
        }

        // 并发请求已先写入，以库中为准
        let stored = self.db.get_mcq(mcq_id).await?;
        Ok((stored.explanation.unwrap_or(explanation), false))
    }

    pub async fn performance_advice(
        &self,
        strong_topics: &[String],
        weak_topics: &[String],
        overall_accuracy: f64,
    ) -> QuizResult<String> {
        if !overall_accuracy.is_finite() || !(0.0..=100.0).contains(&overall_accuracy) {
            return Err(QuizError::invalid(format!(
                "overallAccuracy 必须在 0 到 100 之间: {}",
                overall_accuracy
            )));
        }
        let prompt = advice_prompt(strong_topics, weak_topics, overall_accuracy);
        self.generate_text(&prompt).await
    }
}
