use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::json::parse_json_output;
use crate::ai::prompts::classification_prompt;
use crate::ai::{GenerativeBackend, OutputMode};
use crate::storage::models::{Classification, TopicRecord};
use crate::utils::{truncate_chars, QuizError, QuizResult};

/// 模型原始输出，字段全部可选，由 [`RawClassification::validate`] 收紧
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawClassification {
    suggested_topic: Option<String>,
    suggested_chapter: Option<String>,
    estimated_mcq_count: Option<i64>,
    estimated_flashcard_count: Option<i64>,
    source_reference: Option<String>,
}

fn required_name(field: &str, value: Option<String>) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("缺少字段 {}", field)),
    }
}

fn required_count(field: &str, value: Option<i64>) -> Result<u32, String> {
    match value {
        Some(n) if n >= 0 => u32::try_from(n).map_err(|_| format!("{} 超出范围: {}", field, n)),
        Some(n) => Err(format!("{} 不能为负数: {}", field, n)),
        None => Err(format!("缺少字段 {}", field)),
    }
}

impl RawClassification {
    fn validate(self, taxonomy: &[TopicRecord]) -> Result<Classification, String> {
        let suggested_topic = required_name("suggestedTopic", self.suggested_topic)?;
        let suggested_chapter = required_name("suggestedChapter", self.suggested_chapter)?;
        let estimated_mcq_count = required_count("estimatedMcqCount", self.estimated_mcq_count)?;
        let estimated_flashcard_count = required_count("estimatedFlashcardCount", self.estimated_flashcard_count)?;
        let source_reference = required_name("sourceReference", self.source_reference)?;

        let is_new_chapter = !taxonomy
            .iter()
            .any(|t| t.name == suggested_topic && t.chapters.iter().any(|c| *c == suggested_chapter));

        Ok(Classification {
            suggested_topic,
            suggested_chapter,
            is_new_chapter,
            estimated_mcq_count,
            estimated_flashcard_count,
            source_reference,
        })
    }
}

/// 根据已有分类体系为提取文本建议主题、章节与数量
pub struct Classifier {
    backend: Arc<dyn GenerativeBackend>,
    char_limit: usize,
    timeout: Duration,
}

impl Classifier {
    pub fn new(backend: Arc<dyn GenerativeBackend>, char_limit: usize, timeout: Duration) -> Self {
        Self {
            backend,
            char_limit,
            timeout,
        }
    }

    pub async fn classify(&self, text: &str, taxonomy: &[TopicRecord]) -> QuizResult<Classification> {
        let excerpt = truncate_chars(text, self.char_limit);
        let prompt = classification_prompt(excerpt, taxonomy);
        info!("分类请求: {} 字符, 已有 {} 个主题", excerpt.chars().count(), taxonomy.len());

        let raw = tokio::time::timeout(self.timeout, self.backend.generate(&prompt, OutputMode::Json))
            .await
            .map_err(|_| QuizError::ClassificationFailed("AI 调用超时".to_string()))?
            .map_err(|e| QuizError::ClassificationFailed(e.to_string()))?;

        let parsed: RawClassification = parse_json_output(&raw).map_err(|e| {
            warn!("分类输出无法解析: {}", e);
            QuizError::ClassificationFailed(e)
        })?;

        parsed.validate(taxonomy).map_err(QuizError::ClassificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedBackend;

    fn taxonomy() -> Vec<TopicRecord> {
        vec![TopicRecord {
            name: "Cardiology".into(),
            chapters: vec!["Congenital Heart Disease".into()],
        }]
    }

    fn classifier(backend: Arc<ScriptedBackend>) -> Classifier {
        Classifier::new(backend, 20_000, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn existing_chapter_is_not_new() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_response(
            r#"Here you go: {"suggestedTopic":"Cardiology","suggestedChapter":"Congenital Heart Disease",
            "estimatedMcqCount":12,"estimatedFlashcardCount":8,"sourceReference":"Nelson ch. 450"}"#,
        );

        let result = classifier(backend).classify("text", &taxonomy()).await.unwrap();
        assert!(!result.is_new_chapter);
        assert_eq!(result.estimated_mcq_count, 12);
    }

    #[tokio::test]
    async fn empty_taxonomy_yields_new_chapter() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_response(
            r#"{"suggestedTopic":"Neonatology","suggestedChapter":"Jaundice",
            "estimatedMcqCount":5,"estimatedFlashcardCount":0,"sourceReference":"Lecture notes"}"#,
        );

        let result = classifier(backend).classify("text", &[]).await.unwrap();
        assert!(result.is_new_chapter);
    }

    #[tokio::test]
    async fn partial_output_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_response(r#"{"suggestedTopic":"Cardiology","estimatedMcqCount":3}"#);

        let err = classifier(backend).classify("text", &taxonomy()).await.unwrap_err();
        assert_eq!(err.code(), "CLASSIFICATION_FAILED");
    }

    #[tokio::test]
    async fn backend_error_becomes_classification_failure() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error("quota exceeded");

        let err = classifier(backend).classify("text", &[]).await.unwrap_err();
        assert!(matches!(err, QuizError::ClassificationFailed(msg) if msg.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn long_text_is_truncated_before_prompting() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_response("not json");
        let classifier = Classifier::new(backend.clone(), 10, Duration::from_secs(5));

        let text = "a".repeat(5_000);
        assert!(classifier.classify(&text, &[]).await.is_err());
        let prompts = backend.prompts();
        assert!(!prompts[0].1.contains(&"a".repeat(11)));
    }
}
