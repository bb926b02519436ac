use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::json::parse_json_output;
use crate::ai::prompts::generation_prompt;
use crate::ai::{GenerativeBackend, OutputMode};
use crate::storage::models::{ConfirmedCounts, RawFlashcardDraft, RawMcqDraft, StagedContent};
use crate::utils::{truncate_chars, QuizError, QuizResult};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGeneration {
    mcqs: Option<Vec<RawMcqDraft>>,
    flashcards: Option<Vec<RawFlashcardDraft>>,
}

/// 解析并校验生成结果；数量必须与请求完全一致
fn validate_generation(raw: &str, confirmed: &ConfirmedCounts) -> Result<StagedContent, String> {
    let parsed: RawGeneration = parse_json_output(raw)?;
    let raw_mcqs = parsed.mcqs.unwrap_or_default();
    let raw_cards = parsed.flashcards.unwrap_or_default();

    if raw_mcqs.len() != confirmed.mcq_count as usize {
        return Err(format!("需要 {} 道 MCQ，实际返回 {} 道", confirmed.mcq_count, raw_mcqs.len()));
    }
    if raw_cards.len() != confirmed.flashcard_count as usize {
        return Err(format!(
            "需要 {} 张闪卡，实际返回 {} 张",
            confirmed.flashcard_count,
            raw_cards.len()
        ));
    }

    let citation = confirmed
        .source_citation
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let mut mcqs = Vec::with_capacity(raw_mcqs.len());
    for (i, raw) in raw_mcqs.into_iter().enumerate() {
        let mut draft = raw.validate(true).map_err(|e| format!("第 {} 道 MCQ 格式错误: {}", i + 1, e))?;
        if let Some(citation) = citation {
            draft.explanation = format!("{} (Source: {})", draft.explanation, citation);
        }
        mcqs.push(draft);
    }

    let flashcards = raw_cards
        .into_iter()
        .enumerate()
        .map(|(i, raw)| raw.validate().map_err(|e| format!("第 {} 张闪卡格式错误: {}", i + 1, e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StagedContent { mcqs, flashcards })
}

/// 按确认的数量生成 MCQ 与闪卡草稿
pub struct ContentGenerator {
    backend: Arc<dyn GenerativeBackend>,
    char_limit: usize,
    timeout: Duration,
}

impl ContentGenerator {
    pub fn new(backend: Arc<dyn GenerativeBackend>, char_limit: usize, timeout: Duration) -> Self {
        Self {
            backend,
            char_limit,
            timeout,
        }
    }

    pub async fn generate(&self, text: &str, confirmed: &ConfirmedCounts) -> QuizResult<StagedContent> {
        let excerpt = truncate_chars(text, self.char_limit);
        let prompt = generation_prompt(
            excerpt,
            &confirmed.topic,
            &confirmed.chapter,
            confirmed.mcq_count,
            confirmed.flashcard_count,
        );
        info!(
            "生成请求: {} / {}，MCQ {} 道，闪卡 {} 张",
            confirmed.topic, confirmed.chapter, confirmed.mcq_count, confirmed.flashcard_count
        );

        let raw = tokio::time::timeout(self.timeout, self.backend.generate(&prompt, OutputMode::Json))
            .await
            .map_err(|_| QuizError::GenerationFailed("AI 调用超时".to_string()))?
            .map_err(|e| QuizError::GenerationFailed(e.to_string()))?;

        validate_generation(&raw, confirmed).map_err(|e| {
            warn!("生成结果校验失败: {}", e);
            QuizError::GenerationFailed(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedBackend;
    use serde_json::json;

    fn confirmed(mcq_count: u32, flashcard_count: u32, citation: Option<&str>) -> ConfirmedCounts {
        ConfirmedCounts {
            topic: "Infectious Diseases".into(),
            chapter: "Exanthems".into(),
            mcq_count,
            flashcard_count,
            source_citation: citation.map(String::from),
        }
    }

    fn mcq(i: usize) -> serde_json::Value {
        json!({
            "question": format!("Question {}?", i),
            "options": ["Measles", "Rubella", "Roseola", "Fifth disease"],
            "answer": "A",
            "explanation": "Koplik spots are pathognomonic."
        })
    }

    fn output(mcqs: usize, cards: usize) -> serde_json::Value {
        json!({
            "mcqs": (0..mcqs).map(mcq).collect::<Vec<_>>(),
            "flashcards": (0..cards)
                .map(|i| json!({"front": format!("Front {}", i), "back": "Back"}))
                .collect::<Vec<_>>(),
        })
    }

    async fn run(raw: String, confirmed: &ConfirmedCounts) -> QuizResult<StagedContent> {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_response(raw);
        ContentGenerator::new(backend, 20_000, Duration::from_secs(5))
            .generate("source text", confirmed)
            .await
    }

    #[tokio::test]
    async fn exact_counts_are_staged() {
        let staged = run(output(7, 3).to_string(), &confirmed(7, 3, None)).await.unwrap();
        assert_eq!(staged.mcqs.len(), 7);
        assert_eq!(staged.flashcards.len(), 3);
    }

    #[tokio::test]
    async fn fewer_items_than_requested_is_a_failure() {
        let err = run(output(6, 3).to_string(), &confirmed(7, 3, None)).await.unwrap_err();
        assert_eq!(err.code(), "GENERATION_FAILED");
    }

    #[tokio::test]
    async fn missing_answer_is_rejected() {
        let mut value = output(2, 0);
        value["mcqs"][1].as_object_mut().unwrap().remove("answer");
        let err = run(value.to_string(), &confirmed(2, 0, None)).await.unwrap_err();
        assert!(matches!(err, QuizError::GenerationFailed(msg) if msg.contains("answer")));
    }

    #[tokio::test]
    async fn citation_is_appended_to_explanations() {
        let staged = run(output(2, 0).to_string(), &confirmed(2, 0, Some("Nelson 21e"))).await.unwrap();
        assert!(staged
            .mcqs
            .iter()
            .all(|m| m.explanation.ends_with("(Source: Nelson 21e)")));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let raw = format!("```json\n{}\n```", output(1, 1));
        let staged = run(raw, &confirmed(1, 1, None)).await.unwrap();
        assert_eq!(staged.mcqs[0].options[0], "Measles");
    }
}
