use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pipeline::state::JobStatus;

/// 正确答案字母，对应 options 下标 0..=3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerLetter {
    A,
    B,
    C,
    D,
}

impl AnswerLetter {
    pub fn index(self) -> usize {
        match self {
            AnswerLetter::A => 0,
            AnswerLetter::B => 1,
            AnswerLetter::C => 2,
            AnswerLetter::D => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnswerLetter::A => "A",
            AnswerLetter::B => "B",
            AnswerLetter::C => "C",
            AnswerLetter::D => "D",
        }
    }
}

impl FromStr for AnswerLetter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" => Ok(AnswerLetter::A),
            "B" => Ok(AnswerLetter::B),
            "C" => Ok(AnswerLetter::C),
            "D" => Ok(AnswerLetter::D),
            other => Err(format!("答案必须是 A/B/C/D 之一，实际为 {:?}", other)),
        }
    }
}

impl fmt::Display for AnswerLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mcq {
    pub id: String,
    pub question: String,
    pub options: [String; 4],
    pub answer: AnswerLetter,
    pub explanation: Option<String>,
    pub topic: String,
    pub chapter: String,
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub topic: String,
    pub chapter: String,
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 已校验的 MCQ 草稿（尚未分配 id/topic/chapter）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McqDraft {
    pub question: String,
    pub options: [String; 4],
    pub answer: AnswerLetter,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
}

/// 未经校验的 MCQ 草稿，来自 AI 输出或管理员编辑
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMcqDraft {
    pub question: Option<String>,
    pub options: Option<Vec<String>>,
    pub answer: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFlashcardDraft {
    pub front: Option<String>,
    pub back: Option<String>,
}

fn non_empty(field: &str, value: Option<String>) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("缺少字段 {}", field)),
    }
}

impl RawMcqDraft {
    /// 校验为 [`McqDraft`]，`require_explanation` 为 false 时允许解释为空
    pub fn validate(self, require_explanation: bool) -> Result<McqDraft, String> {
        let question = non_empty("question", self.question)?;
        let options = self.options.ok_or_else(|| "缺少字段 options".to_string())?;
        if options.len() != 4 {
            return Err(format!("options 必须恰好 4 项，实际 {} 项", options.len()));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err("options 不能包含空选项".to_string());
        }
        let answer: AnswerLetter = self
            .answer
            .as_deref()
            .ok_or_else(|| "缺少字段 answer".to_string())?
            .parse()?;
        let explanation = if require_explanation {
            non_empty("explanation", self.explanation)?
        } else {
            self.explanation.unwrap_or_default().trim().to_string()
        };

        let options: [String; 4] = options
            .into_iter()
            .map(|o| o.trim().to_string())
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| "options 必须恰好 4 项".to_string())?;

        Ok(McqDraft { question, options, answer, explanation })
    }
}

impl RawFlashcardDraft {
    pub fn validate(self) -> Result<FlashcardDraft, String> {
        Ok(FlashcardDraft {
            front: non_empty("front", self.front)?,
            back: non_empty("back", self.back)?,
        })
    }
}

/// 主题及其章节名（分类体系）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    pub name: String,
    pub chapters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    pub name: String,
    pub mcq_count: u64,
}

/// 读取时计算章节数与题目数，不落库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub name: String,
    pub chapters: Vec<ChapterSummary>,
    pub chapter_count: usize,
    pub total_mcq_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub topics: Vec<TopicSummary>,
    pub mcqs: Vec<Mcq>,
    pub flashcards: Vec<Flashcard>,
}

/// 学习者对单题的最近一次作答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub is_correct: bool,
    #[serde(default)]
    pub selected_answer: Option<String>,
    #[serde(default)]
    pub incorrect_streak: u32,
    /// 毫秒时间戳
    #[serde(default)]
    pub last_seen: Option<i64>,
}

/// 分类器建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub suggested_topic: String,
    pub suggested_chapter: String,
    pub is_new_chapter: bool,
    pub estimated_mcq_count: u32,
    pub estimated_flashcard_count: u32,
    pub source_reference: String,
}

/// 管理员确认的生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedCounts {
    pub topic: String,
    pub chapter: String,
    pub mcq_count: u32,
    pub flashcard_count: u32,
    pub source_citation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedContent {
    pub mcqs: Vec<McqDraft>,
    pub flashcards: Vec<FlashcardDraft>,
}

/// 单次上传的流水线状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: String,
    pub uid: String,
    pub file_name: String,
    pub original_file_path: String,
    pub content_type: String,
    pub extracted_text: Option<String>,
    pub status: JobStatus,
    /// 出错前最后一个稳定状态，重试时恢复到这里
    pub resume_status: JobStatus,
    pub suggestion: Option<Classification>,
    pub confirmed: Option<ConfirmedCounts>,
    pub staged_content: Option<StagedContent>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(options: Vec<&str>, answer: Option<&str>) -> RawMcqDraft {
        RawMcqDraft {
            question: Some("Most common cause of bronchiolitis?".into()),
            options: Some(options.into_iter().map(String::from).collect()),
            answer: answer.map(String::from),
            explanation: Some("RSV accounts for most cases.".into()),
        }
    }

    #[test]
    fn valid_draft_is_accepted() {
        let draft = raw(vec!["RSV", "Adenovirus", "Influenza", "Rhinovirus"], Some("A"))
            .validate(true)
            .unwrap();
        assert_eq!(draft.answer, AnswerLetter::A);
        assert_eq!(draft.options[draft.answer.index()], "RSV");
    }

    #[test]
    fn wrong_option_count_is_rejected() {
        let err = raw(vec!["RSV", "Adenovirus", "Influenza"], Some("A")).validate(true);
        assert!(err.is_err());
    }

    #[test]
    fn answer_outside_a_to_d_is_rejected() {
        assert!(raw(vec!["a", "b", "c", "d"], Some("E")).validate(true).is_err());
        assert!(raw(vec!["a", "b", "c", "d"], None).validate(true).is_err());
    }

    #[test]
    fn missing_explanation_only_matters_when_required() {
        let mut draft = raw(vec!["a", "b", "c", "d"], Some("C"));
        draft.explanation = None;
        assert!(draft.clone().validate(true).is_err());
        assert_eq!(draft.validate(false).unwrap().explanation, "");
    }

    #[test]
    fn flashcard_requires_both_sides() {
        let card = RawFlashcardDraft { front: Some("Koplik spots".into()), back: Some("  ".into()) };
        assert!(card.validate().is_err());
    }
}
