use std::time::Duration;
use tracing::{error, info, warn};

use super::state::{JobAction, JobStatus};
use crate::storage::models::{FlashcardDraft, McqDraft, RawFlashcardDraft, RawMcqDraft};
use crate::storage::{ApprovalCommit, ApprovalOutcome, Database, JobPatch};
use crate::utils::{QuizError, QuizResult};

/// 管理员的审核决定：最终主题/章节，以及可选的人工修改
#[derive(Debug, Clone, Default)]
pub struct ApprovalRequest {
    pub job_id: String,
    pub topic: String,
    pub chapter: String,
    /// 为 None 时沿用任务上暂存的草稿
    pub mcqs: Option<Vec<RawMcqDraft>>,
    pub flashcards: Option<Vec<RawFlashcardDraft>>,
}

struct ValidatedEdits {
    topic: String,
    chapter: String,
    mcqs: Option<Vec<McqDraft>>,
    flashcards: Option<Vec<FlashcardDraft>>,
}

impl ApprovalRequest {
    fn validate(&self) -> QuizResult<ValidatedEdits> {
        let topic = self.topic.trim();
        let chapter = self.chapter.trim();
        if topic.is_empty() || chapter.is_empty() {
            return Err(QuizError::invalid("topic 和 chapter 不能为空"));
        }

        let mcqs = self
            .mcqs
            .as_ref()
            .map(|drafts| {
                drafts
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(i, d)| d.validate(false).map_err(|e| QuizError::invalid(format!("mcqs[{}]: {}", i, e))))
                    .collect::<QuizResult<Vec<_>>>()
            })
            .transpose()?;

        let flashcards = self
            .flashcards
            .as_ref()
            .map(|drafts| {
                drafts
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(i, d)| d.validate().map_err(|e| QuizError::invalid(format!("flashcards[{}]: {}", i, e))))
                    .collect::<QuizResult<Vec<_>>>()
            })
            .transpose()?;

        Ok(ValidatedEdits {
            topic: topic.to_string(),
            chapter: chapter.to_string(),
            mcqs,
            flashcards,
        })
    }
}

/// 审核门：把暂存内容原子地发布到内容库
pub struct ApprovalGate {
    db: Database,
    max_attempts: u32,
}

impl ApprovalGate {
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn approve(&self, request: &ApprovalRequest) -> QuizResult<ApprovalOutcome> {
        let edits = request.validate()?;

        let job = self.db.get_job(&request.job_id).await?;
        if job.status != JobStatus::PendingReview {
            return Err(QuizError::FailedPrecondition(format!(
                "任务 {} 当前状态为 {}，只有 {} 可以审核",
                job.id,
                job.status,
                JobStatus::PendingReview
            )));
        }

        let staged = job.staged_content.unwrap_or_default();
        let commit = ApprovalCommit {
            job_id: job.id.clone(),
            topic: edits.topic,
            chapter: edits.chapter,
            mcqs: edits.mcqs.unwrap_or(staged.mcqs),
            flashcards: edits.flashcards.unwrap_or(staged.flashcards),
        };
        if commit.mcqs.is_empty() && commit.flashcards.is_empty() {
            return Err(QuizError::invalid("没有可发布的题目或闪卡"));
        }

        match self.commit_with_retry(&commit).await {
            Ok(outcome) => {
                info!(
                    "任务 {} 已发布到 {} / {}: MCQ {} 道, 闪卡 {} 张{}",
                    commit.job_id,
                    commit.topic,
                    commit.chapter,
                    outcome.mcq_ids.len(),
                    outcome.flashcard_ids.len(),
                    if outcome.new_chapter { " (新章节)" } else { "" }
                );
                Ok(outcome)
            }
            // 并发审核已抢先完成，任务不再处于待审核状态
            Err(e @ QuizError::FailedPrecondition(_)) => Err(e),
            Err(e) => {
                error!("任务 {} 审核提交失败: {}", commit.job_id, e);
                let patch = JobPatch::error(format!("审核提交失败: {}", e));
                if let Err(mark_err) = self
                    .db
                    .transition_job(&commit.job_id, JobStatus::PendingReview, JobAction::Fail, patch)
                    .await
                {
                    warn!("任务 {} 无法标记为 error: {}", commit.job_id, mark_err);
                }
                Err(QuizError::TransactionFailed(e.to_string()))
            }
        }
    }

    /// 仅在 SQLite 锁冲突时重试整个事务
    async fn commit_with_retry(&self, commit: &ApprovalCommit) -> QuizResult<ApprovalOutcome> {
        let mut attempt = 1;
        loop {
            match self.db.commit_approval(commit).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_lock_conflict() && attempt < self.max_attempts => {
                    warn!("任务 {} 审核事务锁冲突，第 {} 次重试", commit.job_id, attempt);
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(topic: &str, chapter: &str) -> ApprovalRequest {
        ApprovalRequest {
            job_id: "job".into(),
            topic: topic.into(),
            chapter: chapter.into(),
            ..ApprovalRequest::default()
        }
    }

    #[test]
    fn blank_topic_is_invalid() {
        let err = request("  ", "Exanthems").validate().err().unwrap();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn edited_drafts_are_validated() {
        let mut req = request("Infectious Diseases", "Exanthems");
        req.mcqs = Some(vec![RawMcqDraft {
            question: Some("Q?".into()),
            options: Some(vec!["a".into(), "b".into(), "c".into(), "d".into()]),
            answer: Some("F".into()),
            explanation: None,
        }]);
        let err = req.validate().err().unwrap();
        assert!(matches!(err, QuizError::InvalidArgument(msg) if msg.starts_with("mcqs[0]")));
    }

    #[test]
    fn names_are_trimmed() {
        let edits = request(" Cardiology ", " Arrhythmias").validate().ok().unwrap();
        assert_eq!(edits.topic, "Cardiology");
        assert_eq!(edits.chapter, "Arrhythmias");
        assert!(edits.mcqs.is_none());
    }
}
