use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use uuid::Uuid;

use super::database::{parse_ts, to_ts, Database};
use super::jobs::{transition_job_on, JobPatch};
use super::models::{
    AnswerLetter, AppData, ChapterSummary, Flashcard, FlashcardDraft, Mcq, McqDraft, TopicRecord,
    TopicSummary,
};
use crate::pipeline::state::{JobAction, JobStatus};
use crate::utils::{QuizError, QuizResult};

/// 审核通过后要写入内容库的数据
#[derive(Debug, Clone)]
pub struct ApprovalCommit {
    pub job_id: String,
    pub topic: String,
    pub chapter: String,
    pub mcqs: Vec<McqDraft>,
    pub flashcards: Vec<FlashcardDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub mcq_ids: Vec<String>,
    pub flashcard_ids: Vec<String>,
    pub new_topic: bool,
    pub new_chapter: bool,
}

/// 章节名并入列表并排序；已存在时不修改，返回是否新增
pub fn merge_chapter(chapters: &mut Vec<String>, chapter: &str) -> bool {
    if chapters.iter().any(|c| c == chapter) {
        return false;
    }
    chapters.push(chapter.to_string());
    chapters.sort();
    true
}

fn mcq_from_row(row: &SqliteRow) -> QuizResult<Mcq> {
    let options_raw: String = row.try_get("options")?;
    let options: Vec<String> = serde_json::from_str(&options_raw)?;
    let options: [String; 4] = options
        .try_into()
        .map_err(|_| QuizError::Internal("MCQ 选项数量不是 4".to_string()))?;
    let answer: String = row.try_get("answer")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Mcq {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        options,
        answer: answer.parse::<AnswerLetter>().map_err(QuizError::Internal)?,
        explanation: row.try_get("explanation")?,
        topic: row.try_get("topic")?,
        chapter: row.try_get("chapter")?,
        source_job_id: row.try_get("source_job_id")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn flashcard_from_row(row: &SqliteRow) -> QuizResult<Flashcard> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Flashcard {
        id: row.try_get("id")?,
        front: row.try_get("front")?,
        back: row.try_get("back")?,
        topic: row.try_get("topic")?,
        chapter: row.try_get("chapter")?,
        source_job_id: row.try_get("source_job_id")?,
        created_at: parse_ts(&created_at)?,
    })
}

impl Database {
    pub async fn list_topics(&self) -> QuizResult<Vec<TopicRecord>> {
        let rows = sqlx::query("SELECT name, chapters FROM topics ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> QuizResult<TopicRecord> {
                let chapters: String = row.try_get("chapters")?;
                Ok(TopicRecord {
                    name: row.try_get("name")?,
                    chapters: serde_json::from_str(&chapters)?,
                })
            })
            .collect()
    }

    /// 主题列表及读取时计算的章节题数
    pub async fn topic_summaries(&self) -> QuizResult<Vec<TopicSummary>> {
        let topics = self.list_topics().await?;

        let counts = sqlx::query("SELECT topic, chapter, COUNT(*) AS n FROM mcqs GROUP BY topic, chapter")
            .fetch_all(&self.pool)
            .await?;
        let mut by_chapter: HashMap<(String, String), u64> = HashMap::new();
        for row in &counts {
            let n: i64 = row.try_get("n")?;
            by_chapter.insert((row.try_get("topic")?, row.try_get("chapter")?), n as u64);
        }

        let mut summaries: Vec<TopicSummary> = topics
            .into_iter()
            .map(|topic| {
                let mut chapters: Vec<ChapterSummary> = topic
                    .chapters
                    .iter()
                    .map(|name| ChapterSummary {
                        name: name.clone(),
                        mcq_count: by_chapter
                            .get(&(topic.name.clone(), name.clone()))
                            .copied()
                            .unwrap_or(0),
                    })
                    .collect();
                chapters.sort_by(|a, b| a.name.cmp(&b.name));
                TopicSummary {
                    chapter_count: chapters.len(),
                    total_mcq_count: chapters.iter().map(|c| c.mcq_count).sum(),
                    name: topic.name,
                    chapters,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub async fn list_mcqs(&self) -> QuizResult<Vec<Mcq>> {
        let rows = sqlx::query("SELECT * FROM mcqs ORDER BY topic, chapter, created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(mcq_from_row).collect()
    }

    pub async fn list_flashcards(&self) -> QuizResult<Vec<Flashcard>> {
        let rows = sqlx::query("SELECT * FROM flashcards ORDER BY topic, chapter, created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(flashcard_from_row).collect()
    }

    pub async fn mcqs_by_source_job(&self, job_id: &str) -> QuizResult<Vec<Mcq>> {
        let rows = sqlx::query("SELECT * FROM mcqs WHERE source_job_id = ? ORDER BY created_at")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(mcq_from_row).collect()
    }

    pub async fn app_data(&self) -> QuizResult<AppData> {
        Ok(AppData {
            topics: self.topic_summaries().await?,
            mcqs: self.list_mcqs().await?,
            flashcards: self.list_flashcards().await?,
        })
    }

    pub async fn get_mcq(&self, id: &str) -> QuizResult<Mcq> {
        let row = sqlx::query("SELECT * FROM mcqs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QuizError::NotFound(format!("MCQ {}", id)))?;
        mcq_from_row(&row)
    }

    pub async fn mcq_exists(&self, id: &str) -> QuizResult<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mcqs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// 仅在解释为空时写回，返回是否写入
    pub async fn set_explanation_if_absent(&self, id: &str, explanation: &str) -> QuizResult<bool> {
        let result = sqlx::query(
            "UPDATE mcqs SET explanation = ? WHERE id = ? AND (explanation IS NULL OR explanation = '')",
        )
        .bind(explanation)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_mcq(&self, id: &str) -> QuizResult<()> {
        let result = sqlx::query("DELETE FROM mcqs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QuizError::NotFound(format!("MCQ {}", id)));
        }
        Ok(())
    }

    pub async fn delete_flashcard(&self, id: &str) -> QuizResult<()> {
        let result = sqlx::query("DELETE FROM flashcards WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QuizError::NotFound(format!("Flashcard {}", id)));
        }
        Ok(())
    }

    /// 单个事务内：任务置为 complete、合并章节、写入全部题目与卡片。
    /// 任一步失败则整体回滚，内容库保持调用前的状态。
    pub async fn commit_approval(&self, commit: &ApprovalCommit) -> QuizResult<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        match write_approval(&mut *tx, commit).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}

async fn write_approval(conn: &mut SqliteConnection, commit: &ApprovalCommit) -> QuizResult<ApprovalOutcome> {
    let patch = JobPatch {
        clear_staged: true,
        ..JobPatch::default()
    };
    transition_job_on(conn, &commit.job_id, JobStatus::PendingReview, JobAction::Approve, patch).await?;

    let now = Utc::now();
    let existing: Option<String> = sqlx::query_scalar("SELECT chapters FROM topics WHERE name = ?")
        .bind(&commit.topic)
        .fetch_optional(&mut *conn)
        .await?;

    let (new_topic, new_chapter) = match existing {
        None => {
            let chapters = vec![commit.chapter.clone()];
            sqlx::query("INSERT INTO topics (name, chapters, updated_at) VALUES (?, ?, ?)")
                .bind(&commit.topic)
                .bind(serde_json::to_string(&chapters)?)
                .bind(to_ts(now))
                .execute(&mut *conn)
                .await?;
            (true, true)
        }
        Some(raw) => {
            let mut chapters: Vec<String> = serde_json::from_str(&raw)?;
            let added = merge_chapter(&mut chapters, &commit.chapter);
            if added {
                sqlx::query("UPDATE topics SET chapters = ?, updated_at = ? WHERE name = ?")
                    .bind(serde_json::to_string(&chapters)?)
                    .bind(to_ts(now))
                    .bind(&commit.topic)
                    .execute(&mut *conn)
                    .await?;
            }
            (false, added)
        }
    };

    let mut mcq_ids = Vec::with_capacity(commit.mcqs.len());
    for draft in &commit.mcqs {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO mcqs (id, question, options, answer, explanation, topic, chapter, source_job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&draft.question)
        .bind(serde_json::to_string(&draft.options)?)
        .bind(draft.answer.as_str())
        .bind(Some(draft.explanation.as_str()).filter(|e| !e.is_empty()))
        .bind(&commit.topic)
        .bind(&commit.chapter)
        .bind(&commit.job_id)
        .bind(to_ts(now))
        .execute(&mut *conn)
        .await?;
        mcq_ids.push(id);
    }

    let mut flashcard_ids = Vec::with_capacity(commit.flashcards.len());
    for draft in &commit.flashcards {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO flashcards (id, front, back, topic, chapter, source_job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&draft.front)
        .bind(&draft.back)
        .bind(&commit.topic)
        .bind(&commit.chapter)
        .bind(&commit.job_id)
        .bind(to_ts(now))
        .execute(&mut *conn)
        .await?;
        flashcard_ids.push(id);
    }

    Ok(ApprovalOutcome {
        mcq_ids,
        flashcard_ids,
        new_topic,
        new_chapter,
    })
}
