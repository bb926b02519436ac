use chrono::Utc;
use sqlx::Row;
use std::collections::HashMap;

use super::database::Database;
use super::models::AttemptRecord;
use crate::utils::{QuizError, QuizResult};

impl Database {
    /// 记录作答；答错时累加连续错误次数，答对清零
    pub async fn record_attempt(
        &self,
        uid: &str,
        mcq_id: &str,
        is_correct: bool,
        selected_answer: Option<&str>,
    ) -> QuizResult<AttemptRecord> {
        if !self.mcq_exists(mcq_id).await? {
            return Err(QuizError::NotFound(format!("MCQ {}", mcq_id)));
        }

        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO attempts (uid, mcq_id, is_correct, selected_answer, incorrect_streak, last_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(uid, mcq_id) DO UPDATE SET
                is_correct = excluded.is_correct,
                selected_answer = excluded.selected_answer,
                incorrect_streak = CASE WHEN excluded.is_correct THEN 0 ELSE attempts.incorrect_streak + 1 END,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(uid)
        .bind(mcq_id)
        .bind(is_correct)
        .bind(selected_answer)
        .bind(if is_correct { 0_i64 } else { 1_i64 })
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let attempts = self.attempts_for(uid).await?;
        attempts
            .get(mcq_id)
            .cloned()
            .ok_or_else(|| QuizError::Internal(format!("作答记录写入后丢失: {}", mcq_id)))
    }

    pub async fn attempts_for(&self, uid: &str) -> QuizResult<HashMap<String, AttemptRecord>> {
        let rows = sqlx::query(
            "SELECT mcq_id, is_correct, selected_answer, incorrect_streak, last_seen FROM attempts WHERE uid = ?",
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        let mut attempts = HashMap::with_capacity(rows.len());
        for row in rows {
            let streak: i64 = row.try_get("incorrect_streak")?;
            attempts.insert(
                row.try_get("mcq_id")?,
                AttemptRecord {
                    is_correct: row.try_get("is_correct")?,
                    selected_answer: row.try_get("selected_answer")?,
                    incorrect_streak: streak.max(0) as u32,
                    last_seen: Some(row.try_get("last_seen")?),
                },
            );
        }
        Ok(attempts)
    }
}
