use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

use super::database::{from_json_column, parse_ts, to_json_column, to_ts, Database};
use super::models::{Classification, ConfirmedCounts, GenerationJob, StagedContent};
use crate::pipeline::state::{self, JobAction, JobStatus};
use crate::utils::{QuizError, QuizResult};

const JOB_COLUMNS: &str = "id, uid, file_name, original_file_path, content_type, extracted_text, \
     status, resume_status, suggestion, confirmed, staged_content, error, created_at, updated_at";

/// 随状态迁移一起写入的字段
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub extracted_text: Option<String>,
    pub suggestion: Option<Classification>,
    pub confirmed: Option<ConfirmedCounts>,
    pub staged_content: Option<StagedContent>,
    pub clear_staged: bool,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

fn job_from_row(row: &SqliteRow) -> QuizResult<GenerationJob> {
    let status: String = row.try_get("status")?;
    let resume_status: String = row.try_get("resume_status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(GenerationJob {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        file_name: row.try_get("file_name")?,
        original_file_path: row.try_get("original_file_path")?,
        content_type: row.try_get("content_type")?,
        extracted_text: row.try_get("extracted_text")?,
        status: status.parse()?,
        resume_status: resume_status.parse()?,
        suggestion: from_json_column(row.try_get("suggestion")?)?,
        confirmed: from_json_column(row.try_get("confirmed")?)?,
        staged_content: from_json_column(row.try_get("staged_content")?)?,
        error: row.try_get("error")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl Database {
    /// 按文件路径去重插入；重复投递的上传事件返回已有任务
    pub async fn insert_job_if_absent(&self, job: &GenerationJob) -> QuizResult<(GenerationJob, bool)> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs (
                id, uid, file_name, original_file_path, content_type, extracted_text,
                status, resume_status, suggestion, confirmed, staged_content, error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(original_file_path) DO NOTHING
            "#,
        )
        .bind(&job.id)
        .bind(&job.uid)
        .bind(&job.file_name)
        .bind(&job.original_file_path)
        .bind(&job.content_type)
        .bind(&job.extracted_text)
        .bind(job.status.as_str())
        .bind(job.resume_status.as_str())
        .bind(to_json_column(job.suggestion.as_ref())?)
        .bind(to_json_column(job.confirmed.as_ref())?)
        .bind(to_json_column(job.staged_content.as_ref())?)
        .bind(&job.error)
        .bind(to_ts(job.created_at))
        .bind(to_ts(job.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok((job.clone(), true));
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM generation_jobs WHERE original_file_path = ?",
            JOB_COLUMNS
        ))
        .bind(&job.original_file_path)
        .fetch_one(&self.pool)
        .await?;

        Ok((job_from_row(&row)?, false))
    }

    pub async fn get_job(&self, id: &str) -> QuizResult<GenerationJob> {
        let mut conn = self.pool.acquire().await?;
        fetch_job_on(&mut conn, id).await
    }

    /// 待处理队列：排除 complete，按创建时间倒序
    pub async fn list_pending_jobs(&self) -> QuizResult<Vec<GenerationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM generation_jobs WHERE status != ? ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Complete.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// 更新时间早于 cutoff 的进行中任务
    pub async fn stale_in_flight_jobs(&self, cutoff: DateTime<Utc>) -> QuizResult<Vec<GenerationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM generation_jobs WHERE status IN (?, ?) AND updated_at < ?",
            JOB_COLUMNS
        ))
        .bind(JobStatus::GeneratingMetrics.as_str())
        .bind(JobStatus::GeneratingContent.as_str())
        .bind(to_ts(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    pub async fn transition_job(
        &self,
        id: &str,
        from: JobStatus,
        action: JobAction,
        patch: JobPatch,
    ) -> QuizResult<GenerationJob> {
        let mut conn = self.pool.acquire().await?;
        transition_job_on(&mut conn, id, from, action, patch).await
    }
}

pub(crate) async fn fetch_job_on(conn: &mut SqliteConnection, id: &str) -> QuizResult<GenerationJob> {
    let row = sqlx::query(&format!("SELECT {} FROM generation_jobs WHERE id = ?", JOB_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| QuizError::NotFound(format!("生成任务 {}", id)))?;

    job_from_row(&row)
}

/// 以 status 作为乐观锁执行一次状态迁移。
///
/// 任务当前状态与 `from` 不一致时返回 `FailedPrecondition`，不写入任何字段；
/// 读取之后状态被并发修改时 UPDATE 命中 0 行，同样拒绝。
pub(crate) async fn transition_job_on(
    conn: &mut SqliteConnection,
    id: &str,
    from: JobStatus,
    action: JobAction,
    patch: JobPatch,
) -> QuizResult<GenerationJob> {
    let mut job = fetch_job_on(conn, id).await?;
    if job.status != from {
        return Err(QuizError::FailedPrecondition(format!(
            "任务 {} 当前状态为 {}，{} 需要 {}",
            id, job.status, action, from
        )));
    }

    let next = state::transition(from, action, job.resume_status)?;

    if let Some(text) = patch.extracted_text {
        job.extracted_text = Some(text);
    }
    if let Some(suggestion) = patch.suggestion {
        job.suggestion = Some(suggestion);
    }
    if let Some(confirmed) = patch.confirmed {
        job.confirmed = Some(confirmed);
    }
    if let Some(staged) = patch.staged_content {
        job.staged_content = Some(staged);
    }
    if patch.clear_staged {
        job.staged_content = None;
    }

    if next == JobStatus::Error {
        job.error = Some(patch.error.unwrap_or_else(|| "未知错误".to_string()));
        job.resume_status = from.resume_point();
        // 生成阶段失败时丢弃部分草稿
        if from == JobStatus::GeneratingContent {
            job.staged_content = None;
        }
    } else {
        job.error = None;
        job.resume_status = next.resume_point();
    }
    job.status = next;
    job.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE generation_jobs SET
            extracted_text = ?,
            status = ?,
            resume_status = ?,
            suggestion = ?,
            confirmed = ?,
            staged_content = ?,
            error = ?,
            updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(&job.extracted_text)
    .bind(job.status.as_str())
    .bind(job.resume_status.as_str())
    .bind(to_json_column(job.suggestion.as_ref())?)
    .bind(to_json_column(job.confirmed.as_ref())?)
    .bind(to_json_column(job.staged_content.as_ref())?)
    .bind(&job.error)
    .bind(to_ts(job.updated_at))
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!("任务 {} 状态已被并发修改，放弃 {}", id, action);
        return Err(QuizError::FailedPrecondition(format!("任务 {} 状态已被并发修改", id)));
    }

    debug!("任务 {}: {} -[{}]-> {}", id, from, action, next);
    Ok(job)
}
