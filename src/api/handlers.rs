use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info};

use super::error::ApiResult;
use super::extract::{Admin, Caller, EventSource, RpcJson};
use super::AppState;
use crate::pipeline::{ApprovalRequest, JobStatus};
use crate::storage::models::{
    AppData, AttemptRecord, Classification, ConfirmedCounts, GenerationJob, RawFlashcardDraft, RawMcqDraft,
    StagedContent,
};
use crate::utils::QuizError;
use crate::weakness::assemble_weakness_test;

pub const DEFAULT_TEST_SIZE: u32 = 20;
pub const MAX_TEST_SIZE: u32 = 200;

fn require_id<'a>(field: &str, value: &'a str) -> Result<&'a str, QuizError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QuizError::invalid(format!("{} 不能为空", field)));
    }
    Ok(value)
}

// ---- 请求/响应类型 ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFinalizedRequest {
    pub path: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub job_id: String,
    pub mcq_count: u32,
    pub flashcard_count: u32,
    pub topic: String,
    pub chapter: String,
    #[serde(default)]
    pub source_citation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveContentRequest {
    pub job_id: String,
    pub topic: String,
    pub chapter: String,
    #[serde(default)]
    pub mcqs: Option<Vec<RawMcqDraft>>,
    #[serde(default)]
    pub flashcards: Option<Vec<RawFlashcardDraft>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Mcq,
    Flashcard,
}

#[derive(Debug, Deserialize)]
pub struct DeleteContentRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessTestRequest {
    #[serde(default)]
    pub attempted: Option<HashMap<String, AttemptRecord>>,
    #[serde(default)]
    pub test_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAttemptRequest {
    pub mcq_id: String,
    pub is_correct: bool,
    #[serde(default)]
    pub selected_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationRequest {
    pub mcq_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceRequest {
    #[serde(default)]
    pub strong_topics: Vec<String>,
    #[serde(default)]
    pub weak_topics: Vec<String>,
    pub overall_accuracy: f64,
}

/// 管理队列中展示的任务（不含提取全文）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub uid: String,
    pub file_name: String,
    pub content_type: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub suggestion: Option<Classification>,
    pub confirmed: Option<ConfirmedCounts>,
    pub staged_content: Option<StagedContent>,
    pub extracted_chars: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<GenerationJob> for JobView {
    fn from(job: GenerationJob) -> Self {
        Self {
            extracted_chars: job.extracted_text.as_deref().map_or(0, |t| t.chars().count()),
            id: job.id,
            uid: job.uid,
            file_name: job.file_name,
            content_type: job.content_type,
            status: job.status,
            error: job.error,
            suggestion: job.suggestion,
            confirmed: job.confirmed,
            staged_content: job.staged_content,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ---- 处理函数 ----

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 上传完成事件：建任务并在后台执行 OCR
pub async fn object_finalized(
    State(state): State<AppState>,
    _source: EventSource,
    RpcJson(req): RpcJson<ObjectFinalizedRequest>,
) -> ApiResult<Json<Value>> {
    let path = require_id("path", &req.path)?;
    let (job, created) = state.pipeline.on_object_finalized(path, req.content_type.trim()).await?;

    if created {
        let pipeline = state.pipeline.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_ocr(&job_id).await {
                error!("任务 {} OCR 阶段失败: {}", job_id, e);
            }
        });
    }

    Ok(Json(json!({ "jobId": job.id, "created": created })))
}

pub async fn suggest_content_metrics(
    State(state): State<AppState>,
    Admin(caller): Admin,
    RpcJson(req): RpcJson<JobRequest>,
) -> ApiResult<Json<Classification>> {
    let job_id = require_id("jobId", &req.job_id)?;
    info!("{} 请求任务 {} 的分类建议", caller.uid, job_id);
    Ok(Json(state.pipeline.suggest_metrics(job_id).await?))
}

pub async fn generate_content(
    State(state): State<AppState>,
    Admin(caller): Admin,
    RpcJson(req): RpcJson<GenerateContentRequest>,
) -> ApiResult<Json<Value>> {
    let job_id = require_id("jobId", &req.job_id)?;
    let confirmed = state.pipeline.validate_counts(&ConfirmedCounts {
        topic: req.topic,
        chapter: req.chapter,
        mcq_count: req.mcq_count,
        flashcard_count: req.flashcard_count,
        source_citation: req.source_citation,
    })?;
    info!("{} 确认任务 {} 的生成数量", caller.uid, job_id);

    let staged = state.pipeline.generate_content(job_id, &confirmed).await?;
    Ok(Json(json!({
        "mcqCount": staged.mcqs.len(),
        "flashcardCount": staged.flashcards.len(),
    })))
}

pub async fn approve_content(
    State(state): State<AppState>,
    Admin(caller): Admin,
    RpcJson(req): RpcJson<ApproveContentRequest>,
) -> ApiResult<Json<Value>> {
    let job_id = require_id("jobId", &req.job_id)?;
    let request = ApprovalRequest {
        job_id: job_id.to_string(),
        topic: req.topic,
        chapter: req.chapter,
        mcqs: req.mcqs,
        flashcards: req.flashcards,
    };
    info!("{} 审核任务 {}", caller.uid, job_id);

    let outcome = state.pipeline.approve(&request).await?;
    Ok(Json(json!({
        "mcqCount": outcome.mcq_ids.len(),
        "flashcardCount": outcome.flashcard_ids.len(),
        "newTopic": outcome.new_topic,
        "newChapter": outcome.new_chapter,
    })))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Admin(_): Admin,
    RpcJson(req): RpcJson<JobRequest>,
) -> ApiResult<Json<Value>> {
    let job_id = require_id("jobId", &req.job_id)?;
    let job = state.pipeline.retry_job(job_id).await?;

    // 回到 pending_ocr 时没有新的上传事件，需要在这里重新触发 OCR
    if job.status == JobStatus::PendingOcr {
        let pipeline = state.pipeline.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_ocr(&job_id).await {
                error!("任务 {} 重试 OCR 失败: {}", job_id, e);
            }
        });
    }

    Ok(Json(json!({ "jobId": job.id, "status": job.status })))
}

pub async fn list_pending_jobs(State(state): State<AppState>, Admin(_): Admin) -> ApiResult<Json<Value>> {
    let jobs: Vec<JobView> = state
        .pipeline
        .pending_jobs()
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    Ok(Json(json!({ "jobs": jobs })))
}

pub async fn delete_content_item(
    State(state): State<AppState>,
    Admin(caller): Admin,
    RpcJson(req): RpcJson<DeleteContentRequest>,
) -> ApiResult<Json<Value>> {
    let id = require_id("id", &req.id)?;
    let label = match req.kind {
        ContentKind::Mcq => {
            state.db.delete_mcq(id).await?;
            "MCQ"
        }
        ContentKind::Flashcard => {
            state.db.delete_flashcard(id).await?;
            "Flashcard"
        }
    };
    info!("{} 删除了 {} {}", caller.uid, label, id);
    Ok(Json(json!({
        "success": true,
        "message": format!("{} {} deleted", label, id),
    })))
}

pub async fn generate_weakness_based_test(
    State(state): State<AppState>,
    caller: Caller,
    RpcJson(req): RpcJson<WeaknessTestRequest>,
) -> ApiResult<Json<Value>> {
    let test_size = req.test_size.unwrap_or(DEFAULT_TEST_SIZE);
    if !(1..=MAX_TEST_SIZE).contains(&test_size) {
        return Err(QuizError::invalid(format!("testSize 必须在 1 到 {} 之间", MAX_TEST_SIZE)).into());
    }

    let attempts = match req.attempted {
        Some(attempted) => attempted,
        None => state.db.attempts_for(&caller.uid).await?,
    };
    let pool = state.db.list_mcqs().await?;

    let mcq_ids = assemble_weakness_test(&attempts, &pool, test_size as usize, &mut rand::thread_rng());
    info!("{} 薄弱点测验: {} 题", caller.uid, mcq_ids.len());
    Ok(Json(json!({ "mcqIds": mcq_ids })))
}

pub async fn record_attempt(
    State(state): State<AppState>,
    caller: Caller,
    RpcJson(req): RpcJson<RecordAttemptRequest>,
) -> ApiResult<Json<Value>> {
    let mcq_id = require_id("mcqId", &req.mcq_id)?;
    let selected = req.selected_answer.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(letter) = selected {
        letter
            .parse::<crate::storage::models::AnswerLetter>()
            .map_err(QuizError::InvalidArgument)?;
    }

    state.db.record_attempt(&caller.uid, mcq_id, req.is_correct, selected).await?;
    Ok(Json(json!({})))
}

pub async fn generate_mcq_explanation(
    State(state): State<AppState>,
    _caller: Caller,
    RpcJson(req): RpcJson<ExplanationRequest>,
) -> ApiResult<Json<Value>> {
    let mcq_id = require_id("mcqId", &req.mcq_id)?;
    let (explanation, cached) = state.explainer.get_or_generate_explanation(mcq_id).await?;
    Ok(Json(json!({ "explanation": explanation, "cached": cached })))
}

pub async fn generate_performance_advice(
    State(state): State<AppState>,
    _caller: Caller,
    RpcJson(req): RpcJson<AdviceRequest>,
) -> ApiResult<Json<Value>> {
    let advice = state
        .explainer
        .performance_advice(&req.strong_topics, &req.weak_topics, req.overall_accuracy)
        .await?;
    Ok(Json(json!({ "advice": advice })))
}

pub async fn get_app_data(State(state): State<AppState>, _caller: Caller) -> ApiResult<Json<AppData>> {
    Ok(Json(state.db.app_data().await?))
}
