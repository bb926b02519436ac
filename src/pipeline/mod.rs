pub mod classifier;
pub mod generator;
pub mod review;
pub mod state;

pub use classifier::Classifier;
pub use generator::ContentGenerator;
pub use review::{ApprovalGate, ApprovalRequest};
pub use state::{JobAction, JobStatus};

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai::GenerativeBackend;
use crate::config::{OcrConfig, PipelineConfig};
use crate::ocr::{OcrBackend, OcrExtractor};
use crate::storage::models::{Classification, ConfirmedCounts, GenerationJob, StagedContent};
use crate::storage::objects::parse_upload_path;
use crate::storage::{ApprovalOutcome, Database, JobPatch, ObjectStore};
use crate::utils::{QuizError, QuizResult};

/// 生成流水线：各阶段都以任务当前状态为前置条件
pub struct Pipeline {
    db: Database,
    ocr: OcrExtractor,
    classifier: Classifier,
    generator: ContentGenerator,
    gate: ApprovalGate,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        ocr_backend: Arc<dyn OcrBackend>,
        ai: Arc<dyn GenerativeBackend>,
        ocr_config: &OcrConfig,
        config: PipelineConfig,
    ) -> QuizResult<Self> {
        let timeout = config.stage_timeout();
        Ok(Self {
            ocr: OcrExtractor::new(store, ocr_backend, ocr_config.min_text_chars)?,
            classifier: Classifier::new(ai.clone(), config.classifier_char_limit, timeout),
            generator: ContentGenerator::new(ai, config.generator_char_limit, timeout),
            gate: ApprovalGate::new(db.clone(), config.approval_max_attempts),
            db,
            config,
        })
    }

    /// 上传完成事件：创建 pending_ocr 任务。重复投递返回已有任务，第二个值为 false
    pub async fn on_object_finalized(&self, path: &str, content_type: &str) -> QuizResult<(GenerationJob, bool)> {
        let (uid, file_name) = parse_upload_path(path)?;
        let now = Utc::now();
        let job = GenerationJob {
            id: Uuid::new_v4().to_string(),
            uid,
            file_name,
            original_file_path: path.to_string(),
            content_type: content_type.to_string(),
            extracted_text: None,
            status: JobStatus::PendingOcr,
            resume_status: JobStatus::PendingOcr,
            suggestion: None,
            confirmed: None,
            staged_content: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let (job, created) = self.db.insert_job_if_absent(&job).await?;
        if created {
            info!("[upload] 新建任务 {}: {} ({})", job.id, path, content_type);
        } else {
            info!("[upload] 重复的上传事件，沿用任务 {}", job.id);
        }
        Ok((job, created))
    }

    /// OCR 阶段；任务不在 pending_ocr 时视为重复触发，直接返回
    pub async fn run_ocr(&self, job_id: &str) -> QuizResult<GenerationJob> {
        let job = self.db.get_job(job_id).await?;
        if job.status != JobStatus::PendingOcr {
            info!("[ocr] 任务 {} 状态为 {}，跳过", job_id, job.status);
            return Ok(job);
        }

        match self.ocr.extract(job_id, &job.original_file_path, &job.content_type).await {
            Ok(text) => {
                let patch = JobPatch {
                    extracted_text: Some(text),
                    ..JobPatch::default()
                };
                let job = self
                    .db
                    .transition_job(job_id, JobStatus::PendingOcr, JobAction::OcrSucceeded, patch)
                    .await?;
                info!("[ocr] 任务 {} 完成", job_id);
                Ok(job)
            }
            Err(e) => Err(self.fail_job(job_id, JobStatus::PendingOcr, "ocr", e).await),
        }
    }

    /// 请求分类建议：processed -> generating-metrics -> pending-generation
    pub async fn suggest_metrics(&self, job_id: &str) -> QuizResult<Classification> {
        let job = self
            .db
            .transition_job(job_id, JobStatus::Processed, JobAction::RequestMetrics, JobPatch::default())
            .await?;
        info!("[metrics] 任务 {} 开始分类", job_id);

        let result = match job.extracted_text.as_deref() {
            Some(text) => match self.db.list_topics().await {
                Ok(taxonomy) => self.classifier.classify(text, &taxonomy).await,
                Err(e) => Err(e),
            },
            None => Err(QuizError::ClassificationFailed("任务没有提取文本".to_string())),
        };

        match result {
            Ok(classification) => {
                let patch = JobPatch {
                    suggestion: Some(classification.clone()),
                    ..JobPatch::default()
                };
                self.db
                    .transition_job(job_id, JobStatus::GeneratingMetrics, JobAction::MetricsReady, patch)
                    .await?;
                info!(
                    "[metrics] 任务 {} 建议 {} / {} (MCQ {}, 闪卡 {})",
                    job_id,
                    classification.suggested_topic,
                    classification.suggested_chapter,
                    classification.estimated_mcq_count,
                    classification.estimated_flashcard_count
                );
                Ok(classification)
            }
            Err(e) => Err(self.fail_job(job_id, JobStatus::GeneratingMetrics, "metrics", e).await),
        }
    }

    /// 校验确认的数量；不访问存储
    pub fn validate_counts(&self, confirmed: &ConfirmedCounts) -> QuizResult<ConfirmedCounts> {
        let topic = confirmed.topic.trim();
        let chapter = confirmed.chapter.trim();
        if topic.is_empty() || chapter.is_empty() {
            return Err(QuizError::invalid("topic 和 chapter 不能为空"));
        }
        let max = self.config.max_items_per_kind;
        if confirmed.mcq_count > max || confirmed.flashcard_count > max {
            return Err(QuizError::invalid(format!("每类数量不能超过 {}", max)));
        }
        if confirmed.mcq_count == 0 && confirmed.flashcard_count == 0 {
            return Err(QuizError::invalid("MCQ 与闪卡数量不能同时为 0"));
        }
        Ok(ConfirmedCounts {
            topic: topic.to_string(),
            chapter: chapter.to_string(),
            mcq_count: confirmed.mcq_count,
            flashcard_count: confirmed.flashcard_count,
            source_citation: confirmed
                .source_citation
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        })
    }

    /// 按确认数量生成草稿：pending-generation -> generating-content -> pending-review
    pub async fn generate_content(&self, job_id: &str, confirmed: &ConfirmedCounts) -> QuizResult<StagedContent> {
        let confirmed = self.validate_counts(confirmed)?;
        let patch = JobPatch {
            confirmed: Some(confirmed.clone()),
            ..JobPatch::default()
        };
        let job = self
            .db
            .transition_job(job_id, JobStatus::PendingGeneration, JobAction::StartGeneration, patch)
            .await?;
        info!("[generate] 任务 {} 开始生成", job_id);

        let result = match job.extracted_text.as_deref() {
            Some(text) => self.generator.generate(text, &confirmed).await,
            None => Err(QuizError::GenerationFailed("任务没有提取文本".to_string())),
        };

        match result {
            Ok(staged) => {
                let patch = JobPatch {
                    staged_content: Some(staged.clone()),
                    ..JobPatch::default()
                };
                self.db
                    .transition_job(job_id, JobStatus::GeneratingContent, JobAction::ContentStaged, patch)
                    .await?;
                info!(
                    "[generate] 任务 {} 已暂存 MCQ {} 道, 闪卡 {} 张",
                    job_id,
                    staged.mcqs.len(),
                    staged.flashcards.len()
                );
                Ok(staged)
            }
            Err(e) => Err(self.fail_job(job_id, JobStatus::GeneratingContent, "generate", e).await),
        }
    }

    pub async fn approve(&self, request: &ApprovalRequest) -> QuizResult<ApprovalOutcome> {
        self.gate.approve(request).await
    }

    /// 手动重试：清除错误并回到出错前的稳定状态
    pub async fn retry_job(&self, job_id: &str) -> QuizResult<GenerationJob> {
        let job = self
            .db
            .transition_job(job_id, JobStatus::Error, JobAction::Retry, JobPatch::default())
            .await?;
        info!("[retry] 任务 {} 恢复到 {}", job_id, job.status);
        Ok(job)
    }

    pub async fn pending_jobs(&self) -> QuizResult<Vec<GenerationJob>> {
        self.db.list_pending_jobs().await
    }

    /// 把超时未完成的 AI 阶段标记为 error，返回处理的任务数
    pub async fn sweep_stale_jobs(&self) -> QuizResult<usize> {
        let timeout = chrono::Duration::from_std(self.config.stage_timeout())
            .map_err(|e| QuizError::Internal(format!("stage_timeout_secs 无效: {}", e)))?;
        let cutoff = Utc::now() - timeout;

        let mut swept = 0;
        for job in self.db.stale_in_flight_jobs(cutoff).await? {
            match self
                .db
                .transition_job(&job.id, job.status, JobAction::Fail, JobPatch::error("stage timed out"))
                .await
            {
                Ok(_) => {
                    warn!("[sweep] 任务 {} 在 {} 阶段超时", job.id, job.status);
                    swept += 1;
                }
                Err(QuizError::FailedPrecondition(_)) => {}
                Err(e) => error!("[sweep] 任务 {} 标记超时失败: {}", job.id, e),
            }
        }
        Ok(swept)
    }

    /// 记录阶段失败并返回原错误
    async fn fail_job(&self, job_id: &str, from: JobStatus, stage: &str, err: QuizError) -> QuizError {
        error!("[{}] 任务 {} 失败: {}", stage, job_id, err);
        if let Err(mark_err) = self
            .db
            .transition_job(job_id, from, JobAction::Fail, JobPatch::error(err.to_string()))
            .await
        {
            warn!("[{}] 任务 {} 无法标记为 error: {}", stage, job_id, mark_err);
        }
        err
    }
}
