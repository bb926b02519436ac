//! Shared fixtures for integration tests
#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use pediaquiz::ai::ScriptedBackend;
use pediaquiz::ocr::PdfParser;
use pediaquiz::pipeline::{ApprovalRequest, JobStatus};
use pediaquiz::storage::models::ConfirmedCounts;
use pediaquiz::storage::{Database, LocalObjectStore, ObjectStore};
use pediaquiz::{AppConfig, AppContext};

pub const EVENT_TOKEN: &str = "test-event-token";

pub const SOURCE_TEXT: &str = "Bronchiolitis is the most common lower respiratory tract infection in infants. \
    Respiratory syncytial virus causes the majority of cases, peaking in winter. Management is supportive: \
    nasal suction, oxygen when saturations fall below 90 percent, and careful hydration.";

pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub ai: Arc<ScriptedBackend>,
    _objects: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let objects = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig::default();
        config.server.event_token = EVENT_TOKEN.to_string();
        config.storage.objects_dir = objects.path().to_string_lossy().into_owned();

        let db = Database::in_memory().await.expect("in-memory database");
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(objects.path()));
        let ai = Arc::new(ScriptedBackend::new());
        let ctx = AppContext::assemble(config, db, store, Arc::new(PdfParser::new(20)), ai.clone())
            .expect("assemble context");

        Self {
            ctx: Arc::new(ctx),
            ai,
            _objects: objects,
        }
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    /// 写入上传文件并触发上传事件，返回任务 id
    pub async fn upload(&self, uid: &str, file: &str, content_type: &str, body: &str) -> String {
        let path = format!("uploads/{}/{}", uid, file);
        self.ctx.store.write(&path, body.as_bytes()).await.expect("write upload");
        let (job, created) = self
            .ctx
            .pipeline
            .on_object_finalized(&path, content_type)
            .await
            .expect("object finalized");
        assert!(created);
        job.id
    }

    /// 上传并跑完 OCR，任务处于 processed
    pub async fn processed_job(&self, file: &str) -> String {
        let job_id = self.upload("learner-1", file, "text/plain", SOURCE_TEXT).await;
        let job = self.ctx.pipeline.run_ocr(&job_id).await.expect("ocr");
        assert_eq!(job.status, JobStatus::Processed);
        job_id
    }

    /// 推进到 pending-review，暂存 `mcqs` 道题和 `cards` 张闪卡
    pub async fn review_job(&self, file: &str, mcqs: usize, cards: usize) -> String {
        let job_id = self.processed_job(file).await;
        self.ai.push_response(classification("Pulmonology", "Bronchiolitis").to_string());
        self.ctx.pipeline.suggest_metrics(&job_id).await.expect("metrics");

        self.ai.push_response(generation(mcqs, cards).to_string());
        self.ctx
            .pipeline
            .generate_content(&job_id, &counts(mcqs as u32, cards as u32))
            .await
            .expect("generate");
        job_id
    }
}

pub fn classification(topic: &str, chapter: &str) -> Value {
    json!({
        "suggestedTopic": topic,
        "suggestedChapter": chapter,
        "estimatedMcqCount": 4,
        "estimatedFlashcardCount": 2,
        "sourceReference": "Ward notes"
    })
}

pub fn generation(mcqs: usize, cards: usize) -> Value {
    json!({
        "mcqs": (0..mcqs).map(|i| json!({
            "question": format!("Most common cause of bronchiolitis #{}?", i),
            "options": ["RSV", "Adenovirus", "Influenza", "Rhinovirus"],
            "answer": "A",
            "explanation": "RSV causes most cases."
        })).collect::<Vec<_>>(),
        "flashcards": (0..cards).map(|i| json!({
            "front": format!("Bronchiolitis peak season #{}", i),
            "back": "Winter"
        })).collect::<Vec<_>>(),
    })
}

pub fn counts(mcq_count: u32, flashcard_count: u32) -> ConfirmedCounts {
    ConfirmedCounts {
        topic: "Pulmonology".into(),
        chapter: "Bronchiolitis".into(),
        mcq_count,
        flashcard_count,
        source_citation: None,
    }
}

pub fn approval(job_id: &str, topic: &str, chapter: &str) -> ApprovalRequest {
    ApprovalRequest {
        job_id: job_id.to_string(),
        topic: topic.to_string(),
        chapter: chapter.to_string(),
        mcqs: None,
        flashcards: None,
    }
}
