use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::{ChatCompletionBackend, GenerativeBackend};
use crate::config::AppConfig;
use crate::explain::Explainer;
use crate::ocr::{OcrBackend, PdfParser};
use crate::pipeline::Pipeline;
use crate::storage::{Database, LocalObjectStore, ObjectStore};
use crate::utils::QuizResult;

/// 进程级依赖，启动时显式构建后传给各组件
pub struct AppContext {
    pub config: AppConfig,
    pub db: Database,
    pub store: Arc<dyn ObjectStore>,
    pub pipeline: Arc<Pipeline>,
    pub explainer: Explainer,
}

impl AppContext {
    /// 按配置连接数据库、对象存储与 AI 后端
    pub async fn from_config(config: AppConfig) -> QuizResult<Self> {
        tokio::fs::create_dir_all(&config.storage.objects_dir).await?;
        if let Some(parent) = Path::new(&config.storage.database_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Database::new(&config.database_url()).await?;
        db.init_schema().await?;

        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage.objects_dir));
        let ai = ChatCompletionBackend::new(config.ai.clone())?;
        if !ai.is_configured() {
            warn!("AI API key 未配置，分类、生成与解释功能将不可用");
        }
        if config.server.event_token_is_default() {
            warn!("server.event_token 仍为默认值，任何知道默认值的调用方都能投递上传事件");
        }
        let ocr: Arc<dyn OcrBackend> = Arc::new(PdfParser::new(config.ocr.batch_size));

        info!("对象存储目录: {}", config.storage.objects_dir);
        Self::assemble(config, db, store, ocr, Arc::new(ai))
    }

    /// 用给定的后端组装上下文（测试中替换为内存库与脚本化后端）
    pub fn assemble(
        config: AppConfig,
        db: Database,
        store: Arc<dyn ObjectStore>,
        ocr: Arc<dyn OcrBackend>,
        ai: Arc<dyn GenerativeBackend>,
    ) -> QuizResult<Self> {
        let pipeline = Pipeline::new(
            db.clone(),
            store.clone(),
            ocr,
            ai.clone(),
            &config.ocr,
            config.pipeline.clone(),
        )?;
        let explainer = Explainer::new(db.clone(), ai, config.pipeline.stage_timeout());

        Ok(Self {
            config,
            db,
            store,
            pipeline: Arc::new(pipeline),
            explainer,
        })
    }
}
