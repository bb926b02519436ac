use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::utils::{QuizError, QuizResult};

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> QuizResult<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    /// 单连接内存库，连接不回收以保留数据
    pub async fn in_memory() -> QuizResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub async fn init_schema(&self) -> QuizResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                name TEXT PRIMARY KEY,
                chapters TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcqs (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                options TEXT NOT NULL,
                answer TEXT NOT NULL CHECK (answer IN ('A', 'B', 'C', 'D')),
                explanation TEXT,
                topic TEXT NOT NULL,
                chapter TEXT NOT NULL,
                source_job_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_mcqs_chapter ON mcqs (topic, chapter)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcards (
                id TEXT PRIMARY KEY,
                front TEXT NOT NULL CHECK (length(trim(front)) > 0),
                back TEXT NOT NULL CHECK (length(trim(back)) > 0),
                topic TEXT NOT NULL,
                chapter TEXT NOT NULL,
                source_job_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                file_name TEXT NOT NULL,
                original_file_path TEXT NOT NULL UNIQUE,
                content_type TEXT NOT NULL,
                extracted_text TEXT,
                status TEXT NOT NULL,
                resume_status TEXT NOT NULL,
                suggestion TEXT,
                confirmed TEXT,
                staged_content TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON generation_jobs (status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                uid TEXT NOT NULL,
                mcq_id TEXT NOT NULL,
                is_correct INTEGER NOT NULL,
                selected_answer TEXT,
                incorrect_streak INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL,
                PRIMARY KEY (uid, mcq_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// 定长 RFC3339（微秒、Z 后缀），保证字符串排序与时间顺序一致
pub(crate) fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> QuizResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| QuizError::Internal(format!("时间戳格式错误 {:?}: {}", raw, e)))
}

pub(crate) fn from_json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> QuizResult<Option<T>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(QuizError::from)
}

pub(crate) fn to_json_column<T: serde::Serialize>(value: Option<&T>) -> QuizResult<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(QuizError::from)
}
