use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use anyhow::Result;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
const DEFAULT_EVENT_TOKEN: &str = "change-me";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub ocr: OcrConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// 对象存储事件回调所需的共享密钥
    pub event_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OcrConfig {
    pub batch_size: usize,
    pub min_text_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub objects_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier_char_limit: usize,
    pub generator_char_limit: usize,
    pub max_items_per_kind: u32,
    pub stage_timeout_secs: u64,
    pub sweep_cron: String,
    pub approval_max_attempts: u32,
}

impl ServerConfig {
    /// 事件令牌为空或仍是默认值
    pub fn event_token_is_default(&self) -> bool {
        self.event_token.trim().is_empty() || self.event_token == DEFAULT_EVENT_TOKEN
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// 配置文件（可选）之上叠加 `PEDIAQUIZ__SECTION__KEY` 环境变量
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PEDIAQUIZ")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.storage.database_path)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            event_token: DEFAULT_EVENT_TOKEN.to_string(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: "your-api-key".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.4,
            request_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            min_text_chars: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./data/pediaquiz.db".to_string(),
            objects_dir: "./data/objects".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_char_limit: 20_000,
            generator_char_limit: 20_000,
            max_items_per_kind: 50,
            stage_timeout_secs: 540,
            sweep_cron: "0 */2 * * * *".to_string(),
            approval_max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ocr.min_text_chars, 100);
        assert_eq!(config.pipeline.classifier_char_limit, 20_000);
    }

    #[test]
    fn default_event_token_is_flagged() {
        let mut server = ServerConfig::default();
        assert!(server.event_token_is_default());
        server.event_token = "  ".into();
        assert!(server.event_token_is_default());
        server.event_token = "s3cret-hook".into();
        assert!(!server.event_token_is_default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[ocr]\nbatch_size = 5\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.ocr.batch_size, 5);
        assert_eq!(config.ocr.min_text_chars, 100);
        assert_eq!(config.pipeline.approval_max_attempts, 3);
    }

    #[test]
    fn save_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut config = AppConfig::default();
        config.pipeline.max_items_per_kind = 12;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.pipeline.max_items_per_kind, 12);
    }
}
