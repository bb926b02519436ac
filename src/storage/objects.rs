use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::utils::{QuizError, QuizResult};

/// 二进制对象存储（上传文件与 OCR 中间结果）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, path: &str) -> QuizResult<Vec<u8>>;
    async fn write(&self, path: &str, data: &[u8]) -> QuizResult<()>;
    /// 列出以 prefix 开头的对象路径（按字典序）
    async fn list(&self, prefix: &str) -> QuizResult<Vec<String>>;
    async fn delete(&self, path: &str) -> QuizResult<()>;
}

/// 上传路径约定 `uploads/<uid>/<filename>`，返回 (uid, filename)
pub fn parse_upload_path(path: &str) -> QuizResult<(String, String)> {
    let mut parts = path.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("uploads"), Some(uid), Some(file)) if !uid.is_empty() && !file.is_empty() && !file.contains('/') => {
            Ok((uid.to_string(), file.to_string()))
        }
        _ => Err(QuizError::invalid(format!("上传路径不符合 uploads/<uid>/<filename>: {}", path))),
    }
}

/// 以本地目录为根的对象存储
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> QuizResult<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(QuizError::invalid(format!("非法对象路径: {}", path)));
        }
        Ok(self.root.join(relative))
    }

    fn collect(dir: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect(&path, base, out)?;
            } else if let Ok(rel) = path.strip_prefix(base) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read(&self, path: &str) -> QuizResult<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(QuizError::NotFound(format!("对象 {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> QuizResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        debug!("写入对象 {} ({} 字节)", path, data.len());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> QuizResult<Vec<String>> {
        // 只遍历前缀所在的目录，最后一段不完整的部分靠 starts_with 过滤
        let start = match prefix.rfind('/') {
            Some(idx) if idx > 0 => self.resolve(&prefix[..idx])?,
            _ => self.root.clone(),
        };
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let mut keys = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut out = Vec::new();
            Self::collect(&start, &root, &mut out)?;
            Ok(out)
        })
        .await
        .map_err(|e| QuizError::Internal(format!("列举对象任务失败: {}", e)))??;

        keys.retain(|k| k.starts_with(&prefix));
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, path: &str) -> QuizResult<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
