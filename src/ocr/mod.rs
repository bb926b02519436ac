pub mod pdf_parser;

pub use pdf_parser::{BatchOutput, PageAnnotation, PdfParser};

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::storage::ObjectStore;
use crate::utils::{QuizError, QuizResult};

/// 文档 OCR 后端：异步批量识别，把页级 JSON 结果写到 `output_prefix` 下
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn batch_annotate(&self, store: &dyn ObjectStore, source: &str, output_prefix: &str) -> QuizResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Paginated,
}

impl DocumentKind {
    pub fn from_content_type(content_type: &str) -> QuizResult<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Ok(DocumentKind::Paginated),
            t if t.starts_with("text/") => Ok(DocumentKind::Text),
            _ => Err(QuizError::UnsupportedFormat(content_type.to_string())),
        }
    }
}

/// 把上传对象转换为纯文本
pub struct OcrExtractor {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn OcrBackend>,
    min_text_chars: usize,
    blank_runs: Regex,
}

impl OcrExtractor {
    pub fn new(store: Arc<dyn ObjectStore>, backend: Arc<dyn OcrBackend>, min_text_chars: usize) -> QuizResult<Self> {
        // 行尾空白与连续空行
        let blank_runs = Regex::new(r"[ \t]*\n(?:[ \t]*\n)+[ \t]*|[ \t]+\n")
            .map_err(|e| QuizError::Internal(e.to_string()))?;
        Ok(Self {
            store,
            backend,
            min_text_chars,
            blank_runs,
        })
    }

    fn normalize_page(&self, text: &str) -> String {
        self.blank_runs
            .replace_all(text.trim(), |caps: &regex::Captures| {
                if caps[0].matches('\n').count() > 1 {
                    "\n\n"
                } else {
                    "\n"
                }
            })
            .into_owned()
    }

    pub async fn extract(&self, job_id: &str, path: &str, content_type: &str) -> QuizResult<String> {
        let kind = DocumentKind::from_content_type(content_type)?;
        info!("任务 {} 开始提取文本: {} ({:?})", job_id, path, kind);

        let text = match kind {
            DocumentKind::Text => {
                let data = self.store.read(path).await?;
                String::from_utf8(data)
                    .map_err(|e| QuizError::Ocr(format!("文本文件不是有效的 UTF-8 ({}): {}", path, e.utf8_error())))?
            }
            DocumentKind::Paginated => self.extract_paginated(job_id, path).await?,
        };

        let text = text.trim().to_string();
        let len = text.chars().count();
        if len < self.min_text_chars {
            return Err(QuizError::InsufficientContent {
                len,
                min: self.min_text_chars,
            });
        }

        info!("任务 {} 提取文本长度: {} 字符", job_id, len);
        Ok(text)
    }

    async fn extract_paginated(&self, job_id: &str, path: &str) -> QuizResult<String> {
        let prefix = format!("ocr-output/{}/", job_id);
        // 重试时先清掉上一次残留的中间结果
        self.discard(&prefix).await?;

        let result = match self.backend.batch_annotate(self.store.as_ref(), path, &prefix).await {
            Ok(()) => self.collect_pages(&prefix).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.discard(&prefix).await {
            warn!("任务 {} 清理 OCR 中间结果失败: {}", job_id, e);
        }
        result
    }

    /// 读取全部批次输出，按页码顺序拼接
    async fn collect_pages(&self, prefix: &str) -> QuizResult<String> {
        let mut pages: Vec<PageAnnotation> = Vec::new();
        for key in self.store.list(prefix).await? {
            let data = self.store.read(&key).await?;
            let batch: BatchOutput = serde_json::from_slice(&data)
                .map_err(|e| QuizError::Ocr(format!("OCR 输出 {} 格式错误: {}", key, e)))?;
            debug!("读取 OCR 输出 {}: {} 页", key, batch.responses.len());
            pages.extend(batch.responses);
        }

        if pages.is_empty() {
            return Err(QuizError::Ocr("OCR 未产生任何输出".to_string()));
        }

        pages.sort_by_key(|p| p.page_number);
        Ok(pages
            .iter()
            .map(|p| self.normalize_page(&p.text))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn discard(&self, prefix: &str) -> QuizResult<()> {
        for key in self.store.list(prefix).await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;

    /// 按固定页面写出多个批次（故意让字典序与页码顺序不一致）
    struct FixedPages(Vec<(u32, &'static str)>);

    #[async_trait]
    impl OcrBackend for FixedPages {
        async fn batch_annotate(&self, store: &dyn ObjectStore, _source: &str, output_prefix: &str) -> QuizResult<()> {
            for (page_number, text) in &self.0 {
                let output = BatchOutput {
                    responses: vec![PageAnnotation {
                        page_number: *page_number,
                        text: text.to_string(),
                    }],
                };
                let path = format!("{}output-{}-to-{}.json", output_prefix, page_number, page_number);
                store.write(&path, &serde_json::to_vec(&output)?).await?;
            }
            Ok(())
        }
    }

    fn extractor(dir: &std::path::Path, pages: Vec<(u32, &'static str)>, min: usize) -> (OcrExtractor, Arc<LocalObjectStore>) {
        let store = Arc::new(LocalObjectStore::new(dir));
        let extractor = OcrExtractor::new(store.clone(), Arc::new(FixedPages(pages)), min).unwrap();
        (extractor, store)
    }

    #[test]
    fn content_types_are_classified() {
        assert_eq!(DocumentKind::from_content_type("application/pdf").unwrap(), DocumentKind::Paginated);
        assert_eq!(
            DocumentKind::from_content_type("text/plain; charset=utf-8").unwrap(),
            DocumentKind::Text
        );
        let err = DocumentKind::from_content_type("image/png").unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn pages_are_concatenated_in_order_and_artifacts_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![(10, "page ten"), (2, "page two"), (1, "page one")];
        let (extractor, store) = extractor(dir.path(), pages, 5);
        store.write("uploads/u1/notes.pdf", b"%PDF").await.unwrap();

        let text = extractor.extract("job-1", "uploads/u1/notes.pdf", "application/pdf").await.unwrap();
        assert_eq!(text, "page one\npage two\npage ten");
        assert!(store.list("ocr-output/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_whitespace_is_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, store) = extractor(dir.path(), vec![(1, "Fever  \n\n\n\n\nRash")], 1);
        store.write("uploads/u1/a.pdf", b"%PDF").await.unwrap();

        let text = extractor.extract("job-3", "uploads/u1/a.pdf", "application/pdf").await.unwrap();
        assert_eq!(text, "Fever\n\nRash");
    }

    #[tokio::test]
    async fn short_text_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, store) = extractor(dir.path(), vec![], 100);
        store.write("uploads/u1/short.txt", "x".repeat(50).as_bytes()).await.unwrap();

        let err = extractor.extract("job-2", "uploads/u1/short.txt", "text/plain").await.unwrap_err();
        assert!(matches!(err, QuizError::InsufficientContent { len: 50, min: 100 }));
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, store) = extractor(dir.path(), vec![], 1);
        let mut data = "Kawasaki disease criteria ".repeat(10).into_bytes();
        data.extend_from_slice(&[0xff, 0xfe, 0x00]);
        store.write("uploads/u1/latin1.txt", &data).await.unwrap();

        let err = extractor.extract("job-4", "uploads/u1/latin1.txt", "text/plain").await.unwrap_err();
        assert!(matches!(err, QuizError::Ocr(_)));
        assert_eq!(err.code(), "INTERNAL");
    }
}
