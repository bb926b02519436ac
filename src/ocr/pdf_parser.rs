use async_trait::async_trait;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::OcrBackend;
use crate::storage::ObjectStore;
use crate::utils::{QuizError, QuizResult};

/// 单页识别结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnnotation {
    pub page_number: u32,
    pub text: String,
}

/// 一个批次的输出文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub responses: Vec<PageAnnotation>,
}

/// 本地 PDF 文本层提取，按页分批写出中间结果
pub struct PdfParser {
    batch_size: usize,
}

impl PdfParser {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// 逐页提取文本；lopdf 无法解析时退回 pdf-extract 的整篇提取
    pub fn extract_pages(data: &[u8]) -> QuizResult<Vec<PageAnnotation>> {
        match Document::load_mem(data) {
            Ok(doc) => {
                let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
                info!("PDF 共 {} 页", pages.len());
                Ok(pages
                    .into_iter()
                    .map(|page_number| {
                        let text = doc.extract_text(&[page_number]).unwrap_or_else(|e| {
                            warn!("第 {} 页文本提取失败: {}", page_number, e);
                            String::new()
                        });
                        PageAnnotation { page_number, text }
                    })
                    .collect())
            }
            Err(e) => {
                warn!("lopdf 解析失败，改用 pdf-extract: {}", e);
                let text = pdf_extract::extract_text_from_mem(data)
                    .map_err(|e| QuizError::Ocr(format!("PDF 解析失败: {}", e)))?;
                Ok(vec![PageAnnotation { page_number: 1, text }])
            }
        }
    }
}

#[async_trait]
impl OcrBackend for PdfParser {
    async fn batch_annotate(&self, store: &dyn ObjectStore, source: &str, output_prefix: &str) -> QuizResult<()> {
        info!("提取PDF文本: {}", source);
        let data = store.read(source).await?;

        let pages = tokio::task::spawn_blocking(move || Self::extract_pages(&data))
            .await
            .map_err(|e| QuizError::Ocr(format!("OCR 任务异常退出: {}", e)))??;

        for batch in pages.chunks(self.batch_size) {
            let (first, last) = match (batch.first(), batch.last()) {
                (Some(first), Some(last)) => (first.page_number, last.page_number),
                _ => continue,
            };
            let output = BatchOutput {
                responses: batch.to_vec(),
            };
            let path = format!("{}output-{}-to-{}.json", output_prefix, first, last);
            store.write(&path, &serde_json::to_vec(&output)?).await?;
        }

        info!("OCR 批处理完成: {} 页, 每批 {} 页", pages.len(), self.batch_size);
        Ok(())
    }
}
