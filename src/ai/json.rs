//! 模型输出的 JSON 提取。
//!
//! 生成后端不保证输出符合 schema：可能带 ```json 围栏、前后说明文字，
//! 或者干脆不是 JSON。这里只负责找出第一个完整的顶层对象并反序列化，
//! 字段级校验由调用方完成。

use serde::de::DeserializeOwned;
use tracing::debug;

/// 找到文本中第一个括号平衡的顶层 JSON 对象（忽略字符串内的括号）
pub fn find_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' if start.is_some() => in_string = true,
            b'{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if start.is_some() => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 从模型输出中解析结构化结果；失败时返回可读原因
pub fn parse_json_output<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("模型返回为空".to_string());
    }

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    let candidate = find_json_object(trimmed).ok_or_else(|| {
        let preview: String = trimmed.chars().take(200).collect();
        format!("输出中没有 JSON 对象: {}", preview)
    })?;
    debug!("从 {} 字符的输出中截取 JSON ({} 字符)", trimmed.len(), candidate.len());

    serde_json::from_str::<T>(candidate).map_err(|e| format!("JSON 结构不符合预期: {}", e))
}
