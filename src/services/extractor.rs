//! 创新点抽取 - 业务能力层
//!
//! 只负责「从一篇文档抽取创新点」，不关心流程
//!
//! ## 处理步骤
//! 1. 查缓存（内容指纹），命中则不调用生成能力
//! 2. 构造提示词并调用生成能力（传输层错误按重试策略退避）
//! 3. 校验返回的 JSON；不合格时换用更严格的提示词再试
//! 4. 写入缓存

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{fingerprint, CachedExtraction, InnovationCache};
use super::retry::{with_retry, RetryPolicy};
use crate::clients::Generator;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{is_unit_score, Innovation, ParsedDocument};
use crate::utils::logging::truncate_text;

const SYSTEM_PROMPT: &str = "你是一名严谨的科研分析助手，只输出合法的 JSON。";

/// 缺省类别
pub const DEFAULT_CATEGORY: &str = "general";

/// 单篇文档的抽取结果
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub innovations: Vec<Innovation>,
    pub summary: String,
    /// 是否来自缓存
    pub cached: bool,
}

/// 创新点抽取服务
pub struct InnovationExtractor {
    generator: Arc<dyn Generator>,
    cache: InnovationCache,
    retry: RetryPolicy,
    max_schema_attempts: u32,
    max_prompt_chars: usize,
}

impl InnovationExtractor {
    pub fn new(generator: Arc<dyn Generator>, cache: InnovationCache, config: &Config) -> Self {
        Self {
            generator,
            cache,
            retry: RetryPolicy::from_config(config),
            max_schema_attempts: config.max_schema_attempts.max(1),
            max_prompt_chars: config.max_prompt_chars,
        }
    }

    /// 从一篇文档抽取创新点
    ///
    /// # 返回
    /// 校验通过的创新点；结构校验次数耗尽时返回最后一次的 `SchemaValidation`
    pub async fn extract(
        &self,
        document: &ParsedDocument,
        title: &str,
    ) -> Result<Extraction, PipelineError> {
        let key = fingerprint(document);
        if let Some(hit) = self.cache.get(&key).await {
            info!("[论文 {}] ✓ 命中抽取缓存", document.paper_id);
            return Ok(Extraction {
                innovations: hit.innovations.clone(),
                summary: hit.summary.clone(),
                cached: true,
            });
        }

        let content = truncate_chars(&document.full_text(), self.max_prompt_chars);
        let label = format!("[论文 {}] 抽取", document.paper_id);
        let mut last_error = PipelineError::schema("未进行任何尝试");

        for attempt in 1..=self.max_schema_attempts {
            let prompt = if attempt == 1 {
                build_extraction_prompt(title, &content)
            } else {
                build_strict_extraction_prompt(title, &content)
            };

            let reply = with_retry(&self.retry, &label, || {
                self.generator.generate(&prompt, Some(SYSTEM_PROMPT))
            })
            .await;

            let parsed = reply.and_then(|raw| {
                debug!("{} 返回: {}", label, truncate_text(&raw, 200));
                parse_extraction(&raw, &document.paper_id)
            });

            match parsed {
                Ok((innovations, summary)) => {
                    info!(
                        "[论文 {}] ✓ 抽取到 {} 个创新点 (第 {} 次尝试)",
                        document.paper_id,
                        innovations.len(),
                        attempt
                    );
                    self.cache
                        .put(
                            &key,
                            CachedExtraction {
                                innovations: innovations.clone(),
                                summary: summary.clone(),
                            },
                        )
                        .await;
                    return Ok(Extraction {
                        innovations,
                        summary,
                        cached: false,
                    });
                }
                Err(e @ PipelineError::SchemaValidation { .. }) => {
                    warn!(
                        "[论文 {}] 返回内容未通过校验 ({}/{}): {}",
                        document.paper_id, attempt, self.max_schema_attempts, e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 标准提示词
pub fn build_extraction_prompt(title: &str, content: &str) -> String {
    format!(
        r#"请分析以下学术论文，提取其中的创新点。

论文标题：{title}

论文内容：
{content}

请以 JSON 格式返回：
{{
    "innovations": [
        {{
            "title": "创新点标题",
            "description": "创新点详细描述",
            "category": "创新类别（如：算法创新、架构创新、应用创新等）",
            "impact": "创新影响和意义",
            "methodology": "实现方法",
            "novelty_score": 0.85,
            "confidence": 0.9
        }}
    ],
    "summary": "论文创新点总结"
}}"#
    )
}

/// 更严格的提示词（上一次返回未通过校验时使用）
pub fn build_strict_extraction_prompt(title: &str, content: &str) -> String {
    format!(
        r#"上一次的返回无法解析。请严格遵守以下要求重新提取论文创新点：
1. 只输出一个 JSON 对象，不要输出任何解释文字或 Markdown 代码块
2. innovations 至少包含 1 项，每项的 title 与 description 都不能为空
3. novelty_score 与 confidence 必须是 0 到 1 之间的数字

论文标题：{title}

论文内容：
{content}

JSON 结构：
{{"innovations":[{{"title":"","description":"","category":"","impact":"","methodology":"","novelty_score":0.0,"confidence":0.0}}],"summary":""}}"#
    )
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    innovations: Vec<RawInnovation>,
    #[serde(default)]
    summary: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawInnovation {
    #[serde(default)]
    title: Option<JsonValue>,
    #[serde(default)]
    description: Option<JsonValue>,
    #[serde(default)]
    category: Option<JsonValue>,
    #[serde(default)]
    impact: Option<JsonValue>,
    #[serde(default)]
    methodology: Option<JsonValue>,
    #[serde(default)]
    novelty_score: Option<JsonValue>,
    #[serde(default)]
    confidence: Option<JsonValue>,
}

/// 取出文本中最外层的 `{...}`
pub fn outermost_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub(crate) fn json_text(value: &Option<JsonValue>) -> Option<String> {
    match value {
        Some(JsonValue::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(JsonValue::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

pub(crate) fn json_score(value: &Option<JsonValue>) -> Option<f64> {
    match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 解析并校验抽取结果
///
/// 任意一项不合格即整体不合格；编号为 `<paper_id>-iNN`
pub fn parse_extraction(
    raw: &str,
    paper_id: &str,
) -> Result<(Vec<Innovation>, String), PipelineError> {
    let body = outermost_json_object(raw)
        .ok_or_else(|| PipelineError::schema("返回内容中没有 JSON 对象"))?;
    let parsed: RawExtraction = serde_json::from_str(body)
        .map_err(|e| PipelineError::schema(format!("JSON 解析失败: {}", e)))?;

    if parsed.innovations.is_empty() {
        return Err(PipelineError::schema("innovations 为空"));
    }

    let mut innovations = Vec::with_capacity(parsed.innovations.len());
    for (idx, item) in parsed.innovations.iter().enumerate() {
        let n = idx + 1;
        let title = json_text(&item.title)
            .ok_or_else(|| PipelineError::schema(format!("第 {} 项缺少 title", n)))?;
        let description = json_text(&item.description)
            .ok_or_else(|| PipelineError::schema(format!("第 {} 项缺少 description", n)))?;
        let novelty_score = json_score(&item.novelty_score)
            .filter(|s| is_unit_score(*s))
            .ok_or_else(|| PipelineError::schema(format!("第 {} 项 novelty_score 缺失或越界", n)))?;
        let confidence = json_score(&item.confidence)
            .filter(|s| is_unit_score(*s))
            .ok_or_else(|| PipelineError::schema(format!("第 {} 项 confidence 缺失或越界", n)))?;

        innovations.push(Innovation {
            id: format!("{}-i{:02}", paper_id, n),
            paper_id: paper_id.to_string(),
            title,
            description,
            category: json_text(&item.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            novelty_score,
            confidence,
            impact: json_text(&item.impact),
            methodology: json_text(&item.methodology),
        });
    }

    Ok((innovations, json_text(&parsed.summary).unwrap_or_default()))
}
