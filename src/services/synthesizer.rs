//! 想法合成 - 业务能力层
//!
//! 对一个候选调用生成能力，补全描述、实施路径、研究方向，
//! 并给出修正后的可行性与影响力评分。重试规则与抽取相同。

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::extractor::{json_score, json_text, outermost_json_object};
use super::retry::{with_retry, RetryPolicy};
use crate::clients::Generator;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{is_unit_score, IdeaCandidate, Innovation};
use crate::utils::logging::truncate_text;

const SYSTEM_PROMPT: &str = "你是一个创新研究专家，擅长基于现有创新点提出新的研究方向。只输出合法的 JSON。";

/// 描述在提示词中的最大字符数
const SOURCE_DESCRIPTION_CHARS: usize = 400;

/// 合成服务
pub struct IdeaSynthesizer {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    max_schema_attempts: u32,
}

/// 合成结果中可被采纳的字段
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub title: Option<String>,
    pub description: String,
    pub implementation_path: String,
    pub feasibility_score: f64,
    pub impact_score: f64,
    pub research_directions: Vec<String>,
}

impl IdeaSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: &Config) -> Self {
        Self {
            generator,
            retry: RetryPolicy::from_config(config),
            max_schema_attempts: config.max_schema_attempts.max(1),
        }
    }

    /// 合成一个候选
    ///
    /// # 参数
    /// - `candidate`: 组合引擎给出的候选
    /// - `sources`: 候选的来源创新点
    /// - `topic`: 研究主题
    ///
    /// # 返回
    /// 补全后的新候选；原候选不被修改
    pub async fn synthesize(
        &self,
        candidate: &IdeaCandidate,
        sources: &[&Innovation],
        topic: &str,
    ) -> Result<IdeaCandidate, PipelineError> {
        let label = format!("[候选 {}] 合成", candidate.id);
        let mut last_error = PipelineError::schema("未进行任何尝试");

        for attempt in 1..=self.max_schema_attempts {
            let prompt = build_synthesis_prompt(topic, sources, attempt > 1);
            let reply = with_retry(&self.retry, &label, || {
                self.generator.generate(&prompt, Some(SYSTEM_PROMPT))
            })
            .await;

            let parsed = reply.and_then(|raw| {
                debug!("{} 返回: {}", label, truncate_text(&raw, 200));
                parse_synthesis(&raw)
            });

            match parsed {
                Ok(output) => {
                    info!("{} ✓ 完成 (第 {} 次尝试)", label, attempt);
                    return Ok(apply_synthesis(candidate, output));
                }
                Err(e @ PipelineError::SchemaValidation { .. }) => {
                    warn!(
                        "{} 返回内容未通过校验 ({}/{}): {}",
                        label, attempt, self.max_schema_attempts, e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

/// 把合成结果写入候选副本
pub fn apply_synthesis(candidate: &IdeaCandidate, output: SynthesisOutput) -> IdeaCandidate {
    let mut enriched = candidate.clone();
    if let Some(title) = output.title {
        enriched.title = title;
    }
    enriched.description = output.description;
    enriched.implementation_path = output.implementation_path;
    enriched.feasibility_score = output.feasibility_score;
    enriched.impact_score = output.impact_score;
    enriched.research_directions = output.research_directions;
    enriched
}

pub fn build_synthesis_prompt(topic: &str, sources: &[&Innovation], strict: bool) -> String {
    let innovations_text = sources
        .iter()
        .map(|inv| {
            format!(
                "- {}: {} (类别: {}, 新颖性: {:.2})",
                inv.title,
                truncate_text(&inv.description, SOURCE_DESCRIPTION_CHARS),
                inv.category,
                inv.novelty_score
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let strict_rules = if strict {
        "\n上一次的返回无法解析。只输出一个 JSON 对象，不要输出解释文字或 Markdown 代码块；\
         description 与 implementation_path 不能为空；两个评分必须是 0 到 1 之间的数字。\n"
    } else {
        ""
    };

    format!(
        r#"基于以下研究主题和来自不同论文的创新点，提出一个把它们结合起来的新研究想法：

研究主题：{topic}

创新点：
{innovations_text}

要求：
1. 给出明确的标题和详细描述
2. 评估可行性和潜在影响
3. 提供实施路径和研究方向
{strict_rules}
请以 JSON 格式返回：
{{
    "title": "新想法标题",
    "description": "详细描述",
    "implementation_path": "实施路径",
    "feasibility_score": 0.8,
    "impact_potential": 0.85,
    "research_directions": ["研究方向1", "研究方向2"]
}}"#
    )
}

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    #[serde(default)]
    title: Option<JsonValue>,
    #[serde(default)]
    description: Option<JsonValue>,
    #[serde(default)]
    implementation_path: Option<JsonValue>,
    #[serde(default)]
    feasibility_score: Option<JsonValue>,
    #[serde(default, alias = "impact_score")]
    impact_potential: Option<JsonValue>,
    #[serde(default)]
    research_directions: Option<JsonValue>,
}

/// 解析并校验合成结果
pub fn parse_synthesis(raw: &str) -> Result<SynthesisOutput, PipelineError> {
    let body = outermost_json_object(raw)
        .ok_or_else(|| PipelineError::schema("返回内容中没有 JSON 对象"))?;
    let parsed: RawSynthesis = serde_json::from_str(body)
        .map_err(|e| PipelineError::schema(format!("JSON 解析失败: {}", e)))?;

    let description = json_text(&parsed.description)
        .ok_or_else(|| PipelineError::schema("缺少 description"))?;
    let implementation_path = json_text(&parsed.implementation_path)
        .ok_or_else(|| PipelineError::schema("缺少 implementation_path"))?;
    let feasibility_score = json_score(&parsed.feasibility_score)
        .filter(|s| is_unit_score(*s))
        .ok_or_else(|| PipelineError::schema("feasibility_score 缺失或越界"))?;
    let impact_score = json_score(&parsed.impact_potential)
        .filter(|s| is_unit_score(*s))
        .ok_or_else(|| PipelineError::schema("impact_potential 缺失或越界"))?;

    let research_directions = match &parsed.research_directions {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| json_text(&Some(v.clone())))
            .collect(),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    Ok(SynthesisOutput {
        title: json_text(&parsed.title),
        description,
        implementation_path,
        feasibility_score,
        impact_score,
        research_directions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synthesis() {
        let raw = r#"```json
{"title":"Routed memory","description":"Combine routing with memory","implementation_path":"1. prototype 2. benchmark",
 "feasibility_score":0.7,"impact_potential":"0.6","research_directions":["scaling","  ", "theory"]}
```"#;
        let output = parse_synthesis(raw).unwrap();
        assert_eq!(output.title.as_deref(), Some("Routed memory"));
        assert_eq!(output.feasibility_score, 0.7);
        assert_eq!(output.impact_score, 0.6);
        assert_eq!(output.research_directions, vec!["scaling", "theory"]);
    }

    #[test]
    fn test_parse_synthesis_rejects_missing_fields() {
        assert!(parse_synthesis(r#"{"description":"d","feasibility_score":0.5,"impact_potential":0.5}"#).is_err());
        assert!(parse_synthesis(r#"{"description":"d","implementation_path":"p","feasibility_score":-0.1,"impact_potential":0.5}"#).is_err());
        assert!(parse_synthesis("sorry").is_err());
    }

    #[test]
    fn test_strict_prompt_adds_rules() {
        let inv = Innovation {
            id: "a".into(),
            paper_id: "p".into(),
            title: "Sparse routing".into(),
            description: "desc".into(),
            category: "algorithm".into(),
            novelty_score: 0.8,
            confidence: 0.9,
            impact: None,
            methodology: None,
        };
        let normal = build_synthesis_prompt("topic", &[&inv], false);
        let strict = build_synthesis_prompt("topic", &[&inv], true);
        assert!(normal.contains("- Sparse routing: desc (类别: algorithm, 新颖性: 0.80)"));
        assert!(!normal.contains("无法解析"));
        assert!(strict.contains("无法解析"));
    }
}
