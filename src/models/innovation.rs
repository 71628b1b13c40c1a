use super::paper::Paper;
use serde::{Deserialize, Serialize};

/// 从单篇论文中抽取出的一项创新点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Innovation {
    pub id: String,
    pub paper_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub novelty_score: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
}

/// 单篇论文的抽取结果（`extract` 命令的输出文件格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInnovations {
    pub paper: Paper,
    pub innovations: Vec<Innovation>,
    #[serde(default)]
    pub summary: String,
}
