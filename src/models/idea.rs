use super::innovation::Innovation;
use super::paper::Paper;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 组合类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationType {
    /// 同类别、跨论文的两两组合
    Pairwise,
    /// 三篇论文各取一项的三元组合
    Triple,
    /// 跨类别、跨论文的两两组合
    CrossCategory,
}

impl CombinationType {
    pub fn as_str(self) -> &'static str {
        match self {
            CombinationType::Pairwise => "pairwise",
            CombinationType::Triple => "triple",
            CombinationType::CrossCategory => "cross_category",
        }
    }
}

/// 候选研究想法
///
/// 先由组合引擎生成（只有启发式评分与初步分数），再由合成器补全描述与实施路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaCandidate {
    pub id: String,
    pub title: String,
    #[serde(rename = "source_innovations")]
    pub source_innovation_ids: BTreeSet<String>,
    #[serde(default)]
    pub source_papers: BTreeSet<String>,
    pub combination_type: CombinationType,
    pub heuristic_score: f64,
    pub feasibility_score: f64,
    pub novelty_score: f64,
    #[serde(rename = "impact_potential")]
    pub impact_score: f64,
    #[serde(default)]
    pub composite_score: f64,
    pub description: String,
    #[serde(default)]
    pub implementation_path: String,
    #[serde(default)]
    pub research_directions: Vec<String>,
}

impl IdeaCandidate {
    /// 去重键：来源集合 + 组合类型
    pub fn dedup_key(&self) -> (BTreeSet<String>, CombinationType) {
        (self.source_innovation_ids.clone(), self.combination_type)
    }

    pub fn scores(&self) -> [f64; 4] {
        [
            self.heuristic_score,
            self.feasibility_score,
            self.novelty_score,
            self.impact_score,
        ]
    }
}

/// 运行结果分析摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub paper_count: usize,
    pub innovation_count: usize,
    pub idea_count: usize,
    pub category_distribution: BTreeMap<String, usize>,
    pub combination_type_distribution: BTreeMap<String, usize>,
    pub avg_novelty: f64,
    pub avg_feasibility: f64,
}

impl AnalysisSummary {
    pub fn compute(papers: &[Paper], innovations: &[Innovation], ideas: &[IdeaCandidate]) -> Self {
        let mut category_distribution = BTreeMap::new();
        for innovation in innovations {
            *category_distribution
                .entry(innovation.category.clone())
                .or_insert(0) += 1;
        }

        let mut combination_type_distribution = BTreeMap::new();
        for idea in ideas {
            *combination_type_distribution
                .entry(idea.combination_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mean = |f: fn(&IdeaCandidate) -> f64| {
            if ideas.is_empty() {
                0.0
            } else {
                ideas.iter().map(f).sum::<f64>() / ideas.len() as f64
            }
        };

        Self {
            paper_count: papers.len(),
            innovation_count: innovations.len(),
            idea_count: ideas.len(),
            category_distribution,
            combination_type_distribution,
            avg_novelty: mean(|i| i.novelty_score),
            avg_feasibility: mean(|i| i.feasibility_score),
        }
    }
}
