//! 评分与排序 - 业务能力层
//!
//! - 综合评分 = 可行性、新颖度、影响力的加权平均（权重归一化）
//! - 去重：来源集合相同，或描述的词元 Jaccard 相似度超过阈值，只保留综合评分更高者
//! - 排序：综合评分降序，同分按候选编号升序

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

use crate::config::{Config, ScoreWeights};
use crate::models::{clamp_unit, IdeaCandidate};

/// 分数比较精度
const SCORE_QUANTUM: f64 = 1e-9;

/// 排序器
pub struct Ranker {
    weights: ScoreWeights,
    similarity_threshold: f64,
}

impl Ranker {
    pub fn new(config: &Config) -> Self {
        Self::with_params(config.score_weights, config.similarity_threshold)
    }

    pub fn with_params(weights: ScoreWeights, similarity_threshold: f64) -> Self {
        Self {
            weights,
            similarity_threshold,
        }
    }

    /// 计算综合评分（已量化）
    pub fn composite(&self, candidate: &IdeaCandidate) -> f64 {
        let w = &self.weights;
        let sum = w.sum();
        if sum <= 0.0 {
            return 0.0;
        }
        let raw = w.feasibility * candidate.feasibility_score
            + w.novelty * candidate.novelty_score
            + w.impact * candidate.impact_score;
        quantize(clamp_unit(raw / sum))
    }

    /// 评分、去重并排序
    ///
    /// 来源集合相同即视为重复，不区分组合类型，比 [`IdeaCandidate::dedup_key`] 更严格
    pub fn rank(&self, candidates: Vec<IdeaCandidate>) -> Vec<IdeaCandidate> {
        let total = candidates.len();
        let mut scored: Vec<IdeaCandidate> = candidates
            .into_iter()
            .map(|mut c| {
                c.feasibility_score = clamp_unit(c.feasibility_score);
                c.novelty_score = clamp_unit(c.novelty_score);
                c.impact_score = clamp_unit(c.impact_score);
                c.heuristic_score = clamp_unit(c.heuristic_score);
                c.composite_score = self.composite(&c);
                c
            })
            .collect();
        scored.sort_by(compare_ranked);

        let mut kept: Vec<(IdeaCandidate, HashSet<String>)> = Vec::with_capacity(scored.len());
        let mut seen_sources: HashSet<BTreeSet<String>> = HashSet::new();

        for candidate in scored {
            if seen_sources.contains(&candidate.source_innovation_ids) {
                debug!("去重(来源相同): {}", candidate.id);
                continue;
            }
            let tokens = tokenize(&candidate.description);
            if let Some((winner, _)) = kept
                .iter()
                .find(|(_, other)| jaccard(&tokens, other) > self.similarity_threshold)
            {
                debug!("去重(描述相似): {} 并入 {}", candidate.id, winner.id);
                continue;
            }
            seen_sources.insert(candidate.source_innovation_ids.clone());
            kept.push((candidate, tokens));
        }

        let ranked: Vec<IdeaCandidate> = kept.into_iter().map(|(c, _)| c).collect();
        info!("🏆 排序完成: {} 个候选，去重后 {} 个", total, ranked.len());
        ranked
    }
}

fn quantize(score: f64) -> f64 {
    (score / SCORE_QUANTUM).round() * SCORE_QUANTUM
}

fn compare_ranked(a: &IdeaCandidate, b: &IdeaCandidate) -> Ordering {
    b.composite_score
        .total_cmp(&a.composite_score)
        .then_with(|| a.id.cmp(&b.id))
}

/// 词元切分：ASCII 字母数字连续成词，其他文字（如中文）按单字切分
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            word.push(ch.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            tokens.insert(std::mem::take(&mut word));
        }
        if ch.is_alphanumeric() {
            tokens.insert(ch.to_lowercase().collect());
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    tokens
}

/// Jaccard 相似度；两边都为空时为 0
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
