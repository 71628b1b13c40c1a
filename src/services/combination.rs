//! 创新点组合引擎 - 业务能力层
//!
//! 把创新点池变成有限、多样的候选想法集合，全程不调用生成能力：
//! 1. 按类别分组
//! 2. 先生成跨论文、跨类别的两两组合，再生成同类别、跨论文的组合；同一论文内的组合一律不生成
//! 3. 可选：把得分最高的若干组合扩展为三元组合（第三项来自第三篇论文）
//! 4. 计算启发式评分（新颖度、置信度与多样性加权）
//! 5. 按评分降序、来源编号升序排序，截取前 K 个
//!
//! `max_candidates` 在全部跨论文组合评分之后才生效，类别名称的先后不影响保留哪些候选。

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::config::{Config, HeuristicWeights};
use crate::models::{clamp_unit, CombinationType, IdeaCandidate, Innovation};

/// 组合参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinationSettings {
    /// 2 或 3
    pub max_combination_size: usize,
    /// 排序后保留的候选上限（先为全部跨论文组合打分，再按评分截取）
    pub max_candidates: usize,
    /// 扩展为三元组合的种子数
    pub triple_seed_count: usize,
    pub top_k: usize,
    pub weights: HeuristicWeights,
}

impl CombinationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_combination_size: config.max_combination_size,
            max_candidates: config.max_candidates,
            triple_seed_count: config.triple_seed_count,
            top_k: config.top_k,
            weights: config.heuristic_weights,
        }
    }
}

/// 已评分、尚未构造成候选的两两组合（成员按编号升序）
struct ScoredPair<'a> {
    score: f64,
    members: [&'a Innovation; 2],
    kind: CombinationType,
}

/// 组合引擎
pub struct CombinationEngine {
    settings: CombinationSettings,
}

impl CombinationEngine {
    pub fn new(config: &Config) -> Self {
        Self::with_settings(CombinationSettings::from_config(config))
    }

    pub fn with_settings(settings: CombinationSettings) -> Self {
        Self { settings }
    }

    /// 生成、评分并截断候选
    pub fn combine(&self, pool: &[Innovation]) -> Vec<IdeaCandidate> {
        let mut sorted: Vec<&Innovation> = pool.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        sorted.dedup_by(|a, b| a.id == b.id);

        let mut by_category: BTreeMap<&str, Vec<&Innovation>> = BTreeMap::new();
        for innovation in &sorted {
            by_category
                .entry(innovation.category.as_str())
                .or_default()
                .push(*innovation);
        }
        debug!("创新点 {} 个，类别 {} 个", sorted.len(), by_category.len());

        let cap = self.settings.max_candidates;
        let mut candidates: Vec<IdeaCandidate> = self
            .best_pairs(&by_category, cap)
            .into_iter()
            .map(|pair| self.build_candidate(&pair.members, pair.kind))
            .collect();
        let pair_count = candidates.len();

        if self.settings.max_combination_size >= 3 {
            let triples = self.extend_to_triples(&candidates, &sorted);
            candidates.extend(triples);
        }

        sort_by_heuristic(&mut candidates);
        let generated = candidates.len();
        candidates.truncate(cap.min(self.settings.top_k));

        info!(
            "🧩 生成候选 {} 个（两两 {}，三元 {}），保留前 {} 个",
            generated,
            pair_count,
            generated - pair_count,
            candidates.len()
        );
        candidates
    }

    /// 为所有跨论文的两两组合打分，保留评分最高的 `cap` 个
    ///
    /// 先跨类别、再同类别枚举；枚举顺序不影响结果
    fn best_pairs<'a>(
        &self,
        by_category: &BTreeMap<&str, Vec<&'a Innovation>>,
        cap: usize,
    ) -> Vec<ScoredPair<'a>> {
        let mut scored = Vec::new();
        let categories: Vec<&Vec<&Innovation>> = by_category.values().collect();

        // 跨类别
        for (i, left) in categories.iter().enumerate() {
            for right in &categories[i + 1..] {
                for a in left.iter() {
                    for b in right.iter() {
                        if a.paper_id != b.paper_id {
                            scored.push(self.score_pair(*a, *b, CombinationType::CrossCategory));
                        }
                    }
                }
            }
        }

        // 同类别
        for members in &categories {
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    if a.paper_id != b.paper_id {
                        scored.push(self.score_pair(*a, *b, CombinationType::Pairwise));
                    }
                }
            }
        }

        let total = scored.len();
        if total > cap && cap > 0 {
            scored.select_nth_unstable_by(cap - 1, compare_pairs);
        }
        scored.truncate(cap);
        scored.sort_by(compare_pairs);
        debug!("跨论文两两组合 {} 个，保留 {} 个", total, scored.len());
        scored
    }

    fn score_pair<'a>(
        &self,
        a: &'a Innovation,
        b: &'a Innovation,
        kind: CombinationType,
    ) -> ScoredPair<'a> {
        let members = if a.id <= b.id { [a, b] } else { [b, a] };
        ScoredPair {
            score: self.heuristic(&members),
            members,
            kind,
        }
    }

    /// 把评分最高的若干两两组合扩展为三元组合
    fn extend_to_triples(&self, pairs: &[IdeaCandidate], pool: &[&Innovation]) -> Vec<IdeaCandidate> {
        let by_id: HashMap<&str, &Innovation> = pool.iter().map(|i| (i.id.as_str(), *i)).collect();

        let mut seeds: Vec<&IdeaCandidate> = pairs.iter().collect();
        seeds.sort_by(|a, b| compare_candidates(a, b));
        seeds.truncate(self.settings.triple_seed_count);

        let mut seen: HashSet<BTreeSet<String>> = HashSet::new();
        let mut out = Vec::new();

        for seed in seeds {
            let members: Vec<&Innovation> = seed
                .source_innovation_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            if members.len() != 2 {
                continue;
            }

            for third in pool {
                if seed.source_papers.contains(&third.paper_id) {
                    continue;
                }
                let mut ids = seed.source_innovation_ids.clone();
                ids.insert(third.id.clone());
                if !seen.insert(ids) {
                    continue;
                }
                out.push(self.build_candidate(
                    &[members[0], members[1], *third],
                    CombinationType::Triple,
                ));
            }
        }

        out
    }

    /// 启发式评分：新颖度均值、置信度均值与多样性加成的加权平均
    fn heuristic(&self, members: &[&Innovation]) -> f64 {
        let n = members.len() as f64;
        let mean_novelty = members.iter().map(|i| i.novelty_score).sum::<f64>() / n;
        let mean_confidence = members.iter().map(|i| i.confidence).sum::<f64>() / n;
        let categories: BTreeSet<&str> = members.iter().map(|i| i.category.as_str()).collect();
        let papers: BTreeSet<&str> = members.iter().map(|i| i.paper_id.as_str()).collect();
        let diversity = diversity_bonus(members.len(), categories.len(), papers.len());

        let w = &self.settings.weights;
        let weight_sum = w.novelty + w.confidence + w.diversity;
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let raw = w.novelty * mean_novelty + w.confidence * mean_confidence + w.diversity * diversity;
        clamp_unit(raw / weight_sum)
    }

    /// 由 2~3 个创新点构造候选，计算启发式评分与初步分数
    fn build_candidate(&self, members: &[&Innovation], kind: CombinationType) -> IdeaCandidate {
        let mut members: Vec<&Innovation> = members.to_vec();
        members.sort_by(|a, b| a.id.cmp(&b.id));

        let n = members.len() as f64;
        let mean_novelty = members.iter().map(|i| i.novelty_score).sum::<f64>() / n;
        let mean_confidence = members.iter().map(|i| i.confidence).sum::<f64>() / n;
        let source_papers: BTreeSet<String> =
            members.iter().map(|i| i.paper_id.clone()).collect();
        let heuristic_score = self.heuristic(&members);

        let source_innovation_ids: BTreeSet<String> =
            members.iter().map(|i| i.id.clone()).collect();
        let title = format!(
            "Combined: {}",
            members
                .iter()
                .map(|i| i.title.as_str())
                .collect::<Vec<_>>()
                .join(" + ")
        );
        let description = members
            .iter()
            .map(|i| format!("【{}】{}", i.title, i.description))
            .collect::<Vec<_>>()
            .join("\n");

        IdeaCandidate {
            id: candidate_id(&source_innovation_ids),
            title,
            source_innovation_ids,
            source_papers,
            combination_type: kind,
            heuristic_score,
            feasibility_score: clamp_unit(mean_confidence * 0.8),
            novelty_score: clamp_unit(mean_novelty * 1.2),
            impact_score: clamp_unit(mean_novelty * mean_confidence),
            composite_score: 0.0,
            description,
            implementation_path: String::new(),
            research_directions: Vec::new(),
        }
    }
}

/// 多样性加成：类别与论文越分散越高，取值 [0, 1]
pub fn diversity_bonus(size: usize, categories: usize, papers: usize) -> f64 {
    if size < 2 {
        return 0.0;
    }
    let span = (size - 1) as f64;
    let cat = categories.saturating_sub(1) as f64 / span;
    let pap = papers.saturating_sub(1) as f64 / span;
    clamp_unit(0.5 * cat + 0.5 * pap)
}

/// 由来源编号集合得到的确定性候选编号
pub fn candidate_id(source_ids: &BTreeSet<String>) -> String {
    let joined = source_ids.iter().map(String::as_str).collect::<Vec<_>>().join("|");
    let digest = hex::encode(Sha256::digest(joined.as_bytes()));
    format!("idea-{}", &digest[..12])
}

fn compare_pairs(a: &ScoredPair<'_>, b: &ScoredPair<'_>) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.members[0].id.cmp(&b.members[0].id))
        .then_with(|| a.members[1].id.cmp(&b.members[1].id))
}

fn compare_candidates(a: &IdeaCandidate, b: &IdeaCandidate) -> std::cmp::Ordering {
    b.heuristic_score
        .total_cmp(&a.heuristic_score)
        .then_with(|| a.source_innovation_ids.cmp(&b.source_innovation_ids))
}

/// 启发式评分降序；同分按来源编号字典序升序
pub fn sort_by_heuristic(candidates: &mut [IdeaCandidate]) {
    candidates.sort_by(compare_candidates);
}

/// 检查候选是否仍满足不变量：来源都在池中、跨至少两篇论文、规模为 2 或 3
pub fn check_candidate(
    candidate: &IdeaCandidate,
    pool: &HashMap<&str, &Innovation>,
) -> Result<(), String> {
    let size = candidate.source_innovation_ids.len();
    if !(2..=3).contains(&size) {
        return Err(format!("来源数量 {} 不在 2~3 之间", size));
    }
    let mut papers = BTreeSet::new();
    for id in &candidate.source_innovation_ids {
        match pool.get(id.as_str()) {
            Some(innovation) => {
                papers.insert(innovation.paper_id.as_str());
            }
            None => return Err(format!("来源创新点 {} 不在本次运行中", id)),
        }
    }
    if papers.len() < 2 {
        return Err("来源只涉及一篇论文".to_string());
    }
    Ok(())
}
