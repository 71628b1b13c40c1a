//! 流水线编排器 - 编排层
//!
//! ## 职责
//!
//! 驱动一次运行的状态机：
//! `Pending → Searching → Acquiring → Extracting → Combining → Synthesizing → Scoring → Completed`
//!
//! 1. **阶段推进**：上一阶段至少有部分产出才进入下一阶段
//! 2. **失败隔离**：单个条目的失败只记录到 `errors`，不影响同阶段其他条目
//! 3. **失败上限**：失败比例超过 `failure_ceiling` 或产出为空时，阶段失败、运行提前结束
//! 4. **协作式取消**：在条目边界检查取消信号，取消后运行以 `Cancelled` 结束并保留已提交的结果
//!
//! ## 设计特点
//!
//! - **资源所有者**：持有检索、获取、生成三个外部能力
//! - **无业务逻辑**：抽取、组合、合成、排序都委托给 services

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::worker_pool::{PoolOutcome, WorkerPool};
use crate::clients::{Generator, SearchClient};
use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::models::{
    ExtractedInnovations, FailureReason, IdeaCandidate, Innovation, Paper, ParsedDocument,
    PipelineRun, RunState, Stage, StageStatus,
};
use crate::services::combination::check_candidate;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::{
    CombinationEngine, DocumentAcquirer, IdeaSynthesizer, InnovationCache, InnovationExtractor,
    Ranker,
};
use crate::utils::logging::{log_stage_complete, log_stage_start, log_startup, print_final_stats};
use crate::workflow::{ItemOutcome, StageReport};

/// 流水线编排器
pub struct PipelineOrchestrator {
    config: Config,
    search: Arc<dyn SearchClient>,
    acquirer: Arc<dyn DocumentAcquirer>,
    extractor: Arc<InnovationExtractor>,
    synthesizer: Arc<IdeaSynthesizer>,
    combination: CombinationEngine,
    ranker: Ranker,
    retry: RetryPolicy,
}

impl PipelineOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - `config`: 本次运行的配置（运行期间不可变）
    /// - `search`: 检索能力
    /// - `acquirer`: 文档获取能力
    /// - `generator`: 生成能力（抽取与合成共用）
    /// - `cache`: 抽取结果缓存
    pub fn new(
        config: Config,
        search: Arc<dyn SearchClient>,
        acquirer: Arc<dyn DocumentAcquirer>,
        generator: Arc<dyn Generator>,
        cache: InnovationCache,
    ) -> Self {
        let extractor = Arc::new(InnovationExtractor::new(generator.clone(), cache, &config));
        let synthesizer = Arc::new(IdeaSynthesizer::new(generator, &config));
        Self {
            combination: CombinationEngine::new(&config),
            ranker: Ranker::new(&config),
            retry: RetryPolicy::from_config(&config),
            config,
            search,
            acquirer,
            extractor,
            synthesizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 完整运行一次流水线
    pub async fn run(&self, topic: &str) -> AppResult<PipelineRun> {
        self.run_with_cancel(topic, CancellationToken::new()).await
    }

    /// 完整运行一次流水线，`cancel` 被触发后在下一个条目边界停止
    pub async fn run_with_cancel(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> AppResult<PipelineRun> {
        let mut run = PipelineRun::new(topic);
        log_startup(topic, &self.config);
        let pool = WorkerPool::new(self.config.max_concurrent_requests);

        self.drive_full(&mut run, &pool, &cancel).await?;

        print_final_stats(&run.summary());
        Ok(run)
    }

    /// 从已有的创新点开始运行（跳过检索、获取、抽取）
    ///
    /// 论文按编号排序后截取前 `max_results` 篇；引用了未知或被截掉论文的创新点会被丢弃
    pub async fn run_from_innovations(
        &self,
        topic: &str,
        mut papers: Vec<Paper>,
        innovations: Vec<Innovation>,
    ) -> AppResult<PipelineRun> {
        let cancel = CancellationToken::new();
        let mut run = PipelineRun::new(topic);
        log_startup(topic, &self.config);
        let pool = WorkerPool::new(self.config.max_concurrent_requests);

        papers.sort_by(|a, b| a.id.cmp(&b.id));
        papers.dedup_by(|a, b| a.id == b.id);
        if papers.len() > self.config.max_results {
            warn!(
                "⚠ 论文 {} 篇超过上限 {}，按编号保留前 {} 篇",
                papers.len(),
                self.config.max_results,
                self.config.max_results
            );
            papers.truncate(self.config.max_results);
        }

        let paper_ids: HashSet<&str> = papers.iter().map(|p| p.id.as_str()).collect();
        let (live, orphaned): (Vec<Innovation>, Vec<Innovation>) = innovations
            .into_iter()
            .partition(|inv| paper_ids.contains(inv.paper_id.as_str()));
        if !orphaned.is_empty() {
            warn!("⚠ 丢弃 {} 个引用未知论文的创新点", orphaned.len());
        }

        run.papers = papers;
        for stage in [Stage::Searching, Stage::Acquiring] {
            run.transition(RunState::for_stage(stage))?;
            run.set_stage_status(stage, StageStatus::Success);
        }

        run.transition(RunState::Extracting)?;
        run.innovations = live;
        let mut report = StageReport::new(Stage::Extracting, run.innovations.len());
        report.succeeded = run.innovations.len();
        let output_empty = run.innovations.is_empty();
        if self.conclude_stage(&mut run, report, output_empty, &cancel)? {
            self.drive_tail(&mut run, &pool, &cancel).await?;
        }

        print_final_stats(&run.summary());
        Ok(run)
    }

    async fn drive_full(
        &self,
        run: &mut PipelineRun,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        // 检索
        if !self.enter_stage(run, Stage::Searching, 1, cancel)? {
            return Ok(());
        }
        let (report, papers) = self.search_papers(pool, &run.topic, cancel).await;
        run.papers = papers;
        let output_empty = run.papers.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            return Ok(());
        }

        // 获取
        let paper_count = run.papers.len();
        if !self.enter_stage(run, Stage::Acquiring, paper_count, cancel)? {
            return Ok(());
        }
        let (report, documents) = self.acquire_documents(pool, &run.papers, cancel).await;
        let output_empty = documents.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            return Ok(());
        }

        // 抽取
        if !self.enter_stage(run, Stage::Extracting, documents.len(), cancel)? {
            return Ok(());
        }
        let (report, extracted) = self.extract_with_pool(pool, documents, cancel).await;
        run.innovations = extracted
            .into_iter()
            .flat_map(|record| record.innovations)
            .collect();
        let output_empty = run.innovations.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            return Ok(());
        }

        self.drive_tail(run, pool, cancel).await
    }

    /// 组合 → 合成 → 评分排序 → 完成
    async fn drive_tail(
        &self,
        run: &mut PipelineRun,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        // 组合（同步，无外部调用）
        let innovation_count = run.innovations.len();
        if !self.enter_stage(run, Stage::Combining, innovation_count, cancel)? {
            return Ok(());
        }
        let candidates = self.combination.combine(&run.innovations);
        let mut report = StageReport::new(Stage::Combining, candidates.len());
        report.succeeded = candidates.len();
        let output_empty = candidates.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            return Ok(());
        }

        // 合成
        if !self.enter_stage(run, Stage::Synthesizing, candidates.len(), cancel)? {
            return Ok(());
        }
        let (report, synthesized) = self
            .synthesize_ideas(pool, &run.topic, candidates, &run.innovations, cancel)
            .await;
        let output_empty = synthesized.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            if matches!(run.failure_reason, Some(FailureReason::Cancelled { .. })) {
                self.commit_partial_ideas(run, synthesized);
            }
            return Ok(());
        }

        // 评分排序（同步）
        if !self.enter_stage(run, Stage::Scoring, synthesized.len(), cancel)? {
            return Ok(());
        }
        let (report, valid) = revalidate(synthesized, &run.innovations);
        run.ideas = self.ranker.rank(valid);
        let output_empty = run.ideas.is_empty();
        if !self.conclude_stage(run, report, output_empty, cancel)? {
            return Ok(());
        }

        run.transition(RunState::Completed)?;
        info!("🎉 运行完成: 产出 {} 个想法", run.ideas.len());
        Ok(())
    }

    /// 取消时保留已完成合成的想法：校验、评分、排序后写入运行
    fn commit_partial_ideas(&self, run: &mut PipelineRun, synthesized: Vec<IdeaCandidate>) {
        if synthesized.is_empty() {
            return;
        }
        let (_, valid) = revalidate(synthesized, &run.innovations);
        run.ideas = self.ranker.rank(valid);
        info!("💾 取消前已合成的 {} 个想法已保留", run.ideas.len());
    }

    /// 进入阶段；已取消时运行直接失败并返回 `false`
    fn enter_stage(
        &self,
        run: &mut PipelineRun,
        stage: Stage,
        item_count: usize,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        if cancel.is_cancelled() {
            warn!("🛑 运行在进入 {} 前被取消", stage.label());
            run.fail(FailureReason::Cancelled { stage })?;
            return Ok(false);
        }
        run.transition(RunState::for_stage(stage))?;
        run.set_stage_status(stage, StageStatus::Running);
        log_stage_start(stage, item_count);
        Ok(true)
    }

    /// 结束阶段：合并错误、给出阶段结论；返回是否继续
    fn conclude_stage(
        &self,
        run: &mut PipelineRun,
        report: StageReport,
        output_empty: bool,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        let stage = report.stage;
        run.errors.extend(report.errors.iter().cloned());

        if cancel.is_cancelled() {
            run.set_stage_status(stage, StageStatus::Failed);
            log_stage_complete(stage, StageStatus::Failed, report.succeeded, report.total);
            warn!("🛑 运行在 {} 阶段被取消", stage.label());
            run.fail(FailureReason::Cancelled { stage })?;
            return Ok(false);
        }

        let status = report.status(self.config.failure_ceiling, output_empty);
        run.set_stage_status(stage, status);
        log_stage_complete(stage, status, report.succeeded, report.total);

        if status == StageStatus::Failed {
            let detail = report.failure_detail(output_empty);
            warn!("✗ {} 失败，运行提前结束: {}", stage.label(), detail);
            run.fail(FailureReason::StageFailed { stage, detail })?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn search_papers(
        &self,
        pool: &WorkerPool,
        topic: &str,
        cancel: &CancellationToken,
    ) -> (StageReport, Vec<Paper>) {
        let max_results = self.config.max_results;
        let search = self.search.clone();
        let retry = self.retry;
        let stage_cancel = cancel.child_token();

        let outcome = pool
            .run(
                Stage::Searching,
                vec![(topic.to_string(), topic.to_string())],
                &stage_cancel,
                move |ctx, query| {
                    let search = search.clone();
                    async move {
                        let label = ctx.to_string();
                        with_retry(&retry, &label, || search.search(&query, max_results)).await
                    }
                },
            )
            .await;

        let (report, batches) = tally(Stage::Searching, outcome);
        let mut seen = HashSet::new();
        let mut papers: Vec<Paper> = batches
            .into_iter()
            .flatten()
            .filter(|p| seen.insert(p.id.clone()))
            .collect();
        papers.truncate(max_results);
        info!("📄 检索到 {} 篇论文", papers.len());
        (report, papers)
    }

    async fn acquire_documents(
        &self,
        pool: &WorkerPool,
        papers: &[Paper],
        cancel: &CancellationToken,
    ) -> (StageReport, Vec<(Paper, ParsedDocument)>) {
        let acquirer = self.acquirer.clone();
        let stage_cancel = cancel.child_token();
        let items = papers.iter().map(|p| (p.id.clone(), p.clone())).collect();

        let outcome = pool
            .run(Stage::Acquiring, items, &stage_cancel, move |_, paper: Paper| {
                let acquirer = acquirer.clone();
                async move {
                    let document = acquirer.acquire(&paper).await?;
                    Ok((paper, document))
                }
            })
            .await;

        tally(Stage::Acquiring, outcome)
    }

    /// 对一批文档并发抽取创新点
    ///
    /// 供命令行 `extract` 子命令与完整运行共用
    pub async fn extract_documents(
        &self,
        documents: Vec<(Paper, ParsedDocument)>,
        cancel: &CancellationToken,
    ) -> (StageReport, Vec<ExtractedInnovations>) {
        let pool = WorkerPool::new(self.config.max_concurrent_requests);
        self.extract_with_pool(&pool, documents, cancel).await
    }

    async fn extract_with_pool(
        &self,
        pool: &WorkerPool,
        documents: Vec<(Paper, ParsedDocument)>,
        cancel: &CancellationToken,
    ) -> (StageReport, Vec<ExtractedInnovations>) {
        let extractor = self.extractor.clone();
        let stage_cancel = cancel.child_token();
        let items = documents
            .into_iter()
            .map(|(paper, doc)| (paper.id.clone(), (paper, doc)))
            .collect();

        let outcome = pool
            .run(
                Stage::Extracting,
                items,
                &stage_cancel,
                move |_, (paper, document): (Paper, ParsedDocument)| {
                    let extractor = extractor.clone();
                    async move {
                        let extraction = extractor.extract(&document, &paper.title).await?;
                        Ok(ExtractedInnovations {
                            paper,
                            innovations: extraction.innovations,
                            summary: extraction.summary,
                        })
                    }
                },
            )
            .await;

        tally(Stage::Extracting, outcome)
    }

    async fn synthesize_ideas(
        &self,
        pool: &WorkerPool,
        topic: &str,
        candidates: Vec<IdeaCandidate>,
        innovations: &[Innovation],
        cancel: &CancellationToken,
    ) -> (StageReport, Vec<IdeaCandidate>) {
        let by_id: HashMap<&str, &Innovation> =
            innovations.iter().map(|inv| (inv.id.as_str(), inv)).collect();
        let items = candidates
            .into_iter()
            .map(|candidate| {
                let sources: Vec<Innovation> = candidate
                    .source_innovation_ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).map(|inv| (*inv).clone()))
                    .collect();
                (candidate.id.clone(), (candidate, sources))
            })
            .collect();

        let synthesizer = self.synthesizer.clone();
        let topic = topic.to_string();
        let stage_cancel = cancel.child_token();

        let outcome = pool
            .run(
                Stage::Synthesizing,
                items,
                &stage_cancel,
                move |_, (candidate, sources): (IdeaCandidate, Vec<Innovation>)| {
                    let synthesizer = synthesizer.clone();
                    let topic = topic.clone();
                    async move {
                        let refs: Vec<&Innovation> = sources.iter().collect();
                        synthesizer.synthesize(&candidate, &refs, &topic).await
                    }
                },
            )
            .await;

        tally(Stage::Synthesizing, outcome)
    }
}

/// 汇总一个阶段的条目结果
fn tally<O>(stage: Stage, outcome: PoolOutcome<O>) -> (StageReport, Vec<O>) {
    let mut report = StageReport::new(stage, outcome.results.len() + outcome.skipped.len());
    report.record_skipped(outcome.skipped.len());

    let mut outputs = Vec::with_capacity(outcome.results.len());
    for ItemOutcome { ctx, result } in outcome.results {
        match result {
            Ok(output) => {
                report.record_success();
                outputs.push(output);
            }
            Err(e) => report.record_failure(&ctx, &e),
        }
    }
    (report, outputs)
}

/// 排序前按本次运行的创新点池重新校验候选
fn revalidate(
    candidates: Vec<IdeaCandidate>,
    innovations: &[Innovation],
) -> (StageReport, Vec<IdeaCandidate>) {
    let pool: HashMap<&str, &Innovation> =
        innovations.iter().map(|inv| (inv.id.as_str(), inv)).collect();
    let total = candidates.len();
    let mut report = StageReport::new(Stage::Scoring, total);
    let mut valid = Vec::with_capacity(total);

    for (idx, candidate) in candidates.into_iter().enumerate() {
        match check_candidate(&candidate, &pool) {
            Ok(()) => {
                report.record_success();
                valid.push(candidate);
            }
            Err(reason) => {
                let ctx = crate::workflow::ItemCtx::new(Stage::Scoring, idx + 1, total, candidate.id);
                report.record_failure(&ctx, &PipelineError::schema(reason));
            }
        }
    }
    (report, valid)
}
