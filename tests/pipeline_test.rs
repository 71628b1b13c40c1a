mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::*;
use idea_creator::config::Config;
use idea_creator::error::{ErrorKind, PipelineError};
use idea_creator::models::{FailureReason, ParsedDocument, PipelineRun, RunState, Stage, StageStatus};
use idea_creator::services::combination::candidate_id;
use idea_creator::services::{InnovationCache, InnovationExtractor};

fn assert_idea_invariants(run: &PipelineRun) {
    let pool: HashMap<&str, &str> = run
        .innovations
        .iter()
        .map(|inv| (inv.id.as_str(), inv.paper_id.as_str()))
        .collect();
    let paper_ids: HashSet<&str> = run.papers.iter().map(|p| p.id.as_str()).collect();
    for inv in &run.innovations {
        assert!(paper_ids.contains(inv.paper_id.as_str()), "{} 引用了未知论文", inv.id);
    }

    let mut keys = HashSet::new();
    for idea in &run.ideas {
        let papers: HashSet<&str> = idea
            .source_innovation_ids
            .iter()
            .map(|id| *pool.get(id.as_str()).expect("来源必须在创新点池中"))
            .collect();
        assert!(papers.len() >= 2, "{} 只涉及一篇论文", idea.id);
        for score in idea.scores().iter().chain([idea.composite_score].iter()) {
            assert!((0.0..=1.0).contains(score), "{} 评分越界", idea.id);
        }
        assert!(keys.insert(idea.dedup_key()), "{} 重复", idea.id);
    }
    for pair in run.ideas.windows(2) {
        assert!(pair[0].composite_score >= pair[1].composite_score);
    }
}

#[tokio::test]
async fn full_run_completes_with_valid_ideas() {
    let generator = Arc::new(ScriptedGenerator::new());
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(papers(3)),
        FakeAcquirer::new(),
        generator.clone(),
    );

    let run = orchestrator.run("retrieval augmented generation").await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    for stage in Stage::ALL {
        assert_eq!(run.stage_status(stage), StageStatus::Success, "{}", stage);
    }
    assert!(run.errors.is_empty());
    assert_eq!(run.papers.len(), 3);
    assert_eq!(run.innovations.len(), 6);
    assert!(!run.ideas.is_empty());
    assert!(run.completed_at.is_some());
    assert_eq!(generator.extraction_calls.load(Ordering::SeqCst), 3);
    assert_idea_invariants(&run);

    let report = run.report();
    assert_eq!(report.run.idea_count, run.ideas.len());
    assert_eq!(report.run.analysis.paper_count, 3);
}

#[tokio::test]
async fn paper_count_never_exceeds_max_results() {
    let config = Config {
        max_results: 4,
        ..test_config()
    };
    let orchestrator = orchestrator(
        config,
        FakeSearch::returning(papers(10)),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new()),
    );

    let run = orchestrator.run("graph neural networks").await.unwrap();

    assert!(run.papers.len() <= 4);
    assert_eq!(run.state, RunState::Completed);
    assert_idea_invariants(&run);
}

#[tokio::test]
async fn ninety_percent_acquisition_failures_fail_the_run() {
    let all = papers(10);
    let failing: Vec<String> = all.iter().skip(1).map(|p| p.id.clone()).collect();
    let generator = Arc::new(ScriptedGenerator::new());
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(all),
        FakeAcquirer::failing_on(failing),
        generator.clone(),
    );

    let run = orchestrator.run("sparse attention").await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.stage_status(Stage::Searching), StageStatus::Success);
    assert_eq!(run.stage_status(Stage::Acquiring), StageStatus::Failed);
    assert_eq!(run.stage_status(Stage::Extracting), StageStatus::Pending);
    assert_eq!(run.errors.len(), 9);
    assert!(run.errors.iter().all(|e| e.stage == Stage::Acquiring));
    assert!(run.ideas.is_empty());
    assert!(matches!(
        run.failure_reason,
        Some(FailureReason::StageFailed {
            stage: Stage::Acquiring,
            ..
        })
    ));
    assert_eq!(generator.extraction_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_extraction_failure_is_partial_success() {
    let all = papers(10);
    let failing_id = all[2].id.clone();
    let generator = Arc::new(ScriptedGenerator::new().failing_on([failing_id.clone()]));
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(all),
        FakeAcquirer::new(),
        generator,
    );

    let run = orchestrator.run("contrastive learning").await.unwrap();

    assert_eq!(run.stage_status(Stage::Extracting), StageStatus::PartialSuccess);
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.innovations.len(), 18);
    assert!(run.innovations.iter().all(|inv| inv.paper_id != failing_id));
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].item, failing_id);
    assert_eq!(run.errors[0].stage, Stage::Extracting);
    assert_idea_invariants(&run);
}

#[tokio::test]
async fn search_failure_fails_the_first_stage() {
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::failing(PipelineError::fatal("HTTP 400: bad query")),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new()),
    );

    let run = orchestrator.run("anything").await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.stage_status(Stage::Searching), StageStatus::Failed);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].kind, ErrorKind::Fatal);
}

#[tokio::test]
async fn empty_search_result_fails_the_run() {
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(Vec::new()),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new()),
    );

    let run = orchestrator.run("nothing matches").await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.stage_status(Stage::Searching), StageStatus::Failed);
    assert!(run.errors.is_empty());
}

#[tokio::test]
async fn quota_exhaustion_fails_extraction_and_skips_the_rest() {
    let config = Config {
        max_concurrent_requests: 1,
        ..test_config()
    };
    let orchestrator = orchestrator(
        config,
        FakeSearch::returning(papers(5)),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new().quota_exhausted()),
    );

    let run = orchestrator.run("diffusion models").await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.stage_status(Stage::Acquiring), StageStatus::Success);
    assert_eq!(run.stage_status(Stage::Extracting), StageStatus::Failed);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].kind, ErrorKind::QuotaExceeded);
    assert_eq!(run.papers.len(), 5);
}

#[tokio::test]
async fn cancellation_before_start_fails_immediately() {
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(papers(3)),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new()),
    );
    let token = CancellationToken::new();
    token.cancel();

    let run = orchestrator.run_with_cancel("topic", token).await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(
        run.failure_reason,
        Some(FailureReason::Cancelled {
            stage: Stage::Searching
        })
    );
    assert!(run.papers.is_empty());
}

#[tokio::test]
async fn cancellation_mid_stage_keeps_committed_results() {
    let token = CancellationToken::new();
    let generator = Arc::new(ScriptedGenerator::new().cancelling(token.clone()));
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(papers(10)),
        FakeAcquirer::new(),
        generator.clone(),
    );

    let run = orchestrator.run_with_cancel("topic", token).await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(
        run.failure_reason,
        Some(FailureReason::Cancelled {
            stage: Stage::Extracting
        })
    );
    assert_eq!(run.stage_status(Stage::Acquiring), StageStatus::Success);
    assert_eq!(run.papers.len(), 10);
    assert!(generator.extraction_calls.load(Ordering::SeqCst) <= 3);
    assert!(run.ideas.is_empty());
}

#[tokio::test]
async fn run_from_innovations_starts_at_combining() {
    let (papers, mut innovations) = fixture_innovations();
    let mut orphan = innovations[0].clone();
    orphan.id = "ghost-i01".to_string();
    orphan.paper_id = "ghost".to_string();
    innovations.push(orphan);

    let generator = Arc::new(ScriptedGenerator::new());
    let orchestrator = orchestrator(
        test_config(),
        FakeSearch::returning(Vec::new()),
        FakeAcquirer::new(),
        generator.clone(),
    );

    let run = orchestrator
        .run_from_innovations("multimodal agents", papers, innovations)
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.stage_status(Stage::Searching), StageStatus::Success);
    assert_eq!(run.stage_status(Stage::Acquiring), StageStatus::Success);
    assert_eq!(run.stage_status(Stage::Extracting), StageStatus::Success);
    assert_eq!(run.innovations.len(), 6);
    assert_eq!(generator.extraction_calls.load(Ordering::SeqCst), 0);
    assert!(generator.synthesis_calls.load(Ordering::SeqCst) > 0);
    assert_idea_invariants(&run);
}

#[tokio::test]
async fn run_from_innovations_caps_papers_at_max_results() {
    let (mut papers, innovations) = fixture_innovations();
    papers.reverse();
    let config = Config {
        max_results: 2,
        ..test_config()
    };
    let orchestrator = orchestrator(
        config,
        FakeSearch::returning(Vec::new()),
        FakeAcquirer::new(),
        Arc::new(ScriptedGenerator::new()),
    );

    let run = orchestrator
        .run_from_innovations("multimodal agents", papers, innovations)
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    let ids: Vec<String> = run.papers.iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![paper_id(1), paper_id(2)]);
    assert_eq!(run.innovations.len(), 4);
    assert!(run.innovations.iter().all(|inv| inv.paper_id != paper_id(3)));
    assert_idea_invariants(&run);
}

// ========== 合成阶段 ==========

#[tokio::test]
async fn exhausted_synthesis_drops_only_that_candidate() {
    let generator = Arc::new(
        ScriptedGenerator::new().failing_synthesis_for([routing_title(1), routing_title(2)]),
    );
    let config = Config {
        max_combination_size: 2,
        ..test_config()
    };
    let orchestrator = orchestrator(
        config,
        FakeSearch::returning(papers(3)),
        FakeAcquirer::new(),
        generator.clone(),
    );

    let run = orchestrator.run("sparse attention").await.unwrap();

    let sources: BTreeSet<String> = [format!("{}-i01", paper_id(1)), format!("{}-i01", paper_id(2))]
        .into_iter()
        .collect();
    let dropped = candidate_id(&sources);

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.stage_status(Stage::Synthesizing), StageStatus::PartialSuccess);
    let synthesis_errors: Vec<_> = run
        .errors
        .iter()
        .filter(|e| e.stage == Stage::Synthesizing)
        .collect();
    assert_eq!(synthesis_errors.len(), 1);
    assert_eq!(synthesis_errors[0].item, dropped);
    assert_eq!(synthesis_errors[0].kind, ErrorKind::SchemaValidation);
    assert!(run.ideas.iter().all(|idea| idea.id != dropped));
    assert!(!run.ideas.is_empty());
    // 12 个候选，失败的那个用满 3 次尝试
    assert_eq!(generator.synthesis_calls.load(Ordering::SeqCst), 11 + 3);
    assert_idea_invariants(&run);
}

#[tokio::test]
async fn cancellation_mid_synthesis_keeps_finished_ideas() {
    let token = CancellationToken::new();
    let generator = Arc::new(ScriptedGenerator::new().cancelling_synthesis_after(token.clone(), 2));
    let config = Config {
        max_concurrent_requests: 1,
        ..test_config()
    };
    let orchestrator = orchestrator(
        config,
        FakeSearch::returning(papers(3)),
        FakeAcquirer::new(),
        generator.clone(),
    );

    let run = orchestrator.run_with_cancel("topic", token).await.unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(
        run.failure_reason,
        Some(FailureReason::Cancelled {
            stage: Stage::Synthesizing
        })
    );
    assert_eq!(run.stage_status(Stage::Synthesizing), StageStatus::Failed);
    assert_eq!(generator.synthesis_calls.load(Ordering::SeqCst), 2);
    assert!(!run.ideas.is_empty());
    assert!(run.ideas.len() <= 2);
    for idea in &run.ideas {
        assert_eq!(idea.implementation_path, "prototype, then benchmark");
        assert!(idea.composite_score > 0.0);
    }
    assert_idea_invariants(&run);
}

// ========== 抽取重试 ==========

fn document() -> ParsedDocument {
    let mut sections = BTreeMap::new();
    sections.insert("abstract".to_string(), "We route tokens sparsely.".to_string());
    ParsedDocument::new("2401.00001", sections)
}

const VALID_EXTRACTION: &str = r#"{"innovations":[{"title":"Sparse routing","description":"Routes tokens","category":"algorithm","novelty_score":0.8,"confidence":0.7}],"summary":"one"}"#;

#[tokio::test]
async fn schema_failures_retry_with_exactly_three_calls() {
    let generator = Arc::new(QueueGenerator::new(vec![
        Ok("I cannot answer in JSON".to_string()),
        Ok(r#"{"innovations":[]}"#.to_string()),
        Ok(VALID_EXTRACTION.to_string()),
    ]));
    let extractor =
        InnovationExtractor::new(generator.clone(), InnovationCache::disabled(), &test_config());

    let extraction = tokio_test::assert_ok!(extractor.extract(&document(), "Sparse").await);

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert_eq!(extraction.innovations.len(), 1);
    assert_eq!(extraction.innovations[0].id, "2401.00001-i01");
    assert!(!extraction.cached);
}

#[tokio::test]
async fn schema_attempts_are_bounded() {
    let generator = Arc::new(QueueGenerator::new(Vec::new()));
    let extractor =
        InnovationExtractor::new(generator.clone(), InnovationCache::disabled(), &test_config());

    let err = tokio_test::assert_err!(extractor.extract(&document(), "Sparse").await);

    assert!(matches!(err, PipelineError::SchemaValidation { .. }));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_errors_are_retried_inside_one_schema_attempt() {
    let generator = Arc::new(QueueGenerator::new(vec![
        Err(PipelineError::transient("connection reset")),
        Ok(VALID_EXTRACTION.to_string()),
    ]));
    let extractor =
        InnovationExtractor::new(generator.clone(), InnovationCache::disabled(), &test_config());

    tokio_test::assert_ok!(extractor.extract(&document(), "Sparse").await);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_hit_skips_the_generator() {
    let config = Config {
        cache_enabled: true,
        ..test_config()
    };
    let generator = Arc::new(QueueGenerator::new(vec![Ok(VALID_EXTRACTION.to_string())]));
    let extractor = InnovationExtractor::new(generator.clone(), InnovationCache::new(&config), &config);

    let first = extractor.extract(&document(), "Sparse").await.unwrap();
    let second = extractor.extract(&document(), "Sparse").await.unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.innovations, second.innovations);
}
