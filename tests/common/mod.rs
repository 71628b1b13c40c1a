#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use idea_creator::clients::{Generator, SearchClient};
use idea_creator::config::Config;
use idea_creator::error::PipelineError;
use idea_creator::models::{Innovation, Paper, ParsedDocument};
use idea_creator::orchestrator::PipelineOrchestrator;
use idea_creator::services::{DocumentAcquirer, InnovationCache};

/// 快速、无缓存、无抓取间隔的测试配置
pub fn test_config() -> Config {
    Config {
        max_concurrent_requests: 3,
        request_timeout_secs: 5,
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        rate_limit_backoff_ms: 1,
        crawl_delay_ms: 0,
        cache_enabled: false,
        ..Config::default()
    }
}

pub fn paper_id(n: usize) -> String {
    format!("2401.{:05}", n)
}

pub fn papers(count: usize) -> Vec<Paper> {
    (1..=count)
        .map(|n| {
            let mut paper = Paper::new(paper_id(n), format!("Paper number {}", n));
            paper.abstract_text = format!("Abstract of paper {}", n);
            paper.authors = vec![format!("Author {}", n)];
            paper.categories = BTreeSet::from(["cs.LG".to_string()]);
            paper.source_url = format!("https://arxiv.org/abs/{}", paper_id(n));
            paper
        })
        .collect()
}

/// 去掉编号中的非字母数字字符，得到不会被切开的词元
fn token_of(id: &str) -> String {
    id.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// `ScriptedGenerator` 为第 `n` 篇论文抽取出的第一个（algorithm 类）创新点标题
pub fn routing_title(n: usize) -> String {
    let t = token_of(&paper_id(n));
    format!("method{t}a routing{t}a")
}

// ========== 检索 ==========

pub struct FakeSearch {
    papers: Vec<Paper>,
    error: Option<PipelineError>,
    pub calls: AtomicUsize,
}

impl FakeSearch {
    /// 无视 `max_results`，总是返回全部论文
    pub fn returning(papers: Vec<Paper>) -> Self {
        Self {
            papers,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: PipelineError) -> Self {
        Self {
            papers: Vec::new(),
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchClient for FakeSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Paper>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.papers.clone()),
        }
    }
}

// ========== 文档获取 ==========

pub struct FakeAcquirer {
    failing: HashSet<String>,
}

impl FakeAcquirer {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
        }
    }

    pub fn failing_on(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            failing: ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DocumentAcquirer for FakeAcquirer {
    async fn acquire(&self, paper: &Paper) -> Result<ParsedDocument, PipelineError> {
        if self.failing.contains(&paper.id) {
            return Err(PipelineError::fatal("HTTP 404: not found"));
        }
        let mut sections = BTreeMap::new();
        sections.insert(
            "abstract".to_string(),
            format!("PAPER[{}] {}", paper.id, paper.abstract_text),
        );
        sections.insert("introduction".to_string(), "Some introduction.".to_string());
        Ok(ParsedDocument::new(paper.id.clone(), sections))
    }
}

// ========== 生成能力 ==========

/// 按提示词内容给出确定性回答的生成能力
pub struct ScriptedGenerator {
    failing_papers: HashSet<String>,
    failing_syntheses: Vec<BTreeSet<String>>,
    quota_exhausted: bool,
    cancel_on_extract: Option<CancellationToken>,
    cancel_on_synthesis: Option<(CancellationToken, usize)>,
    pub extraction_calls: AtomicUsize,
    pub synthesis_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            failing_papers: HashSet::new(),
            failing_syntheses: Vec::new(),
            quota_exhausted: false,
            cancel_on_extract: None,
            cancel_on_synthesis: None,
            extraction_calls: AtomicUsize::new(0),
            synthesis_calls: AtomicUsize::new(0),
        }
    }

    /// 这些论文的抽取调用返回不可重试的错误
    pub fn failing_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.failing_papers = ids.into_iter().collect();
        self
    }

    /// 所有调用都返回配额耗尽
    pub fn quota_exhausted(mut self) -> Self {
        self.quota_exhausted = true;
        self
    }

    /// 第一次抽取调用时触发取消
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_extract = Some(token);
        self
    }

    /// 来源标题恰好为 `titles` 的候选，合成时总是返回无法解析的内容
    pub fn failing_synthesis_for(mut self, titles: impl IntoIterator<Item = String>) -> Self {
        self.failing_syntheses.push(titles.into_iter().collect());
        self
    }

    /// 第 `after` 次合成调用返回前触发取消
    pub fn cancelling_synthesis_after(mut self, token: CancellationToken, after: usize) -> Self {
        self.cancel_on_synthesis = Some((token, after));
        self
    }

    fn extraction_reply(&self, prompt: &str) -> Result<String, PipelineError> {
        self.extraction_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_extract {
            token.cancel();
        }
        let id = prompt
            .split("PAPER[")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .ok_or_else(|| PipelineError::fatal("prompt without paper marker"))?
            .to_string();
        if self.failing_papers.contains(&id) {
            return Err(PipelineError::fatal("HTTP 400: rejected"));
        }
        let t = token_of(&id);
        Ok(format!(
            r#"{{"innovations":[
                {{"title":"method{t}a routing{t}a","description":"Routing idea {t}a","category":"algorithm","novelty_score":0.8,"confidence":0.7}},
                {{"title":"memory{t}b cache{t}b","description":"Memory idea {t}b","category":"architecture","novelty_score":0.6,"confidence":0.9}}
            ],"summary":"two ideas from {id}"}}"#
        ))
    }

    fn synthesis_reply(&self, prompt: &str) -> Result<String, PipelineError> {
        let call = self.synthesis_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((token, after)) = &self.cancel_on_synthesis {
            if call >= *after {
                token.cancel();
            }
        }
        let titles: Vec<&str> = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .filter_map(|line| line.split(':').next())
            .collect();
        let title_set: BTreeSet<String> = titles.iter().map(|t| t.to_string()).collect();
        if self.failing_syntheses.contains(&title_set) {
            return Ok("no idea, sorry".to_string());
        }
        let description = format!("Combine {}", titles.join(" with "));
        Ok(serde_json::json!({
            "title": format!("Idea from {} sources", titles.len()),
            "description": description,
            "implementation_path": "prototype, then benchmark",
            "feasibility_score": 0.7,
            "impact_potential": 0.6,
            "research_directions": ["scaling"]
        })
        .to_string())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        user_message: &str,
        _system_message: Option<&str>,
    ) -> Result<String, PipelineError> {
        if self.quota_exhausted {
            return Err(PipelineError::QuotaExceeded {
                message: "insufficient_quota".to_string(),
            });
        }
        if user_message.contains("研究主题：") {
            self.synthesis_reply(user_message)
        } else {
            self.extraction_reply(user_message)
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// 依次返回预设回答并记录调用次数
pub struct QueueGenerator {
    replies: Mutex<VecDeque<Result<String, PipelineError>>>,
    pub calls: AtomicUsize,
}

impl QueueGenerator {
    pub fn new(replies: Vec<Result<String, PipelineError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Generator for QueueGenerator {
    async fn generate(
        &self,
        _user_message: &str,
        _system_message: Option<&str>,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("not json".to_string()))
    }

    fn model_name(&self) -> &str {
        "queue"
    }
}

pub fn orchestrator(
    config: Config,
    search: FakeSearch,
    acquirer: FakeAcquirer,
    generator: Arc<ScriptedGenerator>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        config,
        Arc::new(search),
        Arc::new(acquirer),
        generator,
        InnovationCache::disabled(),
    )
}

/// 3 篇论文 × 2 个创新点，3 个类别
pub fn fixture_innovations() -> (Vec<Paper>, Vec<Innovation>) {
    let papers = papers(3);
    let categories = ["algorithm", "architecture", "application"];
    let mut innovations = Vec::new();
    for (p, paper) in papers.iter().enumerate() {
        for j in 0..2 {
            let t = format!("{}{}", token_of(&paper.id), j);
            innovations.push(Innovation {
                id: format!("{}-i{:02}", paper.id, j + 1),
                paper_id: paper.id.clone(),
                title: format!("title{t} words{t}"),
                description: format!("description{t}"),
                category: categories[(p + j) % 3].to_string(),
                novelty_score: 0.5 + 0.1 * j as f64,
                confidence: 0.9 - 0.1 * p as f64,
                impact: None,
                methodology: None,
            });
        }
    }
    (papers, innovations)
}
