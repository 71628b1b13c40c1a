use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use idea_creator::api::{self, ApiState};
use idea_creator::clients::{ArxivClient, Generator, LlmClient, SearchClient};
use idea_creator::config::{Config, LlmProvider};
use idea_creator::models::{
    load_json_dir, save_json, CombinationType, ExtractedInnovations, Innovation, Paper,
    ParsedDocument, ParsedPaperFile,
};
use idea_creator::orchestrator::PipelineOrchestrator;
use idea_creator::services::combination::check_candidate;
use idea_creator::services::{
    with_retry, CombinationEngine, DocumentAcquirer, HttpAcquirer, InnovationCache, Ranker,
    RetryPolicy, SectionParser,
};
use idea_creator::utils::logging::{self, truncate_text};

/// 智能论文创新点生成器
#[derive(Debug, Parser)]
#[command(name = "idea_creator", version, about = "从论文中发现并组合创新点")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 生成能力提供方: openai, deepseek, custom
    #[arg(long, global = true)]
    provider: Option<String>,

    /// TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 检索 arXiv 论文
    Search {
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        max_results: Option<usize>,
        #[arg(short, long)]
        category: Option<String>,
        /// 写出 papers.json 的目录
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// 把本地 .txt / .md / .html 论文切分为章节
    Parse {
        #[arg(short, long, default_value = "data/papers")]
        input_dir: PathBuf,
        #[arg(short, long, default_value = "data/extracted")]
        output_dir: PathBuf,
    },
    /// 从解析结果中抽取创新点
    Extract {
        #[arg(short, long, default_value = "data/extracted")]
        input_dir: PathBuf,
        #[arg(short, long, default_value = "data/innovations")]
        output_dir: PathBuf,
    },
    /// 生成研究想法
    Generate {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value = "data/innovations")]
        input_dir: PathBuf,
        #[arg(short, long, default_value = "data/results")]
        output_dir: PathBuf,
        #[arg(long)]
        max_papers: Option<usize>,
    },
    /// 启动 HTTP 服务
    Web {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// 离线自检：组合与排序的不变量
    Test,
    /// 创建数据目录与 .env 模板
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = &cli.provider {
        config.llm_provider = provider.parse::<LlmProvider>()?;
    }
    if cli.verbose {
        config.verbose_logging = true;
    }
    logging::init(config.verbose_logging);

    match cli.command {
        Command::Search {
            query,
            max_results,
            category,
            output_dir,
        } => run_search(&config, &query, max_results, category, output_dir).await,
        Command::Parse {
            input_dir,
            output_dir,
        } => run_parse(&input_dir, &output_dir).await,
        Command::Extract {
            input_dir,
            output_dir,
        } => run_extract(&config, &input_dir, &output_dir).await,
        Command::Generate {
            topic,
            input_dir,
            output_dir,
            max_papers,
        } => run_generate(&config, &topic, &input_dir, &output_dir, max_papers).await,
        Command::Web { host, port } => {
            if let Some(host) = host {
                config.web_host = host;
            }
            if let Some(port) = port {
                config.web_port = port;
            }
            run_web(config).await
        }
        Command::Test => run_self_check(&config),
        Command::Setup => run_setup(&config).await,
    }
}

/// 构建三个外部能力
fn build_capabilities(
    config: &Config,
) -> Result<(Arc<dyn SearchClient>, Arc<dyn DocumentAcquirer>, Arc<dyn Generator>)> {
    let search: Arc<dyn SearchClient> = Arc::new(ArxivClient::new(config)?);
    let acquirer: Arc<dyn DocumentAcquirer> = Arc::new(HttpAcquirer::new(config)?);
    let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(config));
    Ok((search, acquirer, generator))
}

fn require_api_key(config: &Config) -> Result<()> {
    if config.llm_api_key.trim().is_empty() {
        bail!("未配置生成能力的 API 密钥 (LLM_API_KEY / DEEPSEEK_API_KEY / OPENAI_API_KEY)");
    }
    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<PipelineOrchestrator> {
    let (search, acquirer, generator) = build_capabilities(config)?;
    Ok(PipelineOrchestrator::new(
        config.clone(),
        search,
        acquirer,
        generator,
        InnovationCache::new(config),
    ))
}

/// 论文编号可能含 `/`（旧式 arXiv 编号），写文件前替换掉
fn file_stem_for(id: &str) -> String {
    id.replace(['/', '\\', ':'], "_")
}

async fn run_search(
    config: &Config,
    query: &str,
    max_results: Option<usize>,
    category: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let max_results = max_results.unwrap_or(config.max_results);
    info!("🔍 开始检索论文: {}", query);

    let client = ArxivClient::new(config)?.with_category(category);
    let retry = RetryPolicy::from_config(config);
    let papers = with_retry(&retry, "[检索]", || client.search(query, max_results)).await?;

    if papers.is_empty() {
        warn!("⚠️ 未找到相关论文");
        return Ok(());
    }

    info!("找到 {} 篇论文", papers.len());
    for (i, paper) in papers.iter().enumerate() {
        info!("{}. {}", i + 1, paper.title);
        info!("   作者: {}", paper.authors.join(", "));
        info!(
            "   类别: {}",
            paper.categories.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        if let Some(published) = &paper.published {
            info!("   发布日期: {}", published);
        }
        info!("   摘要: {}", truncate_text(&paper.abstract_text, 200));
        info!("---");
    }

    if let Some(dir) = output_dir {
        let path = dir.join("papers.json");
        save_json(&path, &papers).await?;
        info!("💾 已写出: {}", path.display());
    }
    Ok(())
}

async fn run_parse(input_dir: &Path, output_dir: &Path) -> Result<()> {
    if !input_dir.exists() {
        bail!("输入目录不存在: {}", input_dir.display());
    }
    info!("📁 开始解析论文: {}", input_dir.display());

    let parser = SectionParser::new();
    let mut entries = tokio::fs::read_dir(input_dir)
        .await
        .with_context(|| format!("无法读取目录: {}", input_dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if matches!(ext.as_str(), "txt" | "md" | "html" | "htm") {
            files.push(path);
        }
    }
    files.sort();

    let mut parsed_count = 0;
    let mut section_count = 0;
    for path in &files {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("paper")
            .to_string();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                error!("[{}] ❌ 读取失败: {}", stem, e);
                continue;
            }
        };

        let is_html = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
            .unwrap_or(false);
        let sections = if is_html {
            parser.parse_html(&content)
        } else {
            parser.parse_text(&content)
        };
        if sections.is_empty() {
            warn!("[{}] ⚠️ 没有可用的正文，跳过", stem);
            continue;
        }

        let title = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('<'))
            .map(|line| line.trim_start_matches('#').trim().to_string())
            .unwrap_or_else(|| stem.clone());
        let mut paper = Paper::new(stem.clone(), title);
        if let Some(abstract_text) = sections.get("abstract") {
            paper.abstract_text = abstract_text.clone();
        }

        section_count += sections.len();
        let record = ParsedPaperFile {
            document: ParsedDocument::new(stem.clone(), sections),
            paper,
        };
        let out = output_dir.join(format!("{}_parsed.json", stem));
        save_json(&out, &record).await?;
        info!("[{}] ✓ {} 个章节", stem, record.document.sections.len());
        parsed_count += 1;
    }

    if parsed_count == 0 {
        warn!("⚠️ 没有成功解析的论文");
    } else {
        info!(
            "成功解析 {} 篇论文，共 {} 个章节，平均 {:.1} 个",
            parsed_count,
            section_count,
            section_count as f64 / parsed_count as f64
        );
    }
    Ok(())
}

async fn run_extract(config: &Config, input_dir: &Path, output_dir: &Path) -> Result<()> {
    require_api_key(config)?;
    let parsed: Vec<ParsedPaperFile> = load_json_dir(input_dir, "_parsed.json").await?;
    if parsed.is_empty() {
        bail!("未找到解析文件: {}", input_dir.display());
    }
    info!("找到 {} 个解析文件", parsed.len());

    let orchestrator = build_orchestrator(config)?;
    let documents = parsed
        .into_iter()
        .map(|file| (file.paper, file.document))
        .collect();
    let (report, extracted) = orchestrator
        .extract_documents(documents, &CancellationToken::new())
        .await;

    for record in &extracted {
        let out = output_dir.join(format!("{}_innovations.json", file_stem_for(&record.paper.id)));
        save_json(&out, record).await?;
    }

    let status = report.status(config.failure_ceiling, extracted.is_empty());
    logging::log_stage_complete(report.stage, status, report.succeeded, report.total);
    for err in &report.errors {
        warn!("  {} [{}] {}", err.item, err.kind.as_str(), err.message);
    }
    if extracted.is_empty() {
        bail!("没有任何论文抽取成功");
    }
    Ok(())
}

async fn run_generate(
    config: &Config,
    topic: &str,
    input_dir: &Path,
    output_dir: &Path,
    max_papers: Option<usize>,
) -> Result<()> {
    require_api_key(config)?;
    let config = match max_papers {
        Some(n) => config.with_max_results(n),
        None => config.clone(),
    };
    let orchestrator = build_orchestrator(&config)?;

    let existing: Vec<ExtractedInnovations> = if input_dir.exists() {
        load_json_dir(input_dir, "_innovations.json").await?
    } else {
        Vec::new()
    };

    let run = if existing.is_empty() {
        info!("未找到创新点文件，运行完整流水线");
        orchestrator.run(topic).await?
    } else {
        info!("找到 {} 个创新点文件，从组合阶段开始", existing.len());
        let mut papers = Vec::with_capacity(existing.len());
        let mut innovations = Vec::new();
        for record in existing {
            innovations.extend(record.innovations);
            papers.push(record.paper);
        }
        orchestrator
            .run_from_innovations(topic, papers, innovations)
            .await?
    };

    let out = output_dir.join(format!("{}_report.json", run.id));
    save_json(&out, &run.report()).await?;
    info!("💾 运行报告已写出: {}", out.display());

    for (rank, idea) in run.ideas.iter().enumerate() {
        info!(
            "#{} [{:.3}] {} ({})",
            rank + 1,
            idea.composite_score,
            idea.title,
            idea.combination_type.as_str()
        );
    }
    Ok(())
}

async fn run_web(config: Config) -> Result<()> {
    let (search, acquirer, generator) = build_capabilities(&config)?;
    let state = ApiState {
        cache: InnovationCache::new(&config),
        config,
        search,
        acquirer,
        generator,
    };
    api::serve(state).await?;
    Ok(())
}

/// 自检用的创新点池：3 篇论文 × 2 个创新点，3 个类别
fn fixture_pool() -> Vec<Innovation> {
    let entries = [
        ("p1", "algorithm", "Sparse attention routing", 0.9, 0.8),
        ("p1", "architecture", "Hierarchical memory blocks", 0.7, 0.9),
        ("p2", "algorithm", "Contrastive retrieval loss", 0.8, 0.7),
        ("p2", "application", "Clinical note summarisation", 0.6, 0.8),
        ("p3", "architecture", "Mixture of adapters", 0.75, 0.85),
        ("p3", "application", "Code review assistant", 0.65, 0.6),
    ];
    entries.iter()
        .enumerate()
        .map(|(i, (paper, category, title, novelty, confidence))| Innovation {
            id: format!("{}-i{:02}", paper, i + 1),
            paper_id: paper.to_string(),
            title: title.to_string(),
            description: format!("{} ({})", title, category),
            category: category.to_string(),
            novelty_score: *novelty,
            confidence: *confidence,
            impact: None,
            methodology: None,
        })
        .collect()
}

fn run_self_check(config: &Config) -> Result<()> {
    info!("🧪 运行离线自检...");
    config.validate()?;
    info!("✓ 配置校验通过");

    let pool = fixture_pool();
    let candidates = CombinationEngine::new(config).combine(&pool);
    if candidates.is_empty() {
        bail!("组合引擎没有产出候选");
    }
    let ranked = Ranker::new(config).rank(candidates);

    let by_id: HashMap<&str, &Innovation> = pool.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut seen: BTreeSet<(BTreeSet<String>, CombinationType)> = BTreeSet::new();
    let mut violations = Vec::new();
    for idea in &ranked {
        if let Err(reason) = check_candidate(idea, &by_id) {
            violations.push(format!("{}: {}", idea.id, reason));
        }
        let in_range = idea
            .scores()
            .iter()
            .all(|s| (0.0..=1.0).contains(s));
        if !in_range {
            violations.push(format!("{}: 评分越界", idea.id));
        }
        if !seen.insert(idea.dedup_key()) {
            violations.push(format!("{}: 重复候选", idea.id));
        }
    }

    if !violations.is_empty() {
        for v in &violations {
            error!("❌ {}", v);
        }
        bail!("自检失败: {} 项违反不变量", violations.len());
    }
    info!("✓ 自检通过: {} 个候选全部满足不变量", ranked.len());
    Ok(())
}

const ENV_TEMPLATE: &str = "# 生成能力配置
AI_PROVIDER=deepseek
LLM_API_KEY=your_api_key_here

# 运行参数
MAX_CONCURRENT_REQUESTS=4
TIMEOUT=30
MAX_RETRIES=3
CRAWL_DELAY_MS=1000
MAX_RESULTS=100
";

async fn run_setup(config: &Config) -> Result<()> {
    info!("初始化项目...");
    let data_dir = &config.data_dir;
    for sub in ["papers", "extracted", "innovations", "results", "cache"] {
        let dir = data_dir.join(sub);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("无法创建目录: {}", dir.display()))?;
        info!("创建目录: {}", dir.display());
    }

    let env_file = Path::new(".env");
    if !env_file.exists() {
        tokio::fs::write(env_file, ENV_TEMPLATE)
            .await
            .context("无法写入 .env")?;
        info!("创建配置文件: .env");
    }
    info!("项目初始化完成，请在 .env 中配置 API 密钥");
    Ok(())
}
