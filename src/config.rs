//! 运行配置
//!
//! 每次运行持有一个不可变的 [`Config`]，显式传给编排器和每个阶段，不读全局状态。
//!
//! 加载顺序：`Config::default()` → 可选的 TOML 文件 → 环境变量。

use crate::error::{AppError, AppResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 生成能力的提供方
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "custom")]
    Custom,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1",
            LlmProvider::Custom => "http://localhost:8080/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4",
            LlmProvider::DeepSeek => "deepseek-chat",
            LlmProvider::Custom => "default",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Custom => "custom",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            "custom" => Ok(LlmProvider::Custom),
            other => Err(AppError::invalid_config(
                "llm_provider",
                format!("未知的提供方 '{}'，可选 openai / deepseek / custom", other),
            )),
        }
    }
}

/// 启发式预评分权重
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicWeights {
    pub novelty: f64,
    pub confidence: f64,
    pub diversity: f64,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            novelty: 0.5,
            confidence: 0.3,
            diversity: 0.2,
        }
    }
}

/// 综合评分权重（计算时归一化）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub feasibility: f64,
    pub novelty: f64,
    pub impact: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            feasibility: 1.0,
            novelty: 1.0,
            impact: 1.0,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.feasibility + self.novelty + self.impact
    }
}

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 生成能力 ---
    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    /// 为空时使用提供方的默认地址
    pub llm_api_base_url: Option<String>,
    /// 为空时使用提供方的默认模型
    pub llm_model_name: Option<String>,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,

    // --- 并发与重试 ---
    /// 本次运行所有 I/O 阶段共享的并发上限
    pub max_concurrent_requests: usize,
    /// 单次外部调用超时（秒）
    pub request_timeout_secs: u64,
    /// 每次外部调用的总尝试次数
    pub max_retries: u32,
    /// 结构校验失败后的总尝试次数
    pub max_schema_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub rate_limit_backoff_ms: u64,

    // --- 检索与下载 ---
    pub crawl_delay_ms: u64,
    pub max_results: usize,
    pub max_document_bytes: u64,
    /// 送入提示词的文档最大字符数
    pub max_prompt_chars: usize,

    /// 阶段失败比例上限（failed / total 超过即判定阶段失败）
    pub failure_ceiling: f64,

    // --- 组合 ---
    pub max_combination_size: usize,
    pub max_candidates: usize,
    pub triple_seed_count: usize,
    pub top_k: usize,
    pub heuristic_weights: HeuristicWeights,

    // --- 排序 ---
    pub score_weights: ScoreWeights,
    pub similarity_threshold: f64,

    // --- 缓存 ---
    pub cache_enabled: bool,
    /// 跨运行的磁盘缓存目录
    pub cache_dir: Option<PathBuf>,
    pub cache_capacity: u64,

    // --- 其他 ---
    pub arxiv_api_url: String,
    pub data_dir: PathBuf,
    pub web_host: String,
    pub web_port: u16,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::default(),
            llm_api_key: String::new(),
            llm_api_base_url: None,
            llm_model_name: None,
            llm_temperature: 0.7,
            llm_max_tokens: 4000,
            max_concurrent_requests: 4,
            request_timeout_secs: 30,
            max_retries: 3,
            max_schema_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            rate_limit_backoff_ms: 2000,
            crawl_delay_ms: 1000,
            max_results: 100,
            max_document_bytes: 50 * 1024 * 1024,
            max_prompt_chars: 8000,
            failure_ceiling: 0.8,
            max_combination_size: 3,
            max_candidates: 2000,
            triple_seed_count: 20,
            top_k: 20,
            heuristic_weights: HeuristicWeights::default(),
            score_weights: ScoreWeights::default(),
            similarity_threshold: 0.8,
            cache_enabled: true,
            cache_dir: None,
            cache_capacity: 1024,
            arxiv_api_url: "http://export.arxiv.org/api/query".to_string(),
            data_dir: PathBuf::from("data"),
            web_host: "127.0.0.1".to_string(),
            web_port: 8000,
            verbose_logging: false,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 默认配置叠加环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件读取配置，缺失的字段取默认值
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        toml::from_str(&content).map_err(|source| {
            AppError::Config(ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source,
            })
        })
    }

    /// 完整加载：默认值 → TOML 文件（可选）→ 环境变量，最后校验
    pub fn load(config_path: Option<&Path>) -> AppResult<Self> {
        let base = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖已有取值
    pub fn with_env_overrides(self) -> Self {
        let llm_provider = std::env::var("AI_PROVIDER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.llm_provider);
        let llm_api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("DEEPSEEK_API_KEY"))
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or(self.llm_api_key);

        Self {
            llm_provider,
            llm_api_key,
            llm_api_base_url: std::env::var("LLM_API_BASE_URL")
                .ok()
                .or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").ok().or(self.llm_model_name),
            llm_temperature: env_or("LLM_TEMPERATURE", self.llm_temperature),
            llm_max_tokens: env_or("LLM_MAX_TOKENS", self.llm_max_tokens),
            max_concurrent_requests: env_or("MAX_CONCURRENT_REQUESTS", self.max_concurrent_requests),
            request_timeout_secs: env_or("TIMEOUT", self.request_timeout_secs),
            max_retries: env_or("MAX_RETRIES", self.max_retries),
            crawl_delay_ms: env_or("CRAWL_DELAY_MS", self.crawl_delay_ms),
            max_results: env_or("MAX_RESULTS", self.max_results),
            max_document_bytes: env_or("MAX_DOCUMENT_BYTES", self.max_document_bytes),
            cache_dir: std::env::var("CACHE_DIR")
                .ok()
                .map(PathBuf::from)
                .or(self.cache_dir),
            data_dir: std::env::var("DATA_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(self.data_dir),
            verbose_logging: env_or("VERBOSE_LOGGING", self.verbose_logging),
            ..self
        }
    }

    /// 派生一份只修改检索上限的运行配置
    pub fn with_max_results(&self, max_results: usize) -> Self {
        Self {
            max_results,
            ..self.clone()
        }
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.max_concurrent_requests == 0 {
            return Err(AppError::invalid_config("max_concurrent_requests", "必须大于 0"));
        }
        if self.max_retries == 0 {
            return Err(AppError::invalid_config("max_retries", "必须大于 0"));
        }
        if self.max_schema_attempts == 0 {
            return Err(AppError::invalid_config("max_schema_attempts", "必须大于 0"));
        }
        if !(2..=3).contains(&self.max_combination_size) {
            return Err(AppError::invalid_config(
                "max_combination_size",
                format!("只支持 2 或 3，当前为 {}", self.max_combination_size),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_ceiling) {
            return Err(AppError::invalid_config("failure_ceiling", "必须位于 [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AppError::invalid_config("similarity_threshold", "必须位于 [0, 1]"));
        }
        if self.top_k == 0 {
            return Err(AppError::invalid_config("top_k", "必须大于 0"));
        }

        let w = &self.score_weights;
        if w.feasibility < 0.0 || w.novelty < 0.0 || w.impact < 0.0 || w.sum() <= 0.0 {
            return Err(AppError::invalid_config(
                "score_weights",
                "权重不能为负且总和必须大于 0",
            ));
        }
        let h = &self.heuristic_weights;
        if h.novelty < 0.0 || h.confidence < 0.0 || h.diversity < 0.0 {
            return Err(AppError::invalid_config("heuristic_weights", "权重不能为负"));
        }
        Ok(())
    }

    pub fn effective_base_url(&self) -> String {
        self.llm_api_base_url
            .clone()
            .unwrap_or_else(|| self.llm_provider.default_base_url().to_string())
    }

    pub fn effective_model(&self) -> String {
        self.llm_model_name
            .clone()
            .unwrap_or_else(|| self.llm_provider.default_model().to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }
}
