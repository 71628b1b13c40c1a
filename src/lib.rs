//! # Idea Creator
//!
//! 把一个研究主题变成一组排好序的研究想法：检索论文、抽取创新点、跨论文组合、合成并评分
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Clients）
//! - `clients/` - 持有稀缺资源（HTTP 连接、模型 API），只暴露能力
//! - `LlmClient` - OpenAI 兼容接口，提供 generate() 能力
//! - `ArxivClient` - arXiv 检索，提供 search() 能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个条目
//! - `HttpAcquirer` - 下载并切分文档
//! - `InnovationExtractor` - 抽取创新点（带缓存）
//! - `CombinationEngine` - 有界的跨论文组合
//! - `IdeaSynthesizer` - 合成完整想法
//! - `Ranker` - 综合评分、去重、排序
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 单个条目的上下文与阶段统计
//! - `ItemCtx` - 上下文封装（阶段 + 序号 + 条目编号）
//! - `StageReport` - 阶段成败汇总与结论
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/worker_pool` - 有界并发执行器
//! - `orchestrator/pipeline` - 运行状态机
//!
//! ## 模块结构

pub mod api;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, LlmProvider};
pub use error::{AppError, AppResult, PipelineError};
pub use models::{IdeaCandidate, Innovation, Paper, ParsedDocument, PipelineRun, RunReport};
pub use orchestrator::{PipelineOrchestrator, WorkerPool};
pub use workflow::{ItemCtx, StageReport};
