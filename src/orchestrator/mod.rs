//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责并发调度和运行状态机，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `worker_pool` - 有界并发执行器
//! - 控制并发数量（Semaphore，整个运行共用一个上限）
//! - 在条目边界检查取消信号
//! - 收集每个条目的结果，失败互不影响
//!
//! ### `pipeline` - 流水线编排器
//! - 驱动运行状态机（检索 → 获取 → 抽取 → 组合 → 合成 → 评分排序）
//! - 汇总阶段结论，超过失败上限时提前结束
//! - 输出运行统计
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理一次运行)
//!     ↓
//! worker_pool (处理一个阶段的 Vec<条目>)
//!     ↓
//! workflow::ItemCtx / StageReport (单个条目的上下文与阶段统计)
//!     ↓
//! services (能力层：acquire / extract / combine / synthesize / rank)
//!     ↓
//! clients (基础设施：LlmClient / ArxivClient)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：pipeline 管阶段，worker_pool 管并发
//! 2. **资源隔离**：只有编排层持有外部能力的句柄
//! 3. **向下依赖**：编排层 → workflow → services → clients
//! 4. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod pipeline;
pub mod worker_pool;

// 重新导出主要类型
pub use pipeline::PipelineOrchestrator;
pub use worker_pool::{PoolOutcome, WorkerPool};
