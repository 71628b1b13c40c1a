//! 流程层（Workflow Layer）
//!
//! 定义单个条目的上下文与阶段内的成败汇总，不持有外部资源

pub mod item_ctx;
pub mod stage_report;

pub use item_ctx::{ItemCtx, ItemOutcome};
pub use stage_report::StageReport;
