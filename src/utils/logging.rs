/// 日志工具模块
///
/// 提供日志初始化以及阶段横幅、最终统计等输出辅助函数
use crate::config::Config;
use crate::models::{RunSummary, Stage, StageStatus};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化全局日志订阅器
///
/// `RUST_LOG` 优先；否则默认 `info`，`verbose` 时为 `debug`。重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录运行启动信息
///
/// # 参数
/// - `topic`: 研究主题
/// - `config`: 本次运行的配置
pub fn log_startup(topic: &str, config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 创新发现流水线启动");
    info!("🔍 研究主题: {}", topic);
    info!(
        "📊 最大并发数: {} | 检索上限: {} | Top-K: {}",
        config.max_concurrent_requests, config.max_results, config.top_k
    );
    info!(
        "🤖 生成模型: {} ({})",
        config.effective_model(),
        config.llm_provider.as_str()
    );
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始信息
///
/// # 参数
/// - `stage`: 阶段
/// - `item_count`: 本阶段待处理条目数
pub fn log_stage_start(stage: Stage, item_count: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 阶段开始: {} ({})", stage.label(), stage);
    info!("📄 待处理条目: {}", item_count);
    info!("{}", "=".repeat(60));
}

/// 记录阶段完成信息
///
/// # 参数
/// - `stage`: 阶段
/// - `status`: 阶段结论
/// - `succeeded`: 成功条目数
/// - `total`: 条目总数
pub fn log_stage_complete(stage: Stage, status: StageStatus, succeeded: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    match status {
        StageStatus::Success => {
            info!("✓ {} 完成: 成功 {}/{}", stage.label(), succeeded, total)
        }
        StageStatus::PartialSuccess => {
            warn!("⚠ {} 部分成功: 成功 {}/{}", stage.label(), succeeded, total)
        }
        _ => warn!("✗ {} 失败: 成功 {}/{}", stage.label(), succeeded, total),
    }
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行结束统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("🏁 最终状态: {:?}", summary.state);
    for (stage, status) in &summary.stage_statuses {
        info!("   {:<14} {:?}", stage.to_string(), status);
    }
    info!("📄 论文: {}", summary.paper_count);
    info!("💡 创新点: {}", summary.innovation_count);
    info!("✅ 最终想法: {}", summary.idea_count);
    info!("❌ 记录的错误: {}", summary.errors.len());
    if let Some(reason) = &summary.failure_reason {
        warn!("失败原因: {:?}", reason);
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
