//! 阶段统计
//!
//! 汇总一个阶段内各条目的成败，并据此给出阶段结论：
//! - 配额耗尽、产出为空、或失败比例超过上限 → `Failed`
//! - 有失败但未超过上限 → `PartialSuccess`
//! - 全部成功 → `Success`

use super::item_ctx::ItemCtx;
use crate::error::PipelineError;
use crate::models::{RunError, Stage, StageStatus};
use tracing::warn;

/// 阶段统计
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 因取消而未执行的条目数
    pub skipped: usize,
    pub errors: Vec<RunError>,
    pub quota_exhausted: bool,
}

impl StageReport {
    pub fn new(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            quota_exhausted: false,
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, ctx: &ItemCtx, error: &PipelineError) {
        warn!("{} ❌ {}", ctx, error);
        self.failed += 1;
        if error.is_stage_fatal() {
            self.quota_exhausted = true;
        }
        self.errors.push(RunError::new(self.stage, ctx.item_id.clone(), error));
    }

    pub fn record_skipped(&mut self, count: usize) {
        self.skipped += count;
    }

    /// 失败比例（以总条目数为分母）
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    /// 阶段结论
    ///
    /// # 参数
    /// - `ceiling`: 失败比例上限
    /// - `output_empty`: 阶段产出是否为空
    pub fn status(&self, ceiling: f64, output_empty: bool) -> StageStatus {
        if self.quota_exhausted || output_empty || self.failure_ratio() > ceiling {
            StageStatus::Failed
        } else if self.failed > 0 {
            StageStatus::PartialSuccess
        } else {
            StageStatus::Success
        }
    }

    /// 阶段失败时的简要说明
    pub fn failure_detail(&self, output_empty: bool) -> String {
        if self.quota_exhausted {
            "调用配额已用尽".to_string()
        } else if output_empty {
            "阶段没有产出".to_string()
        } else {
            format!(
                "失败比例 {:.0}% ({}/{}) 超过上限",
                self.failure_ratio() * 100.0,
                self.failed,
                self.total
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(stage: Stage, total: usize, failures: usize) -> StageReport {
        let mut report = StageReport::new(stage, total);
        for i in 0..total {
            let ctx = ItemCtx::new(stage, i + 1, total, format!("item-{}", i));
            if i < failures {
                report.record_failure(&ctx, &PipelineError::transient("reset"));
            } else {
                report.record_success();
            }
        }
        report
    }

    #[test]
    fn test_ninety_percent_failures_fail_the_stage() {
        let report = report_with(Stage::Acquiring, 10, 9);
        assert_eq!(report.status(0.8, false), StageStatus::Failed);
        assert_eq!(report.errors.len(), 9);
        assert_eq!(report.errors[0].stage, Stage::Acquiring);
    }

    #[test]
    fn test_one_failure_is_partial_success() {
        let report = report_with(Stage::Extracting, 10, 1);
        assert_eq!(report.status(0.8, false), StageStatus::PartialSuccess);
    }

    #[test]
    fn test_ceiling_is_exclusive() {
        let report = report_with(Stage::Extracting, 10, 8);
        assert_eq!(report.status(0.8, false), StageStatus::PartialSuccess);
    }

    #[test]
    fn test_empty_output_and_quota_fail() {
        let report = report_with(Stage::Searching, 1, 0);
        assert_eq!(report.status(0.8, false), StageStatus::Success);
        assert_eq!(report.status(0.8, true), StageStatus::Failed);

        let mut report = StageReport::new(Stage::Synthesizing, 10);
        report.record_failure(
            &ItemCtx::new(Stage::Synthesizing, 1, 10, "idea-1"),
            &PipelineError::QuotaExceeded {
                message: "no credit".into(),
            },
        );
        assert_eq!(report.status(0.8, false), StageStatus::Failed);
        assert_eq!(report.failure_detail(false), "调用配额已用尽");
    }
}
