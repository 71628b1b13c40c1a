//! 条目处理上下文
//!
//! 封装「我正在处理哪个阶段的第几个条目」这一信息

use crate::error::PipelineError;
use crate::models::Stage;
use std::fmt::Display;

/// 条目处理上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCtx {
    pub stage: Stage,

    /// 条目在本阶段中的序号（从1开始，仅用于日志与稳定排序）
    pub index: usize,

    /// 本阶段条目总数
    pub total: usize,

    /// 条目编号（论文编号、候选编号等）
    pub item_id: String,
}

impl ItemCtx {
    pub fn new(stage: Stage, index: usize, total: usize, item_id: impl Into<String>) -> Self {
        Self {
            stage,
            index,
            total,
            item_id: item_id.into(),
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} #{}/{} {}]",
            self.stage.label(),
            self.index,
            self.total,
            self.item_id
        )
    }
}

/// 单个条目的处理结果
#[derive(Debug)]
pub struct ItemOutcome<O> {
    pub ctx: ItemCtx,
    pub result: Result<O, PipelineError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ctx = ItemCtx::new(Stage::Acquiring, 3, 10, "2401.00001");
        assert_eq!(ctx.to_string(), "[文档获取 #3/10 2401.00001]");
    }
}
