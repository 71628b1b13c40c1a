//! 有界并发执行器 - 编排层
//!
//! ## 职责
//!
//! 在一个阶段内并发处理若干条目：
//! - 使用 Semaphore 限制同时执行的条目数（整个运行共用同一个上限）
//! - 在申请许可之前、拿到许可之后各检查一次取消信号
//! - 某个条目返回配额耗尽时，取消本阶段剩余条目
//! - 每个条目的结果单独收集，一个条目失败不影响其他条目

use crate::error::PipelineError;
use crate::models::Stage;
use crate::workflow::{ItemCtx, ItemOutcome};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 一个阶段的执行结果
#[derive(Debug)]
pub struct PoolOutcome<O> {
    /// 已执行条目的结果，按条目序号排列
    pub results: Vec<ItemOutcome<O>>,
    /// 因取消而未执行的条目
    pub skipped: Vec<ItemCtx>,
}

/// 有界并发执行器
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 并发处理一个阶段的全部条目
    ///
    /// # 参数
    /// - `stage`: 所属阶段
    /// - `items`: `(条目编号, 条目数据)` 列表
    /// - `stage_cancel`: 本阶段的取消信号（通常是运行级信号的子信号）
    /// - `task`: 处理单个条目的函数
    pub async fn run<I, O, F, Fut>(
        &self,
        stage: Stage,
        items: Vec<(String, I)>,
        stage_cancel: &CancellationToken,
        task: F,
    ) -> PoolOutcome<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(ItemCtx, I) -> Fut,
        Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
    {
        let total = items.len();
        let mut handles = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (idx, (item_id, item)) in items.into_iter().enumerate() {
            let ctx = ItemCtx::new(stage, idx + 1, total, item_id);

            if stage_cancel.is_cancelled() {
                skipped.push(ctx);
                continue;
            }

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("{} 无法获取并发许可: {}", ctx, e);
                    skipped.push(ctx);
                    continue;
                }
            };

            if stage_cancel.is_cancelled() {
                drop(permit);
                skipped.push(ctx);
                continue;
            }

            debug!("{} 开始处理", ctx);
            let future = task(ctx.clone(), item);
            let token = stage_cancel.clone();
            let task_ctx = ctx.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = future.await;
                if let Err(e) = &result {
                    if e.is_stage_fatal() {
                        warn!("{} 配额耗尽，取消本阶段剩余条目", task_ctx);
                        token.cancel();
                    }
                }
                result
            });
            handles.push((ctx, handle));
        }

        // 等待所有任务完成
        let mut results = Vec::with_capacity(handles.len());
        for (ctx, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("{} 任务执行失败: {}", ctx, e);
                    Err(PipelineError::fatal(format!("任务执行失败: {}", e)))
                }
            };
            results.push(ItemOutcome { ctx, result });
        }

        if !skipped.is_empty() {
            warn!("⚠ {} 有 {} 个条目因取消未执行", stage.label(), skipped.len());
        }

        PoolOutcome { results, skipped }
    }
}
