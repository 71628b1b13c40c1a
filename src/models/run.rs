//! 运行状态机与运行报告
//!
//! `Pending → Searching → Acquiring → Extracting → Combining → Synthesizing → Scoring → Completed`，
//! 任意非终止状态都可以进入 `Failed`。

use super::idea::{AnalysisSummary, IdeaCandidate};
use super::innovation::Innovation;
use super::paper::Paper;
use crate::error::{AppError, AppResult, ErrorKind, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Searching,
    Acquiring,
    Extracting,
    Combining,
    Synthesizing,
    Scoring,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Searching,
        Stage::Acquiring,
        Stage::Extracting,
        Stage::Combining,
        Stage::Synthesizing,
        Stage::Scoring,
    ];

    /// 日志中显示的阶段名
    pub fn label(self) -> &'static str {
        match self {
            Stage::Searching => "论文检索",
            Stage::Acquiring => "文档获取",
            Stage::Extracting => "创新点抽取",
            Stage::Combining => "创新点组合",
            Stage::Synthesizing => "想法合成",
            Stage::Scoring => "评分排序",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    PartialSuccess,
    Success,
    Failed,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Searching,
    Acquiring,
    Extracting,
    Combining,
    Synthesizing,
    Scoring,
    Completed,
    Failed,
}

impl RunState {
    /// 正常推进时的下一个状态
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Pending => Some(RunState::Searching),
            RunState::Searching => Some(RunState::Acquiring),
            RunState::Acquiring => Some(RunState::Extracting),
            RunState::Extracting => Some(RunState::Combining),
            RunState::Combining => Some(RunState::Synthesizing),
            RunState::Synthesizing => Some(RunState::Scoring),
            RunState::Scoring => Some(RunState::Completed),
            RunState::Completed | RunState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn for_stage(stage: Stage) -> RunState {
        match stage {
            Stage::Searching => RunState::Searching,
            Stage::Acquiring => RunState::Acquiring,
            Stage::Extracting => RunState::Extracting,
            Stage::Combining => RunState::Combining,
            Stage::Synthesizing => RunState::Synthesizing,
            Stage::Scoring => RunState::Scoring,
        }
    }
}

/// 一条被记录的非致命失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub stage: Stage,
    /// 失败条目（论文编号、候选编号等）
    pub item: String,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl RunError {
    pub fn new(stage: Stage, item: impl Into<String>, error: &PipelineError) -> Self {
        Self {
            stage,
            item: item.into(),
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// 运行失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled { stage: Stage },
    StageFailed { stage: Stage, detail: String },
}

/// 一次端到端运行，拥有其间产生的全部实体
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: String,
    pub topic: String,
    pub state: RunState,
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<RunError>,
    pub failure_reason: Option<FailureReason>,
    pub papers: Vec<Paper>,
    pub innovations: Vec<Innovation>,
    pub ideas: Vec<IdeaCandidate>,
}

impl PipelineRun {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            state: RunState::Pending,
            stage_statuses: Stage::ALL
                .iter()
                .map(|s| (*s, StageStatus::Pending))
                .collect(),
            started_at: Utc::now(),
            completed_at: None,
            errors: Vec::new(),
            failure_reason: None,
            papers: Vec::new(),
            innovations: Vec::new(),
            ideas: Vec::new(),
        }
    }

    /// 状态迁移：只允许推进到下一个状态，或从非终止状态进入 `Failed`
    pub fn transition(&mut self, to: RunState) -> AppResult<()> {
        let allowed = self.state.next() == Some(to)
            || (to == RunState::Failed && !self.state.is_terminal());
        if !allowed {
            return Err(AppError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", to),
            });
        }
        self.state = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// 以指定原因进入 `Failed`
    pub fn fail(&mut self, reason: FailureReason) -> AppResult<()> {
        self.transition(RunState::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    pub fn set_stage_status(&mut self, stage: Stage, status: StageStatus) {
        self.stage_statuses.insert(stage, status);
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stage_statuses
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            topic: self.topic.clone(),
            state: self.state,
            stage_statuses: self.stage_statuses.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            errors: self.errors.clone(),
            failure_reason: self.failure_reason.clone(),
            paper_count: self.papers.len(),
            innovation_count: self.innovations.len(),
            idea_count: self.ideas.len(),
            analysis: AnalysisSummary::compute(&self.papers, &self.innovations, &self.ideas),
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run: self.summary(),
            ideas: self.ideas.clone(),
        }
    }
}

/// 对外暴露的运行摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub topic: String,
    pub state: RunState,
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<RunError>,
    pub failure_reason: Option<FailureReason>,
    pub paper_count: usize,
    pub innovation_count: usize,
    pub idea_count: usize,
    pub analysis: AnalysisSummary,
}

/// `/api/generate` 响应体与 `generate` 命令的报告文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunSummary,
    pub ideas: Vec<IdeaCandidate>,
}
