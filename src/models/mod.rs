pub mod idea;
pub mod innovation;
pub mod loaders;
pub mod paper;
pub mod run;

pub use idea::{AnalysisSummary, CombinationType, IdeaCandidate};
pub use innovation::{ExtractedInnovations, Innovation};
pub use loaders::{load_json_dir, load_json_file, save_json};
pub use paper::{Paper, ParsedDocument, ParsedPaperFile};
pub use run::{FailureReason, PipelineRun, RunError, RunReport, RunState, RunSummary, Stage, StageStatus};

/// 分数是否位于 [0, 1]
pub fn is_unit_score(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// 把分数限制到 [0, 1]，NaN 记为 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
