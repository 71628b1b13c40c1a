//! 业务能力层（Services Layer）
//!
//! 每个服务只处理「一个条目」，不关心流程与并发：
//!
//! - `acquirer`：论文 → 结构化文本
//! - `section_parser`：纯文本 / HTML → 章节
//! - `extractor` + `cache`：文档 → 创新点（带内容指纹缓存）
//! - `combination`：创新点池 → 有界的候选集合
//! - `synthesizer`：候选 → 完整的研究想法
//! - `ranker`：综合评分、去重、排序
//! - `retry`：外部调用共用的超时与退避策略

pub mod acquirer;
pub mod cache;
pub mod combination;
pub mod extractor;
pub mod ranker;
pub mod retry;
pub mod section_parser;
pub mod synthesizer;

pub use acquirer::{DocumentAcquirer, HttpAcquirer, PdfTextExtractor};
pub use cache::{fingerprint, CachedExtraction, InnovationCache};
pub use combination::{CombinationEngine, CombinationSettings};
pub use extractor::{Extraction, InnovationExtractor};
pub use ranker::Ranker;
pub use retry::{with_retry, RetryPolicy};
pub use section_parser::SectionParser;
pub use synthesizer::IdeaSynthesizer;
