//! 外部客户端 - 基础设施层
//!
//! 持有稀缺的外部资源（HTTP 连接、模型 API），只暴露能力：
//! - [`Generator`]：`generate(prompt) → text` 生成能力
//! - [`SearchClient`]：按主题检索论文元数据

pub mod arxiv_client;
pub mod llm_client;

pub use arxiv_client::ArxivClient;
pub use llm_client::LlmClient;

use crate::error::PipelineError;
use crate::models::Paper;
use async_trait::async_trait;

/// 文本生成能力
#[async_trait]
pub trait Generator: Send + Sync {
    /// # 参数
    /// - `user_message`: 用户消息
    /// - `system_message`: 系统消息（可选）
    async fn generate(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, PipelineError>;

    fn model_name(&self) -> &str;
}

/// 论文检索能力
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// 返回的论文数不超过 `max_results`
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, PipelineError>;
}
