//! LLM 客户端
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（OpenAI、DeepSeek 或自建端点）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::Generator;
use crate::config::Config;
use crate::error::PipelineError;

/// LLM 客户端
///
/// 职责：
/// - 发送一次对话补全请求并返回文本
/// - 把 SDK 错误归类为 [`PipelineError`]
/// - 不做重试（由调用方的重试策略负责）
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(config.effective_base_url());

        Self {
            client: Client::with_config(openai_config),
            model_name: config.effective_model(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn build_request_error(e: impl std::fmt::Display) -> PipelineError {
        PipelineError::fatal(format!("构建请求失败: {}", e))
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, PipelineError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(Self::build_request_error)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(Self::build_request_error)?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(Self::build_request_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            PipelineError::classify_message(&e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::schema("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_uses_provider_defaults() {
        let client = LlmClient::new(&Config::default());
        assert_eq!(client.model_name(), "deepseek-chat");
    }

    #[tokio::test]
    #[ignore]
    async fn test_generate_live() {
        let _ = tracing_subscriber::fmt::try_init();
        dotenvy::dotenv().ok();
        let client = LlmClient::new(&Config::from_env());
        let reply = client
            .generate("用一句话介绍稀疏注意力", Some("你是一个研究助理"))
            .await
            .unwrap();
        println!("LLM 响应: {}", reply);
        assert!(!reply.is_empty());
    }
}
