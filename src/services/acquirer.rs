//! 文档获取 - 业务能力层
//!
//! 只负责「把一篇论文变成结构化文本」，不关心流程：
//! - 下载 `source_url`，限制文档大小
//! - 两次下载之间保持抓取间隔
//! - HTML / 纯文本交给 [`SectionParser`] 切分
//! - PDF 交给外部的文本抽取能力；未配置时退化为标题 + 摘要

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::{with_retry, RetryPolicy};
use super::section_parser::SectionParser;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{Paper, ParsedDocument};

/// 文档获取能力
#[async_trait]
pub trait DocumentAcquirer: Send + Sync {
    async fn acquire(&self, paper: &Paper) -> Result<ParsedDocument, PipelineError>;
}

/// PDF 文本抽取能力（外部协作方）
#[async_trait]
pub trait PdfTextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, PipelineError>;
}

/// 下载得到的原始文档
#[derive(Debug)]
enum RawDocument {
    Pdf(Vec<u8>),
    Html(String),
    Text(String),
}

/// 基于 HTTP 的文档获取器
pub struct HttpAcquirer {
    http: Client,
    max_bytes: u64,
    crawl_delay: Duration,
    /// 上一次下载开始的时间
    last_request: Mutex<Option<Instant>>,
    retry: RetryPolicy,
    parser: SectionParser,
    pdf_extractor: Option<Arc<dyn PdfTextExtractor>>,
}

impl HttpAcquirer {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("idea_creator/0.1")
            .build()
            .map_err(|e| PipelineError::fatal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http,
            max_bytes: config.max_document_bytes,
            crawl_delay: config.crawl_delay(),
            last_request: Mutex::new(None),
            retry: RetryPolicy::from_config(config),
            parser: SectionParser::new(),
            pdf_extractor: None,
        })
    }

    /// 配置 PDF 文本抽取能力
    pub fn with_pdf_extractor(mut self, extractor: Arc<dyn PdfTextExtractor>) -> Self {
        self.pdf_extractor = Some(extractor);
        self
    }

    /// 等待到距离上一次下载至少 `crawl_delay`
    async fn wait_for_crawl_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.crawl_delay;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn download(&self, url: &str) -> Result<RawDocument, PipelineError> {
        self.wait_for_crawl_slot().await;
        debug!("下载文档: {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::from_status(status.as_u16(), retry_after, ""));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(PipelineError::SizeLimit {
                    size: declared,
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        let mut body: Vec<u8> = Vec::new();
        let mut stream = Box::pin(response.bytes_stream());
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
            if body.len() as u64 > self.max_bytes {
                return Err(PipelineError::SizeLimit {
                    size: body.len() as u64,
                    limit: self.max_bytes,
                });
            }
        }

        Ok(classify_body(&content_type, body))
    }
}

fn classify_body(content_type: &str, body: Vec<u8>) -> RawDocument {
    if content_type.contains("pdf") || body.starts_with(b"%PDF") {
        return RawDocument::Pdf(body);
    }
    let text = String::from_utf8_lossy(&body).into_owned();
    if content_type.contains("html") || text.trim_start().starts_with('<') {
        RawDocument::Html(text)
    } else {
        RawDocument::Text(text)
    }
}

#[async_trait]
impl DocumentAcquirer for HttpAcquirer {
    async fn acquire(&self, paper: &Paper) -> Result<ParsedDocument, PipelineError> {
        if paper.source_url.trim().is_empty() {
            warn!("[论文 {}] 没有下载地址，使用标题与摘要", paper.id);
            return Ok(ParsedDocument::from_metadata(paper));
        }

        let label = format!("[论文 {}] 下载", paper.id);
        let raw = with_retry(&self.retry, &label, || self.download(&paper.source_url)).await?;

        let sections = match raw {
            RawDocument::Html(html) => self.parser.parse_html(&html),
            RawDocument::Text(text) => self.parser.parse_text(&text),
            RawDocument::Pdf(bytes) => match &self.pdf_extractor {
                Some(extractor) => {
                    let text = extractor.extract_text(&bytes).await?;
                    self.parser.parse_text(&text)
                }
                None => {
                    warn!(
                        "[论文 {}] 未配置 PDF 文本抽取，使用标题与摘要 ({} 字节)",
                        paper.id,
                        bytes.len()
                    );
                    return Ok(ParsedDocument::from_metadata(paper));
                }
            },
        };

        let mut document = ParsedDocument::new(paper.id.clone(), sections);
        if document.is_empty() {
            warn!("[论文 {}] 文档正文为空，使用标题与摘要", paper.id);
            return Ok(ParsedDocument::from_metadata(paper));
        }
        if document.section("abstract").is_none() && !paper.abstract_text.trim().is_empty() {
            document
                .sections
                .insert("abstract".to_string(), paper.abstract_text.clone());
        }
        Ok(document)
    }
}
