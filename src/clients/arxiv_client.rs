//! arXiv 检索客户端
//!
//! 调用 arXiv Atom API，把 `<entry>` 解析为 [`Paper`]。

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::SearchClient;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::Paper;

/// arXiv 检索客户端
pub struct ArxivClient {
    http: Client,
    api_url: String,
    /// 可选的分类过滤，例如 `cs.AI`
    category: Option<String>,
}

impl ArxivClient {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("idea_creator/0.1")
            .build()
            .map_err(|e| PipelineError::fatal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.arxiv_api_url.clone(),
            category: None,
        })
    }

    /// 限定检索的 arXiv 分类
    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    fn build_query(&self, query: &str) -> String {
        match &self.category {
            Some(cat) => format!("all:{} AND cat:{}", query.trim(), cat),
            None => format!("all:{}", query.trim()),
        }
    }
}

#[async_trait]
impl SearchClient for ArxivClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, PipelineError> {
        let search_query = self.build_query(query);
        let max = max_results.to_string();
        info!("🔍 arXiv 检索: {} (最多 {} 篇)", search_query, max_results);

        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max.as_str()),
                ("sortBy", "relevance"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(status.as_u16(), retry_after, &body));
        }

        let body = response.text().await?;
        let mut papers = parse_atom_feed(&body)?;
        papers.truncate(max_results);
        debug!("arXiv 返回 {} 篇论文", papers.len());
        Ok(papers)
    }
}

/// 解析 arXiv Atom 响应
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, PipelineError> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| PipelineError::fatal(format!("正则编译失败: {}", e)))
    };
    let entry_re = compile(r"(?s)<entry>(.*?)</entry>")?;
    let id_re = compile(r"(?s)<id>(.*?)</id>")?;
    let title_re = compile(r"(?s)<title[^>]*>(.*?)</title>")?;
    let summary_re = compile(r"(?s)<summary[^>]*>(.*?)</summary>")?;
    let author_re = compile(r"(?s)<author>\s*<name>(.*?)</name>")?;
    let category_re = compile(r#"<category[^>]*term="([^"]+)""#)?;
    let published_re = compile(r"<published>(.*?)</published>")?;
    let link_re = compile(r"<link\s[^>]*>")?;
    let href_re = compile(r#"href="([^"]+)""#)?;

    let capture = |re: &Regex, text: &str| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| normalize_text(m.as_str()))
    };

    let mut papers = Vec::new();
    for entry in entry_re.captures_iter(xml) {
        let entry = match entry.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };

        let Some(entry_id) = capture(&id_re, entry) else {
            continue;
        };
        let id = entry_id
            .rsplit('/')
            .next()
            .unwrap_or(entry_id.as_str())
            .to_string();
        if id.is_empty() {
            continue;
        }

        let pdf_url = link_re
            .find_iter(entry)
            .map(|m| m.as_str())
            .find(|tag| tag.contains(r#"title="pdf""#))
            .and_then(|tag| capture(&href_re, tag))
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", id));

        papers.push(Paper {
            id,
            title: capture(&title_re, entry).unwrap_or_default(),
            abstract_text: capture(&summary_re, entry).unwrap_or_default(),
            authors: author_re
                .captures_iter(entry)
                .filter_map(|c| c.get(1).map(|m| normalize_text(m.as_str())))
                .collect(),
            categories: category_re
                .captures_iter(entry)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect::<BTreeSet<_>>(),
            source_url: pdf_url,
            published: capture(&published_re, entry),
        });
    }

    Ok(papers)
}

/// 合并空白并还原常见的 XML 实体
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
