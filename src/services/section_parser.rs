//! 章节切分 - 业务能力层
//!
//! 把纯文本或 HTML 切分为「章节名 → 正文」，识别的标题形式：
//! - `1. INTRODUCTION`
//! - `ABSTRACT`、`REFERENCES`
//! - `1.1 Background`
//! - `Conclusion:`
//!
//! 第一个标题之前的文本记入 `preamble`。

use regex::Regex;
use std::collections::BTreeMap;

/// 标题行的最大长度，超过的全大写行视为正文
const MAX_HEADING_LEN: usize = 60;

pub const PREAMBLE: &str = "preamble";
pub const ABSTRACT: &str = "abstract";

/// 章节切分器
pub struct SectionParser {
    heading_patterns: Vec<Regex>,
    inline_abstract: Option<Regex>,
}

impl SectionParser {
    pub fn new() -> Self {
        let heading_patterns = [
            r"^\d+\.\s*([A-Z][A-Z\s]+)$",
            r"^([A-Z][A-Z\s]+)$",
            r"^\d+\.\d+\s*([A-Z][A-Za-z\s]+)$",
            r"^([A-Z][a-z\s]+):$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self {
            heading_patterns,
            inline_abstract: Regex::new(r"(?i)^abstract\s*[:.\-—]\s*(.+)$").ok(),
        }
    }

    /// 识别标题行，返回规范化后的章节名
    fn heading_name(&self, line: &str) -> Option<String> {
        if line.chars().count() > MAX_HEADING_LEN {
            return None;
        }
        self.heading_patterns.iter().find_map(|re| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .map(|m| normalize_name(m.as_str()))
                .filter(|name| !name.is_empty())
        })
    }

    /// 把纯文本切分为章节
    pub fn parse_text(&self, text: &str) -> BTreeMap<String, String> {
        let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current = PREAMBLE.to_string();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = self.inline_abstract.as_ref().and_then(|re| re.captures(line)) {
                current = ABSTRACT.to_string();
                if let Some(rest) = caps.get(1) {
                    sections
                        .entry(current.clone())
                        .or_default()
                        .push(rest.as_str().trim().to_string());
                }
                continue;
            }

            if let Some(name) = self.heading_name(line) {
                current = name;
                continue;
            }

            sections.entry(current.clone()).or_default().push(line.to_string());
        }

        sections
            .into_iter()
            .map(|(name, lines)| (name, lines.join("\n")))
            .filter(|(_, body)| !body.trim().is_empty())
            .collect()
    }

    /// 先把 HTML 转成文本再切分
    pub fn parse_html(&self, html: &str) -> BTreeMap<String, String> {
        self.parse_text(&html_to_text(html))
    }
}

impl Default for SectionParser {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 粗略的 HTML → 文本转换
///
/// 去掉 script/style，块级标签换行，`<hN>` 标题转为大写独占一行以便识别
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();

    if let Ok(re) = Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>") {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Ok(re) = Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>") {
        let tag_re = Regex::new(r"(?s)<[^>]+>").ok();
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let inner = match &tag_re {
                    Some(t) => t.replace_all(inner, "").into_owned(),
                    None => inner.to_string(),
                };
                format!("\n{}\n", inner.trim().to_uppercase())
            })
            .into_owned();
    }
    if let Ok(re) = Regex::new(r"(?i)<(br|/p|/div|/li|/tr|/section)[^>]*>") {
        text = re.replace_all(&text, "\n").into_owned();
    }
    if let Ok(re) = Regex::new(r"(?s)<[^>]+>") {
        text = re.replace_all(&text, "").into_owned();
    }

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbered_and_plain_headings() {
        let text = "Sparse Attention for Long Documents\n\
                    Ada Lovelace\n\
                    ABSTRACT\n\
                    We propose a sparse scheme.\n\
                    It scales.\n\
                    1. INTRODUCTION\n\
                    Long documents are hard.\n\
                    1.1 Background\n\
                    Prior work is dense.\n\
                    Conclusion:\n\
                    It works.\n";
        let sections = SectionParser::new().parse_text(text);

        assert_eq!(
            sections.get(PREAMBLE).map(String::as_str),
            Some("Sparse Attention for Long Documents\nAda Lovelace")
        );
        assert_eq!(
            sections.get(ABSTRACT).map(String::as_str),
            Some("We propose a sparse scheme.\nIt scales.")
        );
        assert_eq!(
            sections.get("introduction").map(String::as_str),
            Some("Long documents are hard.")
        );
        assert_eq!(
            sections.get("background").map(String::as_str),
            Some("Prior work is dense.")
        );
        assert_eq!(sections.get("conclusion").map(String::as_str), Some("It works."));
    }

    #[test]
    fn test_inline_abstract_and_empty_sections_dropped() {
        let text = "Abstract: Routing on graphs is cheap.\nREFERENCES\n";
        let sections = SectionParser::new().parse_text(text);
        assert_eq!(
            sections.get(ABSTRACT).map(String::as_str),
            Some("Routing on graphs is cheap.")
        );
        assert!(!sections.contains_key("references"));
    }

    #[test]
    fn test_long_uppercase_line_is_body_text() {
        let shout = "THIS IS A VERY LONG LINE WRITTEN IN CAPITALS THAT SHOULD NOT BE A HEADING AT ALL";
        let sections = SectionParser::new().parse_text(&format!("INTRODUCTION\n{}", shout));
        assert_eq!(sections.get("introduction").map(String::as_str), Some(shout));
    }

    #[test]
    fn test_parse_html() {
        let html = r#"<html><head><style>p{}</style></head><body>
            <h2>Abstract</h2><p>We study <b>routing</b> &amp; graphs.</p>
            <h2>2. Method</h2><p>Use a GNN.</p></body></html>"#;
        let sections = SectionParser::new().parse_html(html);
        assert_eq!(
            sections.get(ABSTRACT).map(String::as_str),
            Some("We study routing & graphs.")
        );
        assert_eq!(sections.get("method").map(String::as_str), Some("Use a GNN."));
    }
}
