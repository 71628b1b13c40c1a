use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 论文元数据
///
/// 由检索客户端创建，获取后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(rename = "arxiv_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default, alias = "pdf_url", alias = "sourceUrl")]
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

impl Paper {
    /// 仅含编号与标题的论文（本地文件解析时使用）
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: String::new(),
            authors: Vec::new(),
            categories: BTreeSet::new(),
            source_url: String::new(),
            published: None,
        }
    }
}

/// 解析后的文档：章节名 → 正文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(alias = "paperId")]
    pub paper_id: String,
    pub sections: BTreeMap<String, String>,
}

impl ParsedDocument {
    pub fn new(paper_id: impl Into<String>, sections: BTreeMap<String, String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            sections,
        }
    }

    /// 只用论文元数据（标题 + 摘要）构造文档
    pub fn from_metadata(paper: &Paper) -> Self {
        let mut sections = BTreeMap::new();
        sections.insert("title".to_string(), paper.title.clone());
        if !paper.abstract_text.trim().is_empty() {
            sections.insert("abstract".to_string(), paper.abstract_text.clone());
        }
        Self::new(paper.id.clone(), sections)
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    /// 所有章节拼接后的文本，摘要排在最前
    pub fn full_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.sections.len());
        if let Some(abs) = self.sections.get("abstract") {
            parts.push(format!("## abstract\n{}", abs));
        }
        for (name, text) in &self.sections {
            if name != "abstract" {
                parts.push(format!("## {}\n{}", name, text));
            }
        }
        parts.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(|t| t.trim().is_empty())
    }
}

/// `parse` 命令的输出文件格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPaperFile {
    pub paper: Paper,
    pub document: ParsedDocument,
}
