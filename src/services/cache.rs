//! 抽取结果缓存
//!
//! 以文档内容指纹为键：
//! - 进程内使用 `moka` 异步缓存
//! - 配置了 `cache_dir` 时额外写入 `<指纹>.json`，供之后的运行复用

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Innovation, ParsedDocument};

/// 一次抽取的缓存内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedExtraction {
    pub innovations: Vec<Innovation>,
    pub summary: String,
}

/// 文档内容指纹：论文编号与各章节（按章节名排序）的 SHA-256
pub fn fingerprint(document: &ParsedDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.paper_id.as_bytes());
    hasher.update([0u8]);
    for (name, text) in &document.sections {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// 创新点缓存
#[derive(Clone)]
pub struct InnovationCache {
    enabled: bool,
    memory: Cache<String, Arc<CachedExtraction>>,
    disk_dir: Option<PathBuf>,
}

impl InnovationCache {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.cache_enabled,
            memory: Cache::new(config.cache_capacity),
            disk_dir: config.cache_dir.clone(),
        }
    }

    /// 不缓存任何内容
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            memory: Cache::new(1),
            disk_dir: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.disk_dir.as_ref().map(|dir| dir.join(format!("{}.json", key)))
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CachedExtraction>> {
        if !self.enabled {
            return None;
        }
        if let Some(hit) = self.memory.get(key).await {
            debug!("缓存命中(内存): {}", &key[..key.len().min(12)]);
            return Some(hit);
        }

        let path = self.disk_path(key)?;
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<CachedExtraction>(&content) {
            Ok(cached) => {
                debug!("缓存命中(磁盘): {}", path.display());
                let cached = Arc::new(cached);
                self.memory.insert(key.to_string(), cached.clone()).await;
                Some(cached)
            }
            Err(e) => {
                warn!("缓存文件损坏，忽略 {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: CachedExtraction) {
        if !self.enabled {
            return;
        }
        let value = Arc::new(value);
        self.memory.insert(key.to_string(), value.clone()).await;

        if let Some(path) = self.disk_path(key) {
            if let Err(e) = write_json(&path, value.as_ref()).await {
                warn!("写入缓存文件失败 {}: {}", path.display(), e);
            }
        }
    }
}

async fn write_json(path: &std::path::Path, value: &CachedExtraction) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string(value).map_err(std::io::Error::other)?;
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(paper_id: &str, body: &str) -> ParsedDocument {
        let mut sections = BTreeMap::new();
        sections.insert("abstract".to_string(), body.to_string());
        ParsedDocument::new(paper_id, sections)
    }

    fn sample() -> CachedExtraction {
        CachedExtraction {
            innovations: vec![Innovation {
                id: "p1-i01".to_string(),
                paper_id: "p1".to_string(),
                title: "Sparse routing".to_string(),
                description: "Routes tokens sparsely".to_string(),
                category: "算法创新".to_string(),
                novelty_score: 0.7,
                confidence: 0.8,
                impact: None,
                methodology: None,
            }],
            summary: "one idea".to_string(),
        }
    }

    #[test]
    fn test_fingerprint_depends_on_content_and_id() {
        let a = fingerprint(&doc("p1", "text"));
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(&doc("p1", "text")));
        assert_ne!(a, fingerprint(&doc("p1", "text!")));
        assert_ne!(a, fingerprint(&doc("p2", "text")));
    }

    #[tokio::test]
    async fn test_disk_cache_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };

        let key = fingerprint(&doc("p1", "text"));
        InnovationCache::new(&config).put(&key, sample()).await;

        let fresh = InnovationCache::new(&config);
        let hit = fresh.get(&key).await.unwrap();
        assert_eq!(*hit, sample());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = InnovationCache::disabled();
        cache.put("k", sample()).await;
        assert!(cache.get("k").await.is_none());
    }
}
