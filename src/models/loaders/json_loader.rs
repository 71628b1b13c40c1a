use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 读取单个 JSON 文件
pub async fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取JSON文件: {}", path.display()))?;

    serde_json::from_str(&content).with_context(|| format!("无法解析JSON文件: {}", path.display()))
}

/// 加载文件夹中所有以 `suffix` 结尾的 JSON 文件
///
/// 按文件名排序；单个文件解析失败只记录警告并跳过
pub async fn load_json_dir<T: DeserializeOwned>(folder: &Path, suffix: &str) -> Result<Vec<T>> {
    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder.display());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(suffix))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();

    let mut loaded = Vec::with_capacity(files.len());
    for path in files {
        match load_json_file(&path).await {
            Ok(value) => {
                tracing::debug!(
                    "已加载: {}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                );
                loaded.push(value);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(loaded)
}

/// 以缩进格式写出 JSON 文件，必要时创建父目录
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("无法创建目录: {}", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .with_context(|| format!("无法写入文件: {}", path.display()))?;
    Ok(())
}
