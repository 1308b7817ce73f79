use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::models::types::MarkdownSourceData;

/// 虚拟数据模块的 loader
///
/// 打包器解析两个占位模块时在这里等待，直到源数据聚合完成并调用 `job_done`。
/// 开发模式下每次重新扫描都会再次发布数据。
#[derive(Clone)]
pub struct DataLoader {
    tx: Arc<watch::Sender<Option<Arc<MarkdownSourceData>>>>,
    placeholders: Arc<[PathBuf; 2]>,
}

impl DataLoader {
    pub fn new(placeholders: [PathBuf; 2]) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            placeholders: Arc::new(placeholders),
        }
    }

    /// 发布聚合好的数据，放行所有等待中的模块
    pub fn job_done(&self, data: Arc<MarkdownSourceData>) {
        info!("Source data ready: {} documents", data.len());
        self.tx.send_replace(Some(data));
    }

    /// 订阅每一次数据发布
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MarkdownSourceData>>> {
        self.tx.subscribe()
    }

    pub fn is_done(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn handles(&self, specifier: &Path) -> bool {
        self.placeholders.iter().any(|p| p == specifier)
    }

    pub fn placeholders(&self) -> &[PathBuf; 2] {
        &self.placeholders
    }

    /// 等待数据发布
    pub async fn data(&self) -> Result<Arc<MarkdownSourceData>> {
        let mut rx = self.tx.subscribe();
        let data = rx
            .wait_for(Option::is_some)
            .await
            .context("data loader closed before source data was ready")?;
        data.clone().ok_or_else(|| anyhow!("source data missing"))
    }

    /// 解析占位模块，返回生成的模块源码
    pub async fn load(&self, specifier: &Path) -> Result<String> {
        if !self.handles(specifier) {
            return Err(anyhow!("{} is not a data placeholder", specifier.display()));
        }
        debug!("Waiting for source data: {}", specifier.display());
        let data = self.data().await?;
        Ok(format!("module.exports = {};\n", self.to_json(&data)?))
    }

    pub fn to_json(&self, data: &MarkdownSourceData) -> Result<String> {
        Ok(serde_json::to_string(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::SourceDocument;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn loader() -> DataLoader {
        DataLoader::new([PathBuf::from("/tmp/p/data.js"), PathBuf::from("/tmp/p/ssr-data.js")])
    }

    #[tokio::test]
    async fn test_load_waits_for_job_done() -> Result<()> {
        let loader = loader();
        let pending = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load(Path::new("/tmp/p/ssr-data.js")).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(!loader.is_done());

        let mut meta = Map::new();
        meta.insert("filename".to_string(), json!("posts/a.md"));
        let mut data = MarkdownSourceData::new();
        data.insert("posts/a".to_string(), SourceDocument { meta, content: json!("<p>a</p>") });
        loader.job_done(Arc::new(data));

        let module = pending.await??;
        assert!(module.starts_with("module.exports = {\"posts/a\""));
        assert!(module.contains("posts/a.md"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_specifier_rejected() {
        let loader = loader();
        loader.job_done(Arc::new(MarkdownSourceData::new()));
        assert!(loader.load(Path::new("/tmp/p/other.js")).await.is_err());
    }
}
