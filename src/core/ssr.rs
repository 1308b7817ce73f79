use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::utils::escape_win_path;

/// 默认 JS 运行时
pub const DEFAULT_SSR_RUNTIME: &str = "node";

/// 加载服务端渲染模块并调用其 `ssr(url, callback)` 导出
const NODE_RUNNER: &str = r#"
const { ssr } = require(process.argv[1]);
ssr(process.argv[2], (error, content) => {
  if (error) {
    console.error(error && error.stack ? error.stack : String(error));
    process.exit(1);
  }
  process.stdout.write(content == null ? '' : String(content));
});
"#;

/// 服务端渲染函数：逻辑 URL 到页面内容
#[async_trait]
pub trait SsrRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

/// 加载服务端打包产物
pub trait SsrLoader: Send + Sync {
    fn load(&self, module: &Path) -> Result<Arc<dyn SsrRenderer>>;
}

/// 用 node 加载 commonjs 产物
pub struct NodeSsrLoader {
    runtime: String,
    base_dir: PathBuf,
}

impl NodeSsrLoader {
    pub fn new(runtime: Option<String>, base_dir: &Path) -> Self {
        Self {
            runtime: runtime.unwrap_or_else(|| DEFAULT_SSR_RUNTIME.to_string()),
            base_dir: base_dir.to_path_buf(),
        }
    }
}

impl SsrLoader for NodeSsrLoader {
    fn load(&self, module: &Path) -> Result<Arc<dyn SsrRenderer>> {
        if !module.exists() {
            return Err(anyhow!("SSR module not found: {}", module.display()));
        }
        Ok(Arc::new(NodeSsrRenderer {
            runtime: self.runtime.clone(),
            module: module.to_path_buf(),
            base_dir: self.base_dir.clone(),
        }))
    }
}

pub struct NodeSsrRenderer {
    runtime: String,
    module: PathBuf,
    base_dir: PathBuf,
}

#[async_trait]
impl SsrRenderer for NodeSsrRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        debug!("ssr {}", url);
        let output = Command::new(&self.runtime)
            .arg("-e")
            .arg(NODE_RUNNER)
            .arg(escape_win_path(&self.module))
            .arg(url)
            .current_dir(&self.base_dir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.runtime))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
