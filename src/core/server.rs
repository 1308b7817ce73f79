use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// 开发服务器，提供输出目录中的静态文件
pub struct Server {
    /// 站点目录
    public_dir: PathBuf,
    /// 端口
    port: u16,
    /// 找不到文件时回退到 `index.html`
    history_api_fallback: bool,
}

impl Server {
    /// 创建新的服务器
    pub fn new(public_dir: PathBuf, port: u16, history_api_fallback: bool) -> Self {
        Self {
            public_dir,
            port,
            history_api_fallback,
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    fn router(&self) -> Router {
        let app = if self.history_api_fallback {
            let index = ServeFile::new(self.public_dir.join("index.html"));
            Router::new().fallback_service(ServeDir::new(&self.public_dir).fallback(index))
        } else {
            Router::new().fallback_service(ServeDir::new(&self.public_dir))
        };
        app.layer(TraceLayer::new_for_http())
    }

    /// 启动服务器，监听成功后调用 `on_ready`，Ctrl+C 时退出
    pub async fn start<F>(self, on_ready: F) -> Result<()>
    where
        F: FnOnce(&str) + Send,
    {
        let app = self.router();

        let addr: SocketAddr = format!("0.0.0.0:{}", self.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let url = self.url();
        info!("Server started at {}", url);
        on_ready(&url);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for Ctrl+C: {}", e);
                }
            })
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// 在浏览器中打开页面，失败只记录警告
pub fn open_browser(url: &str) {
    if let Err(e) = open::that(url) {
        warn!("Failed to open browser: {}", e);
    }
}
