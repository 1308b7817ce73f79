use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use colored::Colorize;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::bundle_config::{self, add_production_plugins, common_config, enable_hot_reload, ssr_config};
use crate::core::bundler::{Bundler, CommandBundler};
use crate::core::context::{BuildContext, ContextFields};
use crate::core::data_loader::DataLoader;
use crate::core::error::{BuildError, BundleError};
use crate::core::route_mapper::output_files;
use crate::core::server::{open_browser, Server};
use crate::core::source_data;
use crate::core::ssr::{NodeSsrLoader, SsrLoader};
use crate::models::bundler::BundleMode;
use crate::models::config::{merge, resolve_theme_paths, SiteConfig, SiteOverrides, ThemeConfig};
use crate::models::types::{BuildReport, MarkdownSourceData};
use crate::theme::renderer::{render, render_to, write_file};
use crate::theme::{read_template, TemplatePaths, HTML_TEMPLATE, PLACEHOLDER_MODULE};
use crate::utils::{ensure_leading_slash, escape_win_path, filename_to_url, normalize_path};

/// 源文件变化后等待的时间，合并连续事件
const DEBOUNCE: Duration = Duration::from_millis(300);

/// 一次 `dev` / `build` 调用的输入
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// 入口、路由、服务端渲染模块的模板
    pub templates: TemplatePaths,
    /// 用户配置
    pub overrides: SiteOverrides,
    /// 不提供时从 `<theme>/theme.yml` 读取
    pub theme: Option<ThemeConfig>,
    /// 构建时是否做服务端渲染
    pub ssr: bool,
}

impl BuildRequest {
    pub fn new(templates: TemplatePaths, overrides: SiteOverrides) -> Self {
        Self {
            templates,
            overrides,
            theme: None,
            ssr: false,
        }
    }

    pub fn with_theme(mut self, theme: ThemeConfig) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_ssr(mut self, ssr: bool) -> Self {
        self.ssr = ssr;
        self
    }
}

/// 构建编排器
///
/// 打包器与服务端渲染加载器可以替换；未设置时按站点配置使用命令行实现。
#[derive(Clone)]
pub struct Engine {
    /// 站点目录
    pub base_dir: PathBuf,
    bundler: Option<Arc<dyn Bundler>>,
    ssr_loader: Option<Arc<dyn SsrLoader>>,
}

impl Engine {
    pub fn new(base_dir: PathBuf) -> Self {
        info!("工作目录: {}", base_dir.display());
        Self {
            base_dir,
            bundler: None,
            ssr_loader: None,
        }
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub fn with_ssr_loader(mut self, loader: Arc<dyn SsrLoader>) -> Self {
        self.ssr_loader = Some(loader);
        self
    }

    fn bundler(&self, context: &BuildContext) -> Arc<dyn Bundler> {
        match &self.bundler {
            Some(bundler) => bundler.clone(),
            None => Arc::new(CommandBundler::new(
                context.site.bundler_command.clone(),
                &context.base_dir,
                &context.tmp_dir,
            )),
        }
    }

    fn ssr_loader(&self, context: &BuildContext) -> Arc<dyn SsrLoader> {
        match &self.ssr_loader {
            Some(loader) => loader.clone(),
            None => Arc::new(NodeSsrLoader::new(context.site.ssr_command.clone(), &context.base_dir)),
        }
    }

    /// 合并配置，读取主题与模板，初始化上下文
    fn prepare(&self, request: &BuildRequest, is_build: bool) -> Result<Arc<BuildContext>> {
        let site = merge(SiteConfig::default(), request.overrides.clone())?;

        let theme_dir = normalize_path(&self.base_dir.join(&site.theme));
        let theme = match &request.theme {
            Some(theme) => theme.clone(),
            None => ThemeConfig::load(&theme_dir)?,
        };
        let theme = resolve_theme_paths(theme, &self.base_dir);

        let html_template = match &site.html_template {
            Some(path) => read_template(&self.base_dir.join(path))?,
            None => HTML_TEMPLATE.to_string(),
        };
        let ssr_template = if is_build {
            read_template(&request.templates.ssr)?
        } else {
            String::new()
        };

        Ok(BuildContext::initialize(ContextFields {
            entry_template: read_template(&request.templates.entry)?,
            routes_template: read_template(&request.templates.routes)?,
            ssr_template,
            html_template,
            tmp_dir: normalize_path(&request.templates.tmp_dir()),
            base_dir: self.base_dir.clone(),
            is_build,
            site,
            theme,
        }))
    }

    /// 开发模式：监视打包、保持源数据更新、启动开发服务器
    pub async fn dev(&self, request: BuildRequest) -> Result<()> {
        let context = self.prepare(&request, false)?;
        prepare_dirs(&context)?;

        let index = context.output_dir().join("index.html");
        write_file(&index, &render_shell(&context, "/", None)?)?;
        write_modules(&context, "/")?;

        let mut config = bundle_config::build(common_config(&context), BundleMode::Dev, &context)?;
        enable_hot_reload(&mut config);
        config.dev_server = Some(dev_server_options(&context));

        let loader = DataLoader::new(context.placeholder_paths());
        let handle = self
            .bundler(&context)
            .watch(&context.site.entry_name, &config, &loader)
            .await?;

        loader.job_done(aggregate(&context).await?);
        let _watcher = watch_sources(context.clone(), loader.clone())?;

        let server = Server::new(context.output_dir(), context.site.port, true);
        let result = server.start(open_browser).await;

        handle.stop().await?;
        result
    }

    /// 生产构建，不需要回调时使用
    pub async fn build(&self, request: BuildRequest) -> Result<BuildReport> {
        self.build_with(request, |_| {}).await
    }

    /// 生产构建，全部文件写出后调用 `callback`
    ///
    /// 任何错误都会中止构建，此时不调用 `callback`。
    pub async fn build_with<F>(&self, request: BuildRequest, callback: F) -> Result<BuildReport>
    where
        F: FnOnce(&BuildReport) + Send,
    {
        let context = self.prepare(&request, true)?;
        prepare_dirs(&context)?;
        write_modules(&context, &context.site.root)?;

        let mut config = bundle_config::build(common_config(&context), BundleMode::Build, &context)?;
        add_production_plugins(&mut config, std::env::var("NODE_ENV").ok());
        let ssr_bundle = ssr_config(&config, &context);
        let ssr_data = module_data(&[("routesPath", escape_win_path(context.routes_path()))]);
        render_to(&context.ssr_path(), &context.ssr_template, &ssr_data)?;

        let loader = DataLoader::new(context.placeholder_paths());
        let bundler = self.bundler(&context);

        // 聚合完成即放行 loader，与打包并行
        let aggregation = async {
            let data = aggregate(&context).await?;
            loader.job_done(data.clone());
            Ok::<_, anyhow::Error>(data)
        };
        let (stats, data) = tokio::try_join!(
            bundler.run(&context.site.entry_name, &config, &loader),
            aggregation
        )?;

        if stats.has_errors() {
            let diagnostics = stats.errors_only();
            error!("{}", diagnostics);
            return Err(anyhow!(BundleError::Compilation { diagnostics }));
        }
        for warning in &stats.warnings {
            warn!(target: "bundler", "{}", warning);
        }

        let files = output_files(context.routes(), &data, &context.site.file_path_mapper);
        debug!("{} output files", files.len());

        if !request.ssr {
            let html = render_shell(&context, &context.site.root, None)?;
            let output_dir = context.output_dir();
            for file in &files {
                let path = output_dir.join(file);
                write_file(&path, &html)?;
                info!("{} {}", "Created:".green(), escape_win_path(&path));
            }
            let report = BuildReport { files, ssr: false };
            callback(&report);
            return Ok(report);
        }

        context.turn_on_ssr_flag();
        let ssr_name = format!("{}-ssr", context.site.entry_name);
        let ssr_stats = bundler
            .run(&ssr_name, &ssr_bundle, &loader)
            .await
            .map_err(|e| anyhow!(BundleError::SsrPass { message: format!("{:#}", e) }))?;
        if ssr_stats.has_errors() {
            return Err(anyhow!(BundleError::SsrPass {
                message: ssr_stats.errors_only(),
            }));
        }

        let renderer = self.ssr_loader(&context).load(&context.ssr_module_path())?;

        let mut renders = JoinSet::new();
        for file in files.iter().cloned() {
            let renderer = renderer.clone();
            let context = context.clone();
            renders.spawn(async move {
                let url = ensure_leading_slash(&filename_to_url(&file));
                let content = renderer.render(&url).await.map_err(|e| {
                    anyhow!(BuildError::Render {
                        path: file.clone(),
                        message: format!("{:#}", e),
                    })
                })?;
                let html = render_shell(&context, &context.site.root, Some(&content))?;
                let path = context.output_dir().join(&file);
                write_file(&path, &html)?;
                info!("{} {}", "Created:".green(), escape_win_path(&path));
                Ok::<_, anyhow::Error>(())
            });
        }

        while let Some(joined) = renders.join_next().await {
            let outcome = joined
                .map_err(|e| anyhow!("render task failed: {}", e))
                .and_then(|rendered| rendered);
            if let Err(e) = outcome {
                renders.abort_all();
                return Err(e);
            }
        }

        let report = BuildReport { files, ssr: true };
        callback(&report);
        Ok(report)
    }

    /// 删除输出目录和临时目录
    pub fn clean(&self, overrides: SiteOverrides, tmp_dir: &Path) -> Result<()> {
        let site = merge(SiteConfig::default(), overrides)?;
        let output_dir = normalize_path(&self.base_dir.join(&site.output));
        for dir in [output_dir, normalize_path(tmp_dir)] {
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("删除目录失败: {}", dir.display()))?;
                info!("Removed {}", dir.display());
            }
        }
        Ok(())
    }
}

/// 创建临时目录、输出目录，写入占位模块
fn prepare_dirs(context: &BuildContext) -> Result<()> {
    fs::create_dir_all(&context.tmp_dir)
        .with_context(|| format!("创建目录失败: {}", context.tmp_dir.display()))?;
    let output_dir = context.output_dir();
    fs::create_dir_all(&output_dir).with_context(|| format!("创建目录失败: {}", output_dir.display()))?;
    for placeholder in context.placeholder_paths() {
        write_file(&placeholder, PLACEHOLDER_MODULE)?;
    }
    Ok(())
}

fn module_data(entries: &[(&str, String)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.clone())))
        .collect()
}

/// 写出路由模块与入口模块
fn write_modules(context: &BuildContext, root: &str) -> Result<()> {
    // 主题自带设置作为默认值，站点配置覆盖
    let mut theme_config = context.theme.settings.clone();
    if let Value::Object(site_theme) = &context.site.theme_config {
        theme_config.extend(site_theme.clone());
    }

    let routes_data = module_data(&[
        ("themePath", escape_win_path(context.theme_dir())),
        ("themeConfig", serde_json::to_string(&theme_config)?),
        ("themeRoutes", serde_json::to_string(context.routes())?),
        ("themePlugins", serde_json::to_string(&context.theme.plugins)?),
    ]);
    render_to(&context.routes_path(), &context.routes_template, &routes_data)?;

    let entry_data = module_data(&[
        ("routesPath", escape_win_path(context.routes_path())),
        ("root", root.to_string()),
    ]);
    render_to(&context.entry_path(), &context.entry_template, &entry_data)
}

/// 渲染 HTML 外壳
///
/// `content` 总是存在，没有服务端渲染内容时为空串；额外数据可以覆盖 `root` 与 `content`。
fn render_shell(context: &BuildContext, root: &str, content: Option<&str>) -> Result<String> {
    let mut data = Map::new();
    data.insert("root".to_string(), Value::String(root.to_string()));
    data.insert("content".to_string(), Value::String(content.unwrap_or_default().to_string()));
    data.extend(context.site.html_template_extra_data.clone());
    render(&context.html_template, &data)
}

/// 开发服务器选项：默认值，用户配置，最后是固定项
fn dev_server_options(context: &BuildContext) -> Map<String, Value> {
    let mut options = Map::new();
    options.insert("quiet".to_string(), json!(true));
    options.insert("hot".to_string(), json!(true));
    options.extend(context.site.dev_server_config.clone());
    options.insert("contentBase".to_string(), json!(escape_win_path(context.output_dir())));
    options.insert("historyApiFallback".to_string(), json!(true));
    options.insert("host".to_string(), json!("localhost"));
    options
}

/// 扫描源目录
async fn aggregate(context: &BuildContext) -> Result<Arc<MarkdownSourceData>> {
    let base_dir = context.base_dir.clone();
    let source_dir = context.source_dir();
    let rules = context.site.transformers.clone();
    let data = tokio::task::spawn_blocking(move || source_data::generate(&base_dir, &source_dir, &rules))
        .await
        .context("source aggregation task failed")??;
    Ok(Arc::new(data))
}

/// 源目录变化时重新扫描并发布数据，返回的监视器需保持存活
fn watch_sources(context: Arc<BuildContext>, loader: DataLoader) -> Result<Option<RecommendedWatcher>> {
    let source_dir = context.source_dir();
    if !source_dir.exists() {
        warn!("Source directory not found, not watching: {}", source_dir.display());
        return Ok(None);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => error!("监视错误: {:?}", e),
        },
        NotifyConfig::default(),
    )
    .map_err(|e| anyhow!("创建文件监视器失败: {}", e))?;
    watcher.watch(&source_dir, RecursiveMode::Recursive)?;
    info!("{} {}", "Watching".green(), source_dir.display());

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !is_content_change(&event) {
                continue;
            }
            // 合并短时间内的连续事件
            while let Ok(Some(_)) = tokio::time::timeout(DEBOUNCE, rx.recv()).await {}

            info!("Source changed, reloading ...");
            match aggregate(&context).await {
                Ok(data) => loader.job_done(data),
                Err(e) => error!("重新加载源数据失败: {:#}", e),
            }
        }
    });

    Ok(Some(watcher))
}

fn is_content_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::Route;

    fn context(dir: &Path, overrides: SiteOverrides) -> Result<Arc<BuildContext>> {
        let templates = TemplatePaths::materialize(&dir.join(".bisheng/templates"))?;
        let request = BuildRequest::new(templates, overrides).with_theme(ThemeConfig {
            routes: vec![Route::new("/")],
            ..Default::default()
        });
        Engine::new(dir.to_path_buf()).prepare(&request, true)
    }

    #[test]
    fn test_prepare_resolves_tmp_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path(), SiteOverrides::default())?;
        assert_eq!(context.tmp_dir, dir.path().join(".bisheng/tmp"));
        assert!(context.is_build());
        assert!(!context.ssr_template.is_empty());
        Ok(())
    }

    #[test]
    fn test_dev_server_options_pin_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut user = Map::new();
        user.insert("quiet".to_string(), json!(false));
        user.insert("host".to_string(), json!("0.0.0.0"));
        user.insert("compress".to_string(), json!(true));
        let context = context(
            dir.path(),
            SiteOverrides {
                dev_server_config: Some(user),
                ..Default::default()
            },
        )?;

        let options = dev_server_options(&context);
        assert_eq!(options["quiet"], json!(false));
        assert_eq!(options["hot"], json!(true));
        assert_eq!(options["compress"], json!(true));
        assert_eq!(options["host"], json!("localhost"));
        assert_eq!(options["historyApiFallback"], json!(true));
        Ok(())
    }

    #[test]
    fn test_write_modules() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path(), SiteOverrides::default())?;
        prepare_dirs(&context)?;
        write_modules(&context, "/docs/")?;

        let entry = fs::read_to_string(context.entry_path())?;
        assert!(entry.contains("root: '/docs/'"));
        assert!(entry.contains(&escape_win_path(context.routes_path())));
        let routes = fs::read_to_string(context.routes_path())?;
        assert!(routes.contains(r#"const themeRoutes = [{"path":"/"#));
        for placeholder in context.placeholder_paths() {
            assert_eq!(fs::read_to_string(placeholder)?, PLACEHOLDER_MODULE);
        }
        Ok(())
    }

    #[test]
    fn test_render_shell_with_extra_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut extra = Map::new();
        extra.insert("title".to_string(), json!("Docs"));
        let context = context(
            dir.path(),
            SiteOverrides {
                html_template_extra_data: Some(extra),
                ..Default::default()
            },
        )?;
        let html = render_shell(&context, "/", Some("<h1>Hi</h1>"))?;
        assert!(html.contains("<title>Docs</title>"));
        assert!(html.contains("<div id=\"react-content\"><h1>Hi</h1></div>"));
        Ok(())
    }
}
