use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::models::config::{SiteConfig, ThemeConfig};
use crate::models::types::RouteTree;
use crate::utils::normalize_path;

/// 虚拟数据模块（客户端）
pub const DATA_PLACEHOLDER: &str = "data.js";
/// 虚拟数据模块（服务端渲染）
pub const SSR_DATA_PLACEHOLDER: &str = "ssr-data.js";

/// 初始化上下文所需的全部字段
#[derive(Debug, Clone)]
pub struct ContextFields {
    pub site: SiteConfig,
    pub theme: ThemeConfig,
    pub entry_template: String,
    pub routes_template: String,
    /// 仅构建时需要
    pub ssr_template: String,
    pub html_template: String,
    pub tmp_dir: PathBuf,
    pub base_dir: PathBuf,
    pub is_build: bool,
}

/// 一次 `dev` 或 `build` 调用的上下文
///
/// 一次性初始化，之后只允许打开 SSR 标记。以 `Arc` 共享，字段不可变。
#[derive(Debug)]
pub struct BuildContext {
    pub site: SiteConfig,
    pub theme: ThemeConfig,
    pub entry_template: String,
    pub routes_template: String,
    pub ssr_template: String,
    pub html_template: String,
    pub tmp_dir: PathBuf,
    pub base_dir: PathBuf,
    is_build: bool,
    is_ssr: AtomicBool,
}

impl BuildContext {
    pub fn initialize(fields: ContextFields) -> Arc<Self> {
        info!("初始化构建上下文 (build = {})", fields.is_build);
        Arc::new(Self {
            site: fields.site,
            theme: fields.theme,
            entry_template: fields.entry_template,
            routes_template: fields.routes_template,
            ssr_template: fields.ssr_template,
            html_template: fields.html_template,
            tmp_dir: fields.tmp_dir,
            base_dir: fields.base_dir,
            is_build: fields.is_build,
            is_ssr: AtomicBool::new(false),
        })
    }

    pub fn is_build(&self) -> bool {
        self.is_build
    }

    pub fn is_ssr(&self) -> bool {
        self.is_ssr.load(Ordering::SeqCst)
    }

    /// 客户端打包成功之后、服务端打包之前调用；只能打开不能关闭
    pub fn turn_on_ssr_flag(&self) {
        self.is_ssr.store(true, Ordering::SeqCst);
    }

    pub fn routes(&self) -> &RouteTree {
        &self.theme.routes
    }

    fn resolve(&self, path: &str) -> PathBuf {
        normalize_path(&self.base_dir.join(path))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.site.output)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.site.source)
    }

    pub fn theme_dir(&self) -> PathBuf {
        self.resolve(&self.site.theme)
    }

    pub fn entry_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("entry.{}.js", self.site.entry_name))
    }

    pub fn routes_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("routes.{}.js", self.site.entry_name))
    }

    pub fn ssr_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("ssr.{}.js", self.site.entry_name))
    }

    /// 服务端打包产物，作为 commonjs 库加载
    pub fn ssr_module_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}-ssr.js", self.site.entry_name))
    }

    pub fn placeholders_dir(&self) -> PathBuf {
        self.tmp_dir.join("placeholders")
    }

    pub fn placeholder_paths(&self) -> [PathBuf; 2] {
        let dir = self.placeholders_dir();
        [dir.join(DATA_PLACEHOLDER), dir.join(SSR_DATA_PLACEHOLDER)]
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> ContextFields {
        ContextFields {
            site: SiteConfig::default(),
            theme: ThemeConfig::default(),
            entry_template: String::new(),
            routes_template: String::new(),
            ssr_template: String::new(),
            html_template: String::new(),
            tmp_dir: PathBuf::from("/site/.bisheng/tmp"),
            base_dir: PathBuf::from("/site"),
            is_build: true,
        }
    }

    #[test]
    fn test_ssr_flag_is_one_way() {
        let context = BuildContext::initialize(fields());
        assert!(!context.is_ssr());
        context.turn_on_ssr_flag();
        context.turn_on_ssr_flag();
        assert!(context.is_ssr());
        assert!(context.is_build());
    }

    #[test]
    fn test_derived_paths() {
        let context = BuildContext::initialize(fields());
        assert_eq!(context.output_dir(), PathBuf::from("/site/_site"));
        assert_eq!(context.source_dir(), PathBuf::from("/site/posts"));
        assert_eq!(context.entry_path(), PathBuf::from("/site/.bisheng/tmp/entry.index.js"));
        assert_eq!(context.routes_path(), PathBuf::from("/site/.bisheng/tmp/routes.index.js"));
        assert_eq!(context.ssr_module_path(), PathBuf::from("/site/.bisheng/tmp/index-ssr.js"));
        assert_eq!(
            context.placeholder_paths()[1],
            PathBuf::from("/site/.bisheng/tmp/placeholders/ssr-data.js")
        );
    }
}
