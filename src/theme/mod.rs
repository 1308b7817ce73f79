pub mod renderer;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use renderer::write_file;

// 内置模板
pub const ENTRY_TEMPLATE: &str = include_str!("../../embed/templates/entry.js.njk");
pub const ROUTES_TEMPLATE: &str = include_str!("../../embed/templates/routes.js.njk");
pub const SSR_TEMPLATE: &str = include_str!("../../embed/templates/ssr.js.njk");
pub const HTML_TEMPLATE: &str = include_str!("../../embed/templates/template.html");
pub const PLACEHOLDER_MODULE: &str = include_str!("../../embed/templates/placeholder.js");

/// 生成源码所用模板文件的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePaths {
    pub entry: PathBuf,
    pub routes: PathBuf,
    pub ssr: PathBuf,
}

impl TemplatePaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            entry: dir.join("entry.js.njk"),
            routes: dir.join("routes.js.njk"),
            ssr: dir.join("ssr.js.njk"),
        }
    }

    /// 把内置模板写入目录，返回它们的路径
    pub fn materialize(dir: &Path) -> Result<Self> {
        let paths = Self::new(dir);
        write_file(&paths.entry, ENTRY_TEMPLATE)?;
        write_file(&paths.routes, ROUTES_TEMPLATE)?;
        write_file(&paths.ssr, SSR_TEMPLATE)?;
        Ok(paths)
    }

    /// 临时目录与模板目录同级
    pub fn tmp_dir(&self) -> PathBuf {
        let templates_dir = self.entry.parent().unwrap_or_else(|| Path::new("."));
        templates_dir.join("..").join("tmp")
    }
}

/// 读取模板文本
pub fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read template: {}", path.display()))
}
