use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::BuildError;
use crate::models::bundler::{BundlerApi, BundlerConfig};
use crate::models::types::RouteTree;
use crate::utils::resolve_relative;

/// 内置 Markdown 转换器的名称
pub const MARKDOWN_TRANSFORMER: &str = "markdown";
/// 内置 Markdown 转换器匹配的文件
pub const MARKDOWN_PATTERN: &str = r"\.md$";

/// 站点目录下按顺序查找的配置文件
pub const CONFIG_FILE_NAMES: &[&str] = &["bisheng.config.yml", "bisheng.config.yaml", "bisheng.config.toml"];

/// 内容转换规则，匹配模式始终以字符串保存，转换器可能运行在子进程中
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformerRule {
    /// 正则表达式源码
    pub test: String,
    /// 转换器：内置 `markdown` 或一条 shell 命令
    #[serde(rename = "use")]
    pub handler: String,
}

impl TransformerRule {
    pub fn markdown() -> Self {
        Self {
            test: MARKDOWN_PATTERN.to_string(),
            handler: MARKDOWN_TRANSFORMER.to_string(),
        }
    }

    pub fn is_markdown(&self) -> bool {
        self.handler == MARKDOWN_TRANSFORMER
    }

    pub fn regex(&self) -> Result<Regex> {
        Regex::new(&self.test).map_err(|e| {
            anyhow!(BuildError::Config(format!("invalid transformer pattern `{}`: {}", self.test, e)))
        })
    }
}

/// 用户提供的匹配模式，编译好的正则或字符串
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "String")]
pub enum RuleTest {
    Regex(Regex),
    Source(String),
}

impl From<String> for RuleTest {
    fn from(source: String) -> Self {
        RuleTest::Source(source)
    }
}

impl From<&str> for RuleTest {
    fn from(source: &str) -> Self {
        RuleTest::Source(source.to_string())
    }
}

impl From<Regex> for RuleTest {
    fn from(regex: Regex) -> Self {
        RuleTest::Regex(regex)
    }
}

impl RuleTest {
    /// 规范化为正则源码；接受 `/\.md$/i` 这样的字面量写法
    pub fn normalize(&self) -> Result<String> {
        let source = match self {
            RuleTest::Regex(regex) => return Ok(regex.as_str().to_string()),
            RuleTest::Source(source) => source,
        };

        let normalized = match split_literal(source) {
            Some((body, flags)) => {
                let flags: String = flags.chars().filter(|c| matches!(c, 'i' | 'm' | 's')).collect();
                if flags.is_empty() {
                    body.to_string()
                } else {
                    format!("(?{}){}", flags, body)
                }
            }
            None => source.clone(),
        };

        Regex::new(&normalized).map_err(|e| {
            anyhow!(BuildError::Config(format!("invalid transformer pattern `{}`: {}", source, e)))
        })?;
        Ok(normalized)
    }
}

fn split_literal(source: &str) -> Option<(&str, &str)> {
    let rest = source.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if body.is_empty() || !flags.chars().all(|c| "gimsuy".contains(c)) {
        return None;
    }
    Some((body, flags))
}

/// 合并前的转换规则
#[derive(Debug, Clone, Deserialize)]
pub struct TransformerRuleSpec {
    pub test: RuleTest,
    #[serde(rename = "use")]
    pub handler: String,
}

impl TransformerRuleSpec {
    pub fn new(test: impl Into<RuleTest>, handler: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            handler: handler.into(),
        }
    }
}

/// 修改生成的打包配置的钩子
#[derive(Clone)]
pub struct BundlerConfigHook(Arc<dyn Fn(BundlerConfig, &BundlerApi) -> Result<BundlerConfig> + Send + Sync>);

impl BundlerConfigHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(BundlerConfig, &BundlerApi) -> Result<BundlerConfig> + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub fn identity() -> Self {
        Self::new(|config, _| Ok(config))
    }

    pub fn call(&self, config: BundlerConfig, api: &BundlerApi) -> Result<BundlerConfig> {
        (self.0)(config, api)
    }
}

impl fmt::Debug for BundlerConfigHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BundlerConfigHook")
    }
}

/// 路径映射结果，允许一对多展开
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedPaths {
    One(String),
    Many(Vec<String>),
}

impl MappedPaths {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            MappedPaths::One(path) => vec![path],
            MappedPaths::Many(paths) => paths,
        }
    }
}

/// 对每个输出文件路径做改写的钩子
#[derive(Clone)]
pub struct FilePathMapper(Arc<dyn Fn(&str) -> MappedPaths + Send + Sync>);

impl FilePathMapper {
    pub fn new<F>(mapper: F) -> Self
    where
        F: Fn(&str) -> MappedPaths + Send + Sync + 'static,
    {
        Self(Arc::new(mapper))
    }

    pub fn identity() -> Self {
        Self::new(|path| MappedPaths::One(path.to_string()))
    }

    pub fn map(&self, path: &str) -> MappedPaths {
        (self.0)(path)
    }
}

impl fmt::Debug for FilePathMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilePathMapper")
    }
}

/// 样式处理插件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcssConfig {
    /// 插件名，或 `[name, options]`
    pub plugins: Vec<Value>,
}

impl Default for PostcssConfig {
    fn default() -> Self {
        Self {
            plugins: vec![
                json!("rucksack-css"),
                json!([
                    "autoprefixer",
                    { "browsers": ["last 2 versions", "Firefox ESR", "> 1%", "ie >= 8", "iOS >= 8", "Android >= 4"] }
                ]),
            ],
        }
    }
}

/// 合并后的站点配置
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub port: u16,
    pub source: String,
    pub output: String,
    pub theme: String,
    pub transformers: Vec<TransformerRule>,
    pub dev_server_config: Map<String, Value>,
    pub postcss_config: PostcssConfig,
    pub bundler_config: BundlerConfigHook,
    pub entry_name: String,
    pub root: String,
    pub file_path_mapper: FilePathMapper,
    /// HTML 外壳模板，缺省使用内置模板
    pub html_template: Option<PathBuf>,
    pub html_template_extra_data: Map<String, Value>,
    /// 传给主题的设置，序列化进路由模块
    pub theme_config: Value,
    /// 打包命令，`{config}` 会被替换为配置文件路径
    pub bundler_command: Option<String>,
    /// 服务端渲染使用的 JS 运行时
    pub ssr_command: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            source: "./posts".to_string(),
            output: "./_site".to_string(),
            theme: "./_theme".to_string(),
            transformers: Vec::new(),
            dev_server_config: Map::new(),
            postcss_config: PostcssConfig::default(),
            bundler_config: BundlerConfigHook::identity(),
            entry_name: "index".to_string(),
            root: "/".to_string(),
            file_path_mapper: FilePathMapper::identity(),
            html_template: None,
            html_template_extra_data: Map::new(),
            theme_config: Value::Object(Map::new()),
            bundler_command: None,
            ssr_command: None,
        }
    }
}

/// 用户的配置覆盖项，未给出的字段保留默认值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteOverrides {
    pub port: Option<u16>,
    pub source: Option<String>,
    pub output: Option<String>,
    pub theme: Option<String>,
    pub transformers: Option<Vec<TransformerRuleSpec>>,
    pub dev_server_config: Option<Map<String, Value>>,
    pub postcss_config: Option<PostcssConfig>,
    #[serde(skip)]
    pub bundler_config: Option<BundlerConfigHook>,
    pub entry_name: Option<String>,
    pub root: Option<String>,
    #[serde(skip)]
    pub file_path_mapper: Option<FilePathMapper>,
    pub html_template: Option<PathBuf>,
    pub html_template_extra_data: Option<Map<String, Value>>,
    pub theme_config: Option<Value>,
    pub bundler_command: Option<String>,
    pub ssr_command: Option<String>,
}

impl SiteOverrides {
    /// 从文件加载，按扩展名选择 YAML 或 TOML
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let overrides = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(overrides)
    }

    /// 在站点目录中查找配置文件，找不到时返回空覆盖项
    pub fn discover(base_dir: &Path) -> Result<Self> {
        for name in CONFIG_FILE_NAMES {
            let path = base_dir.join(name);
            if path.exists() {
                debug!("Loading site config from {}", path.display());
                return Self::load(&path);
            }
        }
        warn!("No config file found in {}, using defaults", base_dir.display());
        Ok(Self::default())
    }
}

/// 合并默认配置与覆盖项
///
/// 顶层字段浅合并，覆盖项优先。转换规则末尾追加内置 Markdown 规则，
/// 所有匹配模式规范化为字符串，同一模式只保留第一条。
pub fn merge(defaults: SiteConfig, overrides: SiteOverrides) -> Result<SiteConfig> {
    let transformers = match overrides.transformers {
        Some(specs) => specs
            .iter()
            .map(|spec| {
                Ok(TransformerRule {
                    test: spec.test.normalize()?,
                    handler: spec.handler.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => defaults.transformers,
    };

    let mut rules: Vec<TransformerRule> = Vec::with_capacity(transformers.len() + 1);
    for rule in transformers.into_iter().chain(std::iter::once(TransformerRule::markdown())) {
        if rules.iter().any(|existing| existing.test == rule.test) {
            debug!("Skipping duplicate transformer for pattern {}", rule.test);
            continue;
        }
        rules.push(rule);
    }

    Ok(SiteConfig {
        port: overrides.port.unwrap_or(defaults.port),
        source: overrides.source.unwrap_or(defaults.source),
        output: overrides.output.unwrap_or(defaults.output),
        theme: overrides.theme.unwrap_or(defaults.theme),
        transformers: rules,
        dev_server_config: overrides.dev_server_config.unwrap_or(defaults.dev_server_config),
        postcss_config: overrides.postcss_config.unwrap_or(defaults.postcss_config),
        bundler_config: overrides.bundler_config.unwrap_or(defaults.bundler_config),
        entry_name: overrides.entry_name.unwrap_or(defaults.entry_name),
        root: overrides.root.unwrap_or(defaults.root),
        file_path_mapper: overrides.file_path_mapper.unwrap_or(defaults.file_path_mapper),
        html_template: overrides.html_template.or(defaults.html_template),
        html_template_extra_data: overrides
            .html_template_extra_data
            .unwrap_or(defaults.html_template_extra_data),
        theme_config: overrides.theme_config.unwrap_or(defaults.theme_config),
        bundler_command: overrides.bundler_command.or(defaults.bundler_command),
        ssr_command: overrides.ssr_command.or(defaults.ssr_command),
    })
}

/// 主题配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeConfig {
    /// 主题插件路径
    #[serde(default)]
    pub plugins: Vec<String>,
    /// 主题路由
    #[serde(default)]
    pub routes: RouteTree,
    /// 其他主题设置
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ThemeConfig {
    /// 从主题目录中的 `theme.yml` 加载
    pub fn load(theme_dir: &Path) -> Result<Self> {
        let path = theme_dir.join("theme.yml");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read theme config file: {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| "Failed to parse theme.yml")
    }
}

/// 将以 `.` 开头的插件路径解析为基于工作目录的绝对路径
pub fn resolve_theme_paths(mut theme: ThemeConfig, cwd: &Path) -> ThemeConfig {
    theme.plugins = theme
        .plugins
        .iter()
        .map(|plugin| resolve_relative(cwd, plugin))
        .collect();
    theme
}
