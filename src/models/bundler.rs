use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 打包模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMode {
    /// 本地开发，不写出文件
    Dev,
    /// 生产构建
    Build,
}

impl BundleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleMode::Dev => "development",
            BundleMode::Build => "production",
        }
    }
}

/// 传给外部打包器的配置，按 webpack 的字段命名序列化
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub entry: BTreeMap<String, String>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub module: ModuleConfig,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_server: Option<Map<String, Value>>,
}

fn default_target() -> String {
    "web".to_string()
}

impl BundlerConfig {
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|plugin| plugin.name == name)
    }

    pub fn rule_for(&self, test: &str) -> Option<&ModuleRule> {
        self.module.rules.iter().find(|rule| rule.test.as_deref() == Some(test))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub public_path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub chunk_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub rules: Vec<ModuleRule>,
}

/// 模块规则：按模式或按文件列表匹配，交给一串 loader 处理
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(rename = "use", default)]
    pub loaders: Vec<LoaderSpec>,
}

impl ModuleRule {
    pub fn loader_names(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.loader.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSpec {
    pub loader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl LoaderSpec {
    pub fn new(loader: impl Into<String>) -> Self {
        Self {
            loader: loader.into(),
            options: None,
        }
    }

    pub fn with_options(loader: impl Into<String>, options: Value) -> Self {
        Self {
            loader: loader.into(),
            options: Some(options),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

/// 模块解析的搜索路径
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveConfig {
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// 交给用户钩子的打包器接口
#[derive(Debug, Clone)]
pub struct BundlerApi {
    pub mode: BundleMode,
}

impl BundlerApi {
    pub fn new(mode: BundleMode) -> Self {
        Self { mode }
    }

    pub fn plugin(&self, name: impl Into<String>, options: Value) -> PluginSpec {
        PluginSpec {
            name: name.into(),
            options,
        }
    }

    pub fn rule(&self, test: impl Into<String>, loaders: &[&str]) -> ModuleRule {
        ModuleRule {
            test: Some(test.into()),
            loaders: loaders.iter().map(|l| LoaderSpec::new(*l)).collect(),
            ..Default::default()
        }
    }
}
