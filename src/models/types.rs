use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 主题提供的逻辑路由
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// 路由路径，可包含 `:name` 参数段
    pub path: String,
    /// 参数路由对应的数据路径，缺省时与 `path` 相同
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    /// 主题组件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// 子路由
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Route>,
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_data_path(mut self, data_path: impl Into<String>) -> Self {
        self.data_path = Some(data_path.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Route>) -> Self {
        self.children = children;
        self
    }
}

/// 路由树
pub type RouteTree = Vec<Route>;

/// 一个源文件经转换器处理后的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// 元数据，至少包含 `filename`
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// 渲染后的正文
    #[serde(default)]
    pub content: Value,
}

impl SourceDocument {
    /// 源文件的 URI 形式路径
    pub fn filename(&self) -> Option<&str> {
        self.meta.get("filename").and_then(Value::as_str)
    }
}

/// 以源文件键（无扩展名的 URI 路径）索引的全部源数据
pub type MarkdownSourceData = BTreeMap<String, SourceDocument>;

/// 需要写出的相对输出路径
pub type OutputFileSet = Vec<String>;

/// 构建结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// 写出的文件（相对输出目录）
    pub files: OutputFileSet,
    /// 是否经过服务端渲染
    pub ssr: bool,
}
