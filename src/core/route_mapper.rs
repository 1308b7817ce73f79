use std::collections::HashMap;
use tracing::debug;

use crate::models::config::FilePathMapper;
use crate::models::types::{MarkdownSourceData, OutputFileSet, Route};

/// 展平后的路由，路径已与父路由拼接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRoute {
    pub path: String,
    pub data_path: String,
}

fn join_route(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        format!("{}/", parent)
    } else {
        format!("{}/{}", parent, child)
    }
}

fn is_param(segment: &str) -> bool {
    segment.starts_with(':')
}

fn has_params(path: &str) -> bool {
    path.split('/').any(is_param)
}

/// 展平路由树，父路由本身也保留
pub fn flatten_routes(routes: &[Route]) -> Vec<FlatRoute> {
    let mut flat = Vec::new();
    collect_routes(routes, "", &mut flat);
    flat
}

fn collect_routes(routes: &[Route], parent: &str, flat: &mut Vec<FlatRoute>) {
    for route in routes {
        let path = if parent.is_empty() {
            route.path.clone()
        } else {
            join_route(parent, &route.path)
        };
        let data_path = match (&route.data_path, parent.is_empty()) {
            (Some(data_path), true) => data_path.clone(),
            (Some(data_path), false) => join_route(parent, data_path),
            (None, _) => path.clone(),
        };
        flat.push(FlatRoute {
            path: path.clone(),
            data_path,
        });
        collect_routes(&route.children, &path, flat);
    }
}

/// 路由路径对应的输出文件
///
/// `/` 为 `index.html`；以 `.html` 结尾的原样保留；其他写成 `<path>/index.html`。
pub fn route_to_file(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        "index.html".to_string()
    } else if trimmed.ends_with(".html") {
        trimmed.to_string()
    } else {
        format!("{}/index.html", trimmed.trim_end_matches('/'))
    }
}

/// 用数据路径匹配源数据键，最后一个参数段贪婪匹配剩余部分
fn match_data_path(data_path: &str, key: &str) -> Option<HashMap<String, String>> {
    let pattern: Vec<&str> = data_path.split('/').filter(|s| !s.is_empty()).collect();
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if pattern.is_empty() || segments.len() < pattern.len() {
        return None;
    }

    let mut params = HashMap::new();
    let last = pattern.len() - 1;
    for (i, snippet) in pattern.iter().enumerate() {
        if let Some(name) = snippet.strip_prefix(':') {
            let value = if i == last {
                segments[i..].join("/")
            } else {
                segments[i].to_string()
            };
            params.insert(name.to_string(), value);
        } else if *snippet != segments[i] {
            return None;
        }
    }
    if !is_param(pattern[last]) && segments.len() != pattern.len() {
        return None;
    }
    Some(params)
}

fn fill_params(path: &str, params: &HashMap<String, String>) -> Option<String> {
    let mut filled = Vec::new();
    for segment in path.split('/') {
        match segment.strip_prefix(':') {
            Some(name) => filled.push(params.get(name)?.as_str()),
            None => filled.push(segment),
        }
    }
    Some(filled.join("/"))
}

/// 由路由树与源数据生成候选输出路径
///
/// 静态路由各生成一个路径；参数路由为每个匹配的源文件生成一个路径，没有匹配时不生成。
pub fn map_files(routes: &[Route], data: &MarkdownSourceData) -> OutputFileSet {
    let mut files = Vec::new();
    for route in flatten_routes(routes) {
        if !has_params(&route.path) {
            files.push(route_to_file(&route.path));
            continue;
        }
        let before = files.len();
        for key in data.keys() {
            if let Some(path) = match_data_path(&route.data_path, key).and_then(|p| fill_params(&route.path, &p)) {
                files.push(route_to_file(&path));
            }
        }
        debug!("Route {} expanded to {} files", route.path, files.len() - before);
    }
    files
}

/// 对每个候选路径应用用户的路径映射
pub fn apply_path_mapper(files: &[String], mapper: &FilePathMapper) -> Vec<Vec<String>> {
    files.iter().map(|file| mapper.map(file).into_vec()).collect()
}

/// 展平为最终的输出路径，不去重
pub fn flatten(mapped: Vec<Vec<String>>) -> OutputFileSet {
    mapped.into_iter().flatten().collect()
}

/// `map_files` + 路径映射 + `flatten`
pub fn output_files(routes: &[Route], data: &MarkdownSourceData, mapper: &FilePathMapper) -> OutputFileSet {
    flatten(apply_path_mapper(&map_files(routes, data), mapper))
}
