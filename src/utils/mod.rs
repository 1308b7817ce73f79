use std::path::{Component, Path, PathBuf};

/// 将路径中的反斜杠统一为正斜杠
///
/// 生成的 JS 源码中反斜杠会被当作转义字符，所有注入模板的路径都要先经过这里。
pub fn escape_win_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// 转换为与操作系统无关的 URI 形式路径
pub fn to_uri_path<P: AsRef<Path>>(path: P) -> String {
    let escaped = escape_win_path(path);
    escaped.strip_prefix("./").unwrap_or(&escaped).to_string()
}

/// 输出文件名转换为逻辑 URL
///
/// `index.html` 变为空串，`about/index.html` 变为 `about/`，`about.html` 变为 `about`。
pub fn filename_to_url(filename: &str) -> String {
    if let Some(prefix) = filename.strip_suffix("index.html") {
        return prefix.to_string();
    }
    filename.strip_suffix(".html").unwrap_or(filename).to_string()
}

/// 相对路径（以 `.` 开头）解析到基础目录，其余原样返回
pub fn resolve_relative(base: &Path, path: &str) -> String {
    if path.starts_with('.') {
        escape_win_path(normalize_path(&base.join(path)))
    } else {
        path.to_string()
    }
}

/// 词法规范化路径，去掉 `.` 并折叠 `..`
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// 确保路径以斜杠开头
pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

pub mod markdown;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_to_url() {
        assert_eq!(filename_to_url("index.html"), "");
        assert_eq!(filename_to_url("about/index.html"), "about/");
        assert_eq!(filename_to_url("about.html"), "about");
        assert_eq!(filename_to_url("docs/intro.html"), "docs/intro");
    }

    #[test]
    fn test_escape_win_path() {
        assert_eq!(escape_win_path(r"C:\site\tmp\routes.index.js"), "C:/site/tmp/routes.index.js");
        assert_eq!(escape_win_path("/site/tmp"), "/site/tmp");
    }

    #[test]
    fn test_to_uri_path() {
        assert_eq!(to_uri_path("./posts/hello.md"), "posts/hello.md");
        assert_eq!(to_uri_path(r"posts\nested\a.md"), "posts/nested/a.md");
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/work/site");
        assert_eq!(resolve_relative(base, "./plugins/toc"), "/work/site/plugins/toc");
        assert_eq!(resolve_relative(base, "../shared/p"), "/work/shared/p");
        assert_eq!(resolve_relative(base, "bisheng-plugin-react"), "bisheng-plugin-react");
        assert_eq!(resolve_relative(base, "/abs/plugin"), "/abs/plugin");
    }

    #[test]
    fn test_slashes() {
        assert_eq!(ensure_leading_slash("about/"), "/about/");
        assert_eq!(ensure_leading_slash("/"), "/");
    }
}
