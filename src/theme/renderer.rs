use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fs;
use std::path::Path;
use tera::{Context as TeraContext, Tera};
use tracing::{debug, error};

use crate::core::error::BuildError;

/// 用数据字典渲染模板文本，不做任何 I/O
///
/// 同样的模板和数据总是得到完全相同的输出。生成的是 JS 源码和 HTML 外壳，
/// 因此关闭自动转义。
pub fn render(template: &str, data: &Map<String, Value>) -> Result<String> {
    let context = TeraContext::from_value(Value::Object(data.clone()))?;
    Tera::one_off(template, &context, false).map_err(|e| {
        let message = error_chain(&e);
        error!("模板渲染失败: {}", message);
        anyhow!(message)
    })
}

/// 渲染模板并写入目标路径，必要时创建父目录
pub fn render_to(path: &Path, template: &str, data: &Map<String, Value>) -> Result<()> {
    let content = render(template, data).map_err(|e| {
        anyhow!(BuildError::Template {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    })?;
    write_file(path, &content)
}

/// 写文件，必要时创建父目录
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("创建目录失败: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("写入文件失败: {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn error_chain(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_render_is_deterministic() -> Result<()> {
        let template = "root={{ root }} routes={{ themeRoutes }}";
        let data = data(json!({ "root": "/", "themeRoutes": "[{\"path\":\"/\"}]" }));
        let first = render(template, &data)?;
        let second = render(template, &data)?;
        assert_eq!(first, second);
        assert_eq!(first, "root=/ routes=[{\"path\":\"/\"}]");
        Ok(())
    }

    #[test]
    fn test_render_does_not_escape() -> Result<()> {
        let out = render("{{ content }}", &data(json!({ "content": "<h1>Hi</h1>" })))?;
        assert_eq!(out, "<h1>Hi</h1>");
        Ok(())
    }

    #[test]
    fn test_render_reports_syntax_errors() {
        assert!(render("{{ unclosed", &Map::new()).is_err());
    }

    #[test]
    fn test_render_to_creates_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/deeper/out.js");
        render_to(&path, "x={{ x }}", &data(json!({ "x": 1 })))?;
        assert_eq!(fs::read_to_string(&path)?, "x=1");
        Ok(())
    }
}
