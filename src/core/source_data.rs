use anyhow::{anyhow, Context, Result};
use gray_matter::engine::YAML;
use gray_matter::{Matter, Pod};
use rayon::prelude::*;
use serde_json::{Map, Number, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::models::config::TransformerRule;
use crate::models::types::{MarkdownSourceData, SourceDocument};
use crate::utils::{markdown, to_uri_path};

/// 把源文件转换为结构化数据
pub trait Transformer: Send + Sync {
    fn transform(&self, filename: &str, content: &str) -> Result<SourceDocument>;
}

/// 内置 Markdown 转换器：YAML front matter 进入 `meta`，正文渲染为 HTML
pub struct MarkdownTransformer;

impl Transformer for MarkdownTransformer {
    fn transform(&self, filename: &str, content: &str) -> Result<SourceDocument> {
        let matter = Matter::<YAML>::new();
        let parsed = matter.parse(content);

        let mut meta = match parsed.data.map(pod_to_json) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        meta.insert("filename".to_string(), Value::String(filename.to_string()));

        let html = markdown::render(&parsed.content)?;
        Ok(SourceDocument {
            meta,
            content: Value::String(html),
        })
    }
}

/// 外部命令转换器：文件内容经 stdin 传入，stdout 输出 `{"meta": .., "content": ..}`
pub struct CommandTransformer {
    command: String,
    base_dir: PathBuf,
}

impl CommandTransformer {
    pub fn new(command: &str, base_dir: &Path) -> Self {
        Self {
            command: command.to_string(),
            base_dir: base_dir.to_path_buf(),
        }
    }
}

impl Transformer for CommandTransformer {
    fn transform(&self, filename: &str, content: &str) -> Result<SourceDocument> {
        let mut child = Command::new("sh")
            .args(["-c", &self.command])
            .current_dir(&self.base_dir)
            .env("BISHENG_FILENAME", filename)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run transformer `{}`", self.command))?;

        // 写 stdin 与读 stdout 同时进行，否则大文件会塞满管道
        let writer = child.stdin.take().map(|mut stdin| {
            let input = content.to_string();
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    debug!("transformer stdin closed early: {}", e);
                }
            })
        });
        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| anyhow!("transformer `{}` stdin writer panicked", self.command))?;
        }
        if !output.status.success() {
            return Err(anyhow!(
                "transformer `{}` failed on {}: {}",
                self.command,
                filename,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let mut document: SourceDocument = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("transformer `{}` printed invalid JSON for {}", self.command, filename))?;
        document
            .meta
            .insert("filename".to_string(), Value::String(filename.to_string()));
        Ok(document)
    }
}

/// 规则对应的转换器
pub fn transformer_for(rule: &TransformerRule, base_dir: &Path) -> Box<dyn Transformer> {
    if rule.is_markdown() {
        Box::new(MarkdownTransformer)
    } else {
        Box::new(CommandTransformer::new(&rule.handler, base_dir))
    }
}

/// 源数据键：相对基础目录的 URI 路径，去掉扩展名
pub fn source_key(base_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base_dir).unwrap_or(path);
    to_uri_path(relative.with_extension(""))
}

/// 扫描源目录，用第一条匹配的规则转换每个文件
pub fn generate(base_dir: &Path, source_dir: &Path, rules: &[TransformerRule]) -> Result<MarkdownSourceData> {
    if !source_dir.exists() {
        warn!("Source directory not found: {}", source_dir.display());
        return Ok(MarkdownSourceData::new());
    }

    let compiled = rules
        .iter()
        .map(|rule| Ok((rule.regex()?, transformer_for(rule, base_dir))))
        .collect::<Result<Vec<_>>>()?;

    let files: Vec<PathBuf> = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let documents = files
        .par_iter()
        .filter_map(|path| {
            let filename = to_uri_path(path.strip_prefix(base_dir).unwrap_or(path));
            let (_, transformer) = compiled.iter().find(|(regex, _)| regex.is_match(&filename))?;
            Some((path, filename, transformer))
        })
        .map(|(path, filename, transformer)| {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read source file: {}", path.display()))?;
            let document = transformer.transform(&filename, &content)?;
            debug!("Transformed {}", filename);
            Ok((source_key(base_dir, path), document))
        })
        .collect::<Result<Vec<_>>>()?;

    // 同名不同扩展名的文件键相同，按文件名顺序保留第一个
    let mut data = MarkdownSourceData::new();
    for (key, document) in documents {
        if let Some(existing) = data.get(&key) {
            warn!(
                "Source key `{}` is taken by {}, skipping {}",
                key,
                existing.filename().unwrap_or_default(),
                document.filename().unwrap_or_default()
            );
            continue;
        }
        data.insert(key, document);
    }

    info!("Loaded {} source documents from {}", data.len(), source_dir.display());
    Ok(data)
}

// 工具函数：将Pod值转换为JSON
fn pod_to_json(pod: Pod) -> Value {
    match pod {
        Pod::String(s) => Value::String(s),
        Pod::Integer(i) => Value::Number(Number::from(i)),
        Pod::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Pod::Boolean(b) => Value::Bool(b),
        Pod::Array(arr) => Value::Array(arr.into_iter().map(pod_to_json).collect()),
        Pod::Hash(map) => Value::Object(map.into_iter().map(|(k, v)| (k, pod_to_json(v))).collect()),
        Pod::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_markdown_transformer() -> Result<()> {
        let doc = MarkdownTransformer.transform(
            "posts/hello.md",
            "---\ntitle: Hello\ntags:\n  - a\n  - b\n---\n# Hi\n",
        )?;
        assert_eq!(doc.meta["title"], json!("Hello"));
        assert_eq!(doc.meta["tags"], json!(["a", "b"]));
        assert_eq!(doc.filename(), Some("posts/hello.md"));
        assert!(doc.content.as_str().unwrap_or_default().contains("<h1>Hi</h1>"));
        Ok(())
    }

    #[test]
    fn test_generate_scans_source_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(posts.join("nested"))?;
        fs::write(posts.join("a.md"), "---\ntitle: A\n---\nA body")?;
        fs::write(posts.join("nested/b.md"), "B body")?;
        fs::write(posts.join("ignored.txt"), "nope")?;

        let data = generate(dir.path(), &posts, &[TransformerRule::markdown()])?;
        let keys: Vec<_> = data.keys().cloned().collect();
        assert_eq!(keys, vec!["posts/a", "posts/nested/b"]);
        assert_eq!(data["posts/nested/b"].filename(), Some("posts/nested/b.md"));
        Ok(())
    }

    #[test]
    fn test_command_transformer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(&posts)?;
        fs::write(posts.join("page.txt"), "plain")?;

        let rules = vec![
            TransformerRule {
                test: r"\.txt$".to_string(),
                handler: r#"printf '{"meta":{"kind":"text"},"content":"%s"}' "$(cat)""#.to_string(),
            },
            TransformerRule::markdown(),
        ];
        let data = generate(dir.path(), &posts, &rules)?;
        let doc = &data["posts/page"];
        assert_eq!(doc.meta["kind"], json!("text"));
        assert_eq!(doc.content, json!("plain"));
        assert_eq!(doc.filename(), Some("posts/page.txt"));
        Ok(())
    }

    #[test]
    fn test_command_transformer_streams_large_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(&posts)?;
        let line = format!("{}\n", "x".repeat(99));
        fs::write(posts.join("big.txt"), line.repeat(4000))?;

        let rules = vec![TransformerRule {
            test: r"\.txt$".to_string(),
            handler: r#"printf '{"meta":{},"content":"'; tr -d '\n'; printf '"}'"#.to_string(),
        }];
        let (tx, rx) = std::sync::mpsc::channel();
        let base_dir = dir.path().to_path_buf();
        thread::spawn(move || {
            let _ = tx.send(generate(&base_dir, &posts, &rules));
        });

        let data = rx.recv_timeout(std::time::Duration::from_secs(30))??;
        let content = data["posts/big"].content.as_str().unwrap_or_default();
        assert_eq!(content.len(), 99 * 4000);
        Ok(())
    }

    #[test]
    fn test_duplicate_keys_keep_first_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(&posts)?;
        fs::write(posts.join("a.md"), "# From markdown")?;
        fs::write(posts.join("a.txt"), "from text")?;

        let rules = vec![
            TransformerRule {
                test: r"\.txt$".to_string(),
                handler: r#"printf '{"meta":{},"content":"text"}'"#.to_string(),
            },
            TransformerRule::markdown(),
        ];
        let data = generate(dir.path(), &posts, &rules)?;
        assert_eq!(data.len(), 1);
        assert_eq!(data["posts/a"].filename(), Some("posts/a.md"));
        Ok(())
    }

    #[test]
    fn test_missing_source_dir_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data = generate(dir.path(), &dir.path().join("nope"), &[TransformerRule::markdown()])?;
        assert!(data.is_empty());
        Ok(())
    }
}
