use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::core::data_loader::DataLoader;
use crate::core::error::BundleError;
use crate::models::bundler::BundlerConfig;
use crate::theme::renderer::write_file;
use crate::utils::escape_win_path;

/// 默认打包命令，`{config}` 替换为写出的配置文件
pub const DEFAULT_BUNDLER_COMMAND: &str = "npx bisheng-bundler {config}";

/// 一次打包的诊断结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleStats {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BundleStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 只包含错误的诊断输出
    pub fn errors_only(&self) -> String {
        self.errors.join("\n")
    }
}

/// 监视模式下运行中的打包器，drop 时结束进程
pub struct WatchHandle {
    child: Option<Child>,
}

impl WatchHandle {
    pub fn detached() -> Self {
        Self { child: None }
    }

    pub async fn stop(mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await?;
        }
        Ok(())
    }
}

/// 外部打包器
///
/// `run` 返回 `Err` 表示打包器本身出错；编译诊断放在 `BundleStats` 中。
/// 实现在解析占位模块前必须等待 `DataLoader` 放行。
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn run(&self, name: &str, config: &BundlerConfig, loader: &DataLoader) -> Result<BundleStats>;

    async fn watch(&self, name: &str, config: &BundlerConfig, loader: &DataLoader) -> Result<WatchHandle>;
}

/// 通过 shell 命令调用的打包器
///
/// 配置写入 `tmp/bundler.<name>.json`；占位模块的源码以一行 JSON 经 stdin 传入，
/// 监视模式下每次数据更新再写一行。
pub struct CommandBundler {
    command: String,
    base_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl CommandBundler {
    pub fn new(command: Option<String>, base_dir: &Path, tmp_dir: &Path) -> Self {
        Self {
            command: command.unwrap_or_else(|| DEFAULT_BUNDLER_COMMAND.to_string()),
            base_dir: base_dir.to_path_buf(),
            tmp_dir: tmp_dir.to_path_buf(),
        }
    }

    fn write_config(&self, name: &str, config: &BundlerConfig) -> Result<PathBuf> {
        let path = self.tmp_dir.join(format!("bundler.{}.json", name));
        write_file(&path, &serde_json::to_string_pretty(config)?)?;
        Ok(path)
    }

    fn command(&self, config_path: &Path, watch: bool) -> Command {
        let config_path = escape_win_path(config_path);
        let command = self.command.replace("{config}", &config_path);
        debug!("{}", command);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &command]);
        cmd.current_dir(&self.base_dir);
        cmd.env("BISHENG_CONFIG", &config_path);
        if watch {
            cmd.env("BISHENG_WATCH", "1");
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// 占位模块源码，一行 JSON
async fn placeholder_payload(loader: &DataLoader) -> Result<String> {
    let mut modules = Map::new();
    for path in loader.placeholders().iter() {
        let module = loader.load(path).await?;
        modules.insert(escape_win_path(path), Value::String(module));
    }
    let mut payload = Map::new();
    payload.insert("placeholders".to_string(), Value::Object(modules));
    Ok(format!("{}\n", Value::Object(payload)))
}

/// 把命令输出拆成诊断
fn diagnostics(stderr: &str, stdout: &str) -> Vec<String> {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<String> = source
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if lines.is_empty() {
        vec!["bundler exited with a failure status".to_string()]
    } else {
        lines
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn run(&self, name: &str, config: &BundlerConfig, loader: &DataLoader) -> Result<BundleStats> {
        let config_path = self.write_config(name, config)?;
        info!("Bundling {} ...", name);

        let mut child = self.command(&config_path, false).spawn().map_err(|e| {
            anyhow!(BundleError::Fatal {
                message: format!("failed to start `{}`: {}", self.command, e),
            })
        })?;

        let payload = placeholder_payload(loader).await?;
        let stdin = child.stdin.take();
        // 写 stdin 的同时读取输出，打包器可能先输出再读 stdin
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // 打包器可能不读 stdin
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!("bundler stdin closed early: {}", e);
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| {
            anyhow!(BundleError::Fatal {
                message: format!("failed to wait for bundler: {}", e),
            })
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // sh: command not found
        if output.status.code() == Some(127) {
            return Err(anyhow!(BundleError::Fatal {
                message: format!("`{}` not found: {}", self.command, stderr.trim()),
            }));
        }

        if output.status.success() {
            let warnings = stderr.lines().filter(|l| !l.trim().is_empty()).map(String::from).collect();
            Ok(BundleStats {
                errors: Vec::new(),
                warnings,
            })
        } else {
            Ok(BundleStats {
                errors: diagnostics(&stderr, &stdout),
                warnings: Vec::new(),
            })
        }
    }

    async fn watch(&self, name: &str, config: &BundlerConfig, loader: &DataLoader) -> Result<WatchHandle> {
        let config_path = self.write_config(name, config)?;
        info!("Starting bundler in watch mode ...");

        let mut child = self
            .command(&config_path, true)
            .spawn()
            .with_context(|| format!("failed to start `{}`", self.command))?;

        pipe_output(&mut child);

        if let Some(mut stdin) = child.stdin.take() {
            let loader = loader.clone();
            let mut rx = loader.subscribe();
            tokio::spawn(async move {
                loop {
                    let ready = rx.borrow_and_update().is_some();
                    if ready {
                        match placeholder_payload(&loader).await {
                            Ok(payload) => {
                                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                                    warn!("bundler stopped reading source data: {}", e);
                                    break;
                                }
                            }
                            Err(e) => error!("failed to prepare source data: {}", e),
                        }
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(WatchHandle { child: Some(child) })
    }
}

/// 把子进程的输出转到日志
fn pipe_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "bundler", "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "bundler", "{}", line);
            }
        });
    }
}
