use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::{BuildRequest, Engine};
use crate::models::config::SiteOverrides;
use crate::models::types::BuildReport;
use crate::theme::TemplatePaths;

/// 生成文件所在目录（相对站点目录）
const WORK_DIR: &str = ".bisheng";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 指定站点目录
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// 配置文件，默认在站点目录中查找 bisheng.config.{yml,yaml,toml}
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 启动开发服务器
    Dev(DevArgs),

    /// 生成静态文件
    Build(BuildArgs),

    /// 清理生成的文件
    Clean,
}

#[derive(Args)]
pub struct DevArgs {
    /// 服务器端口，覆盖配置文件
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct BuildArgs {
    /// 服务端渲染每个页面
    #[arg(long)]
    pub ssr: bool,
}

fn load_overrides(base_dir: &Path, config: Option<&Path>) -> Result<SiteOverrides> {
    match config {
        Some(path) => SiteOverrides::load(&base_dir.join(path)),
        None => SiteOverrides::discover(base_dir),
    }
}

fn print_report(report: &BuildReport) {
    let mode = if report.ssr { "SSR" } else { "static" };
    println!(
        "{} {} files ({})",
        "Build finished:".bright_green(),
        report.files.len(),
        mode
    );
}

/// 执行命令
pub async fn execute(cli: Cli) -> Result<()> {
    let base_dir = cli
        .path
        .canonicalize()
        .with_context(|| format!("Site directory not found: {}", cli.path.display()))?;
    let mut overrides = load_overrides(&base_dir, cli.config.as_deref())?;
    let templates_dir = base_dir.join(WORK_DIR).join("templates");
    let engine = Engine::new(base_dir);

    match cli.command {
        Commands::Dev(args) => {
            if let Some(port) = args.port {
                overrides.port = Some(port);
            }
            let templates = TemplatePaths::materialize(&templates_dir)?;
            engine.dev(BuildRequest::new(templates, overrides)).await?;
        }
        Commands::Build(args) => {
            let templates = TemplatePaths::materialize(&templates_dir)?;
            let request = BuildRequest::new(templates, overrides).with_ssr(args.ssr);
            engine.build_with(request, print_report).await?;
        }
        Commands::Clean => {
            engine.clean(overrides, &TemplatePaths::new(&templates_dir).tmp_dir())?;
            info!("Cleaned generated files");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_ssr() {
        let cli = Cli::parse_from(["rust-bisheng", "--path", "site", "build", "--ssr"]);
        assert_eq!(cli.path, PathBuf::from("site"));
        assert!(matches!(cli.command, Commands::Build(BuildArgs { ssr: true })));
    }

    #[test]
    fn test_parse_dev_port() {
        let cli = Cli::parse_from(["rust-bisheng", "dev", "--port", "9000"]);
        assert!(matches!(cli.command, Commands::Dev(DevArgs { port: Some(9000) })));
    }

    #[test]
    fn test_clean_removes_generated_dirs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("_site");
        let tmp = dir.path().join(WORK_DIR).join("tmp");
        std::fs::create_dir_all(&output)?;
        std::fs::create_dir_all(&tmp)?;

        let tmp_dir = TemplatePaths::new(&dir.path().join(WORK_DIR).join("templates")).tmp_dir();
        Engine::new(dir.path().to_path_buf()).clean(SiteOverrides::default(), &tmp_dir)?;
        assert!(!output.exists());
        assert!(!tmp.exists());
        Ok(())
    }
}
