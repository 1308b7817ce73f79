use std::path::PathBuf;
use thiserror::Error;

/// 构建错误类型，任何一种都会终止本次调用
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("服务端渲染失败: {path} - {message}")]
    Render {
        path: String,
        message: String,
    },

    #[error("模板渲染失败: {path}: {message}")]
    Template {
        path: PathBuf,
        message: String,
    },
}

/// 打包错误
#[derive(Error, Debug)]
pub enum BundleError {
    /// 打包器本身无法运行，例如命令不存在
    #[error("打包器错误: {message}")]
    Fatal {
        message: String,
    },

    /// 打包器报告的编译诊断
    #[error("编译失败:\n{diagnostics}")]
    Compilation {
        diagnostics: String,
    },

    /// 客户端打包成功后服务端打包不应失败
    #[error("服务端打包失败: {message}")]
    SsrPass {
        message: String,
    },
}
