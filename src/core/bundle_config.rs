use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::core::context::BuildContext;
use crate::core::error::BuildError;
use crate::models::bundler::{
    BundleMode, BundlerApi, BundlerConfig, LoaderSpec, ModuleRule, OutputConfig, PluginSpec, ResolveConfig,
};
use crate::models::config::SiteConfig;
use crate::utils::escape_win_path;

/// 处理虚拟数据模块的 loader
pub const DATA_LOADER: &str = "bisheng-data-loader";
/// 开发模式下把样式注入页面
pub const STYLE_LOADER: &str = "style-loader";
/// 构建模式下把样式抽取为文件
pub const EXTRACT_LOADER: &str = "mini-css-extract-plugin/loader";
pub const EXTRACT_PLUGIN: &str = "MiniCssExtractPlugin";

/// 某一类样式文件对应的 loader 链
#[derive(Debug, Clone, PartialEq)]
pub struct StyleLoaderConfig {
    pub test: String,
    pub loaders: Vec<LoaderSpec>,
}

/// 样式文件的 loader 链，不含最前面的注入/抽取 loader
pub fn style_loaders_config(site: &SiteConfig) -> Vec<StyleLoaderConfig> {
    let css_loader = LoaderSpec::with_options("css-loader", json!({ "sourceMap": true }));
    let postcss_loader = LoaderSpec::with_options(
        "postcss-loader",
        json!({ "postcssOptions": { "plugins": site.postcss_config.plugins } }),
    );
    let less_loader = LoaderSpec::with_options("less-loader", json!({ "lessOptions": { "javascriptEnabled": true } }));

    vec![
        StyleLoaderConfig {
            test: r"\.css$".to_string(),
            loaders: vec![css_loader.clone(), postcss_loader.clone()],
        },
        StyleLoaderConfig {
            test: r"\.less$".to_string(),
            loaders: vec![css_loader, postcss_loader, less_loader],
        },
    ]
}

/// 打包器的公共配置
pub fn common_config(context: &BuildContext) -> BundlerConfig {
    let base_node_modules = escape_win_path(context.base_dir().join("node_modules"));
    BundlerConfig {
        mode: String::new(),
        entry: Default::default(),
        output: OutputConfig {
            path: escape_win_path(&context.tmp_dir),
            public_path: "/".to_string(),
            filename: "[name].js".to_string(),
            chunk_filename: "[id].[chunkhash:8].js".to_string(),
            library: None,
            library_target: None,
        },
        target: "web".to_string(),
        module: Default::default(),
        plugins: Vec::new(),
        resolve: ResolveConfig {
            modules: vec!["node_modules".to_string(), base_node_modules],
            extensions: vec![".js".to_string(), ".jsx".to_string(), ".json".to_string()],
        },
        dev_server: None,
    }
}

/// 在公共配置上生成 dev / build 模式的打包配置
///
/// 步骤顺序固定，后面的步骤可以覆盖前面的结果。用户钩子不得自行设置入口。
pub fn build(mut config: BundlerConfig, mode: BundleMode, context: &BuildContext) -> Result<BundlerConfig> {
    let site = &context.site;

    config.entry.clear();
    config.mode = mode.as_str().to_string();
    match mode {
        BundleMode::Build => {
            config.output.path = escape_win_path(context.output_dir());
            config.output.public_path = site.root.clone();
        }
        BundleMode::Dev => config.output.public_path = "/".to_string(),
    }

    let front_loader = match mode {
        BundleMode::Dev => STYLE_LOADER,
        BundleMode::Build => EXTRACT_LOADER,
    };
    for style in style_loaders_config(site) {
        let mut loaders = vec![LoaderSpec::new(front_loader)];
        loaders.extend(style.loaders);
        config.module.rules.push(ModuleRule {
            test: Some(style.test),
            loaders,
            ..Default::default()
        });
    }
    if mode == BundleMode::Build && !config.has_plugin(EXTRACT_PLUGIN) {
        config.plugins.push(PluginSpec {
            name: EXTRACT_PLUGIN.to_string(),
            options: json!({ "filename": "[name].css" }),
        });
    }

    config.module.rules.push(ModuleRule {
        include: context.placeholder_paths().iter().map(escape_win_path).collect(),
        loaders: vec![LoaderSpec::new(DATA_LOADER)],
        ..Default::default()
    });

    let api = BundlerApi::new(mode);
    let mut customized = site.bundler_config.call(config, &api)?;

    if customized.entry.contains_key(&site.entry_name) {
        return Err(anyhow!(BuildError::Config(format!(
            "Should not set `bundlerConfig.entry.{}`!",
            site.entry_name
        ))));
    }
    customized
        .entry
        .insert(site.entry_name.clone(), escape_win_path(context.entry_path()));

    debug!("Bundler config ({}): {} rules, {} plugins", mode.as_str(), customized.module.rules.len(), customized.plugins.len());
    Ok(customized)
}

/// 生产构建附加的压缩与环境变量替换
pub fn add_production_plugins(config: &mut BundlerConfig, node_env: Option<String>) {
    config.plugins.push(PluginSpec {
        name: "LoaderOptionsPlugin".to_string(),
        options: json!({ "minimize": true }),
    });
    let node_env = node_env.unwrap_or_else(|| "production".to_string());
    config.plugins.push(PluginSpec {
        name: "DefinePlugin".to_string(),
        options: json!({ "process.env.NODE_ENV": Value::String(node_env).to_string() }),
    });
}

/// 开发模式启用热更新
pub fn enable_hot_reload(config: &mut BundlerConfig) {
    config.plugins.push(PluginSpec {
        name: "HotModuleReplacementPlugin".to_string(),
        options: json!({}),
    });
}

/// 由生产配置派生服务端渲染配置
pub fn ssr_config(config: &BundlerConfig, context: &BuildContext) -> BundlerConfig {
    let mut ssr = config.clone();
    ssr.entry.clear();
    ssr.entry.insert(
        format!("{}-ssr", context.site.entry_name),
        escape_win_path(context.ssr_path()),
    );
    ssr.target = "node".to_string();
    ssr.output.path = escape_win_path(&context.tmp_dir);
    ssr.output.library = Some("ssr".to_string());
    ssr.output.library_target = Some("commonjs".to_string());
    ssr
}
