pub mod bundler;
pub mod config;
pub mod types;

pub use bundler::{BundleMode, BundlerApi, BundlerConfig};
pub use config::{
    merge, resolve_theme_paths, BundlerConfigHook, FilePathMapper, MappedPaths, SiteConfig, SiteOverrides,
    ThemeConfig, TransformerRule, TransformerRuleSpec,
};
pub use types::{BuildReport, MarkdownSourceData, OutputFileSet, Route, RouteTree, SourceDocument};
