pub mod cli;
pub mod core;
pub mod models;
pub mod theme;
pub mod utils;

// Re-export commonly used types and traits
pub use crate::core::{BuildError, BuildRequest, BundleError, Bundler, Engine, SsrLoader, SsrRenderer};
pub use crate::models::{BuildReport, Route, SiteConfig, SiteOverrides, ThemeConfig};
