pub mod bundle_config;
pub mod bundler;
pub mod context;
pub mod data_loader;
pub mod engine;
pub mod error;
pub mod route_mapper;
pub mod server;
pub mod source_data;
pub mod ssr;

pub use bundler::{BundleStats, Bundler, CommandBundler, WatchHandle};
pub use context::BuildContext;
pub use data_loader::DataLoader;
pub use engine::{BuildRequest, Engine};
pub use error::{BuildError, BundleError};
pub use server::Server;
pub use ssr::{NodeSsrLoader, SsrLoader, SsrRenderer};
