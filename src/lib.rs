pub mod anomaly;
pub mod cli;
pub mod config;
pub mod error;
pub mod geoip;
pub mod inspector;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod proxy;
pub mod server;
pub mod storage;
pub mod waf;

pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
