pub mod config;
pub mod error;
pub mod metric;
pub mod time;

pub use config::{NamespaceConfig, StoreKind};
pub use error::ConfigError;
pub use metric::Metric;
