pub mod config;

pub use config::{ConformanceConfig, FallbackStatuses, TOKEN_ENV};
