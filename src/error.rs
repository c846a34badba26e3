use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error("Malformed capability statement: {message}")]
    MalformedCapability { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Transport error: request timed out after {}", format_timeout(.timeout))]
    Timeout { timeout: Duration },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[cfg(feature = "http-transport")]
    #[error("Transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ConformanceError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedCapability {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from the network layer rather than from local input.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            #[cfg(feature = "http-transport")]
            Self::Http(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConformanceError>;

/// Whole seconds print as `30s`; anything finer keeps millisecond precision.
fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}
