//! Remote collaborators of the geosync copy pipeline.
//!
//! This crate provides the YAML configuration and the access resolver that
//! maps logical instance names to URLs and credentials, blocking HTTP clients
//! for the metadata catalog and the map-service REST API, logging decorators
//! around both, and the per-request operation log they write into.

pub mod catalog;
pub mod config;
pub mod http;
pub mod log;
pub mod logged;

pub use catalog::{Catalog, HttpCatalog, UploadResult};
pub use config::{
    AccessInfo, AccessResolver, AppConfig, Credentials, DestinationEntry, RegisteredTransform,
    SourceEntry, TransformRegistry,
};
pub use http::{HttpClient, HttpMapService, HttpResponse, MapService, Method};
pub use log::{
    ApiRecord, ContextGuard, DataType, InfoRecord, LogCollector, OperationRecord, ServiceKind,
};
pub use logged::{LoggedCatalog, LoggedMapService};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "GEOSYNC_CONFIG";

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error in [{method}] {url}: status {status}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },
    #[error("transport error in [{method}] {url}: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },
    #[error("invalid credentials on {server}")]
    Auth { server: String, user: Option<String> },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Upstream status code, when the failure came from an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
