//! Copy orchestration for geosync.
//!
//! This crate ties the metadata model and the remote clients together into
//! the `CopyManager`: it fetches a catalog record, walks the map-service
//! resource graph its links point at, checks destination prerequisites,
//! replicates styles and then layers, transforms and uploads the record, and
//! validates every step against the copy lifecycle state machine.

pub mod audit;
pub mod copy;
pub mod lifecycle;
pub mod mock;
pub mod prereq;
pub mod replicate;
pub mod resources;
pub mod scope;

pub use audit::{AuditRecord, AuditSink, JsonlAuditSink};
pub use copy::{
    render_log, CopyEnv, CopyManager, CopyOptions, CopyPreview, CopyRequest, OutputFormat,
    PreviewCatalog, PreviewMapService, PreviewMetadata,
};
pub use lifecycle::{validate_transition, CopyState};
pub use prereq::PrerequisiteValidator;
pub use replicate::{LayerAction, LayerReplicator, StyleAction, StyleReplicator};
pub use resources::{
    LayerDescription, LayerResourceResolver, LayerSurvey, ResourceSet, StoreRef, StyleRef,
    WorkspaceRef,
};
pub use scope::{HttpServiceProvider, RequestScope, ServiceProvider};

use geosync_meta::MetaError;
use geosync_remote::{OperationRecord, RemoteError};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Which side of the copy an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Destination => "destination",
        })
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("invalid credentials on {server}")]
    Auth {
        server: String,
        user: Option<String>,
        operations: Vec<OperationRecord>,
    },
    #[error("{message}")]
    Param {
        context: Side,
        key: String,
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("{key}: {message}")]
    Url {
        context: Side,
        key: String,
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("HTTP error in [{method}] {url}: status {status}")]
    Remote {
        method: String,
        url: String,
        status: u16,
        body: String,
        operations: Vec<OperationRecord>,
    },
    #[error("transport error in [{method}] {url}: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("invalid record: {message}")]
    Format {
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("unexpected response: {message}")]
    Protocol {
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("configuration error: {message}")]
    Config {
        message: String,
        operations: Vec<OperationRecord>,
    },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl CopyError {
    pub(crate) fn param(context: Side, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Param {
            context,
            key: key.into(),
            message: message.into(),
            operations: Vec::new(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            operations: Vec::new(),
        }
    }

    /// An unknown logical instance name.
    pub(crate) fn unknown_instance(context: Side, key: &str, is_catalog: bool) -> Self {
        let service = if is_catalog { "geonetwork" } else { "geoserver" };
        Self::Url {
            context,
            key: key.to_owned(),
            message: format!("{service} not found in config"),
            operations: Vec::new(),
        }
    }

    /// Attach the operation log accumulated so far.
    #[must_use]
    pub fn with_operations(mut self, records: Vec<OperationRecord>) -> Self {
        match &mut self {
            Self::Auth { operations, .. }
            | Self::Param { operations, .. }
            | Self::Url { operations, .. }
            | Self::Remote { operations, .. }
            | Self::Transport { operations, .. }
            | Self::Format { operations, .. }
            | Self::Protocol { operations, .. }
            | Self::Config { operations, .. } => *operations = records,
            Self::InvalidTransition { .. } => {}
        }
        self
    }

    pub fn operations(&self) -> &[OperationRecord] {
        match self {
            Self::Auth { operations, .. }
            | Self::Param { operations, .. }
            | Self::Url { operations, .. }
            | Self::Remote { operations, .. }
            | Self::Transport { operations, .. }
            | Self::Format { operations, .. }
            | Self::Protocol { operations, .. }
            | Self::Config { operations, .. } => operations,
            Self::InvalidTransition { .. } => &[],
        }
    }

    /// Status class of the failure. 404 is reserved for unknown instance
    /// names; the server layer maps it to 400 on the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth { .. } => 401,
            Self::Param { .. } => 400,
            Self::Url { .. } => 404,
            Self::Remote { .. } | Self::Format { .. } | Self::Protocol { .. } => 502,
            Self::Transport { .. } => 504,
            Self::Config { .. } | Self::InvalidTransition { .. } => 500,
        }
    }

    /// Structured context for error payloads.
    pub fn info(&self) -> Value {
        match self {
            Self::Auth { server, user, .. } => json!({"server": server, "user": user}),
            Self::Param { context, key, .. } | Self::Url { context, key, .. } => {
                json!({"context": context, "key": key})
            }
            Self::Remote {
                method,
                url,
                status,
                body,
                ..
            } => json!({"method": method, "url": url, "status": status, "body": body}),
            Self::Transport { method, url, .. } => json!({"method": method, "url": url}),
            Self::InvalidTransition { from, to } => json!({"from": from, "to": to}),
            Self::Format { .. } | Self::Protocol { .. } | Self::Config { .. } => json!({}),
        }
    }
}

impl From<RemoteError> for CopyError {
    fn from(err: RemoteError) -> Self {
        let operations = Vec::new();
        match err {
            RemoteError::Status {
                method,
                url,
                status,
                body,
            } => Self::Remote {
                method,
                url,
                status,
                body,
                operations,
            },
            RemoteError::Transport {
                method,
                url,
                message,
            } => Self::Transport {
                method,
                url,
                message,
                operations,
            },
            RemoteError::Auth { server, user } => Self::Auth {
                server,
                user,
                operations,
            },
            RemoteError::Serialization(message) => Self::Protocol {
                message,
                operations,
            },
            RemoteError::NotFound(message) | RemoteError::Config(message) => Self::Config {
                message,
                operations,
            },
            RemoteError::Io(e) => Self::Config {
                message: e.to_string(),
                operations,
            },
        }
    }
}

impl From<MetaError> for CopyError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::Transform { .. } | MetaError::Io(_) => Self::Config {
                message: err.to_string(),
                operations: Vec::new(),
            },
            MetaError::Package(_) | MetaError::Xml(_) | MetaError::Format(_) => Self::Format {
                message: err.to_string(),
                operations: Vec::new(),
            },
        }
    }
}
