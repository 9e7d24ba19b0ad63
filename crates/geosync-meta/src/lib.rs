//! Metadata document model for geosync.
//!
//! This crate parses catalog record packages (a zip archive holding an
//! `index.csv` sidecar and the ISO metadata document), extracts the OGC
//! service links a record publishes, derives the map-service layer keys those
//! links point at, rewrites linkage URLs, and applies ordered transform chains
//! before the record is repackaged for upload.

pub mod document;
pub mod package;
pub mod transform;
pub mod types;
pub mod xml;
pub mod xslt;

pub use document::{LinkSummary, MetaDocument, RewriteReport, TransformReport, UrlMapping};
pub use package::{PackageIndex, RecordPackage};
pub use transform::{ElementPath, Rule, RuleTransform, Transform};
pub use types::{GsLayer, LinkedLayer, Schema};
pub use xml::{Element, Node, XmlDocument};
pub use xslt::XsltTransform;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("record package error: {0}")]
    Package(#[from] zip::result::ZipError),
    #[error("malformed XML document: {0}")]
    Xml(String),
    #[error("malformed record: {0}")]
    Format(String),
    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
