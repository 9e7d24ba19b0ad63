//! Audit trail of copy requests.
//!
//! One `AuditRecord` is written per copy request, after the pipeline has
//! finished, whatever the outcome.

use crate::copy::{CopyOptions, CopyRequest};
use chrono::{DateTime, Utc};
use geosync_remote::{LogCollector, OperationRecord};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub status_code: u16,
    pub dataset_uuid: String,
    pub src_name: String,
    pub dst_name: String,
    pub src_title: String,
    pub dst_title: String,
    pub copy_meta: bool,
    pub copy_layers: bool,
    pub copy_styles: bool,
    #[serde(default)]
    pub details: Vec<OperationRecord>,
}

impl AuditRecord {
    /// Snapshot a finished request. Titles come from the log properties.
    pub fn from_log(
        log: &LogCollector,
        request: &CopyRequest,
        options: CopyOptions,
        (first_name, last_name): (&str, &str),
        status_code: u16,
    ) -> Self {
        Self {
            start_time: log.start_time(),
            end_time: Utc::now(),
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            status_code,
            dataset_uuid: request.uuid.clone(),
            src_name: request.src_name.clone(),
            dst_name: request.dst_name.clone(),
            src_title: log.property_str("src_title"),
            dst_title: log.property_str("dst_title"),
            copy_meta: options.include_meta,
            copy_layers: options.include_layers,
            copy_styles: options.include_styles,
            details: log.records(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status_code == 200
    }

    /// One line for humans.
    pub fn summary_line(&self) -> String {
        let parts: Vec<&str> = [
            (self.copy_meta, "metadata"),
            (self.copy_layers, "layers"),
            (self.copy_styles, "styles"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        format!(
            "[{}]: <{}> {} {} copy {} - \"{}\" to {} - \"{}\" ({})",
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            if self.succeeded() { "success" } else { "failure" },
            self.first_name,
            self.last_name,
            self.src_name,
            self.src_title,
            self.dst_name,
            self.dst_title,
            parts.join(", ")
        )
    }

    #[must_use]
    pub fn without_details(mut self) -> Self {
        self.details.clear();
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> std::io::Result<()>;

    /// Newest first, skipping `offset` records.
    fn recent(&self, size: usize, offset: usize) -> std::io::Result<Vec<AuditRecord>>;
}

/// Appends one JSON document per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: &AuditRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        tracing::debug!("audit record for {} written to {}", record.dataset_uuid, self.path.display());
        Ok(())
    }

    fn recent(&self, size: usize, offset: usize) -> std::io::Result<Vec<AuditRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping audit line {} of {}: {e}", n + 1, self.path.display()),
            }
        }
        Ok(records.into_iter().rev().skip(offset).take(size).collect())
    }
}
