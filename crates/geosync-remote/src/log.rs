//! Per-request operation log.
//!
//! Every copy request owns one `LogCollector`; the catalog and map-service
//! decorators, the resolver and the replicators all write into the same
//! instance. Nothing is process-global: two concurrent requests hold two
//! collectors and can never see each other's records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Which part of the copy a record belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    General,
    Meta,
    Style,
    Layer,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::General => "General",
            Self::Meta => "Meta",
            Self::Style => "Style",
            Self::Layer => "Layer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Metadata catalog API.
    GnApi,
    /// Map-service REST API.
    GsApi,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GnApi => "gn_api",
            Self::GsApi => "gs_api",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    #[serde(rename = "type")]
    pub service: ServiceKind,
    pub method: String,
    /// `0` when no response was received.
    pub status_code: u16,
    pub url: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoRecord {
    pub message: String,
    pub detail: Value,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum OperationRecord {
    Api(ApiRecord),
    Info(InfoRecord),
    Success(InfoRecord),
}

impl OperationRecord {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Api(r) => r.data_type,
            Self::Info(r) | Self::Success(r) => r.data_type,
        }
    }

    /// One human-readable line.
    pub fn format_line(&self) -> String {
        match self {
            Self::Api(r) => format!(
                "[{}] {} {} {} {}",
                r.data_type, r.service, r.method, r.status_code, r.url
            ),
            Self::Info(r) => match &r.detail {
                Value::Null => format!("[{}] {}", r.data_type, r.message),
                Value::Object(map) if map.is_empty() => format!("[{}] {}", r.data_type, r.message),
                detail => format!("[{}] {} {detail}", r.data_type, r.message),
            },
            Self::Success(r) => format!("[{}] OK: {}", r.data_type, r.message),
        }
    }
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_line())
    }
}

#[derive(Debug)]
struct LogState {
    records: Vec<OperationRecord>,
    properties: BTreeMap<String, Value>,
    context: DataType,
    start_time: DateTime<Utc>,
}

impl LogState {
    fn fresh() -> Self {
        let start_time = Utc::now();
        let mut properties = BTreeMap::new();
        properties.insert("start_time".to_owned(), Value::String(start_time.to_rfc3339()));
        Self {
            records: Vec::new(),
            properties,
            context: DataType::General,
            start_time,
        }
    }
}

#[derive(Debug)]
pub struct LogCollector {
    request_id: Uuid,
    state: Mutex<LogState>,
}

/// Restores the previous data type when dropped.
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    collector: &'a LogCollector,
    previous: DataType,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.collector.state().context = self.previous;
    }
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCollector {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            state: Mutex::new(LogState::fresh()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Drop all records and properties and restart the clock.
    pub fn reset(&self) {
        *self.state() = LogState::fresh();
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.state().start_time
    }

    pub fn context(&self) -> DataType {
        self.state().context
    }

    /// Tag records with `data_type` until the guard is dropped.
    pub fn enter(&self, data_type: DataType) -> ContextGuard<'_> {
        let mut state = self.state();
        let previous = state.context;
        state.context = data_type;
        ContextGuard {
            collector: self,
            previous,
        }
    }

    pub fn record_api_call(&self, service: ServiceKind, method: &str, status_code: u16, url: &str) {
        let mut state = self.state();
        let record = OperationRecord::Api(ApiRecord {
            service,
            method: method.to_owned(),
            status_code,
            url: url.to_owned(),
            data_type: state.context,
        });
        tracing::debug!(request = %self.request_id, "{record}");
        state.records.push(record);
    }

    pub fn record_info(&self, message: impl Into<String>, detail: Value) {
        self.push_info(message.into(), detail, false);
    }

    pub fn record_success(&self, message: impl Into<String>, detail: Value) {
        self.push_info(message.into(), detail, true);
    }

    fn push_info(&self, message: String, detail: Value, success: bool) {
        let mut state = self.state();
        let info = InfoRecord {
            message,
            detail,
            data_type: state.context,
        };
        let record = if success {
            OperationRecord::Success(info)
        } else {
            OperationRecord::Info(info)
        };
        tracing::debug!(request = %self.request_id, "{record}");
        state.records.push(record);
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.state().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn formatted(&self) -> Vec<String> {
        self.state()
            .records
            .iter()
            .map(OperationRecord::format_line)
            .collect()
    }

    pub fn set_property(&self, key: &str, value: impl Into<Value>) {
        self.state().properties.insert(key.to_owned(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.state().properties.get(key).cloned()
    }

    /// Property as a string, empty when unset or not a string.
    pub fn property_str(&self, key: &str) -> String {
        self.property(key)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.state().properties.clone()
    }
}
