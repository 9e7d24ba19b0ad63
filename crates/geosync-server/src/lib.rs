//! HTTP boundary for geosync.
//!
//! A thin routing layer over `geosync-core`: every route is answered by the
//! pure [`route`] function from an [`ApiRequest`], which keeps the routing
//! testable without a socket. [`run_server`] feeds it from a blocking
//! `tiny_http` loop, one thread per request.
//!
//! Application errors are returned as `{summary, info, operations}` with the
//! status class of the error; 404 is reserved for unknown routes and is
//! rewritten to 400 for application errors so gateways that intercept 404
//! pages do not swallow the payload.
//!
//! The [`TestServer`] helper starts a server on a random port for integration
//! testing.

use geosync_core::{
    render_log, AuditRecord, AuditSink, CopyEnv, CopyError, CopyManager, CopyOptions,
    CopyRequest, JsonlAuditSink, OutputFormat, RequestScope, Side,
};
use geosync_remote::{AppConfig, LogCollector, OperationRecord};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

const DEFAULT_LOG_PAGE: usize = 20;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a request handler needs.
pub struct AppState {
    config: Arc<AppConfig>,
    env: Arc<CopyEnv>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, env: Arc<CopyEnv>, audit: Option<Arc<dyn AuditSink>>) -> Self {
        Self { config, env, audit }
    }

    /// HTTP clients, plus a JSON-lines audit sink when `audit.path` is set.
    pub fn from_config(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let audit = config
            .audit
            .path
            .as_deref()
            .map(|path| Arc::new(JsonlAuditSink::new(path)) as Arc<dyn AuditSink>);
        let env = Arc::new(CopyEnv::from_config(Arc::clone(&config)));
        Self::new(config, env, audit)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn write_audit(&self, record: &AuditRecord) {
        let Some(sink) = &self.audit else {
            return;
        };
        if let Err(e) = sink.record(record) {
            warn!("cannot write audit record for {}: {e}", record.dataset_uuid);
        }
    }
}

/// A request reduced to what the routes look at.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Keys are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn new(method: Method, url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (url, BTreeMap::new()),
        };
        Self {
            method,
            path: path.to_owned(),
            query,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_owned());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    fn format(&self) -> OutputFormat {
        OutputFormat::from_accept(self.header("accept"))
    }
}

fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |s| s.into_owned())
}

/// Decode a query string. Later occurrences of a key win.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

/// What is sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            content_type: OutputFormat::Text.content_type(),
            body: text.into().into_bytes(),
        }
    }

    fn bad_request(summary: &str, info: Value) -> Self {
        Self::json(400, &json!({"summary": summary, "info": info, "operations": []}))
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

/// Status put on the wire for an application error.
pub fn wire_status(err: &CopyError) -> u16 {
    match err.status_code() {
        404 => 400,
        code => code,
    }
}

/// Error payload in the negotiated format: the JSON object, or the
/// transcript followed by the error line.
pub fn error_reply(err: &CopyError, format: OutputFormat) -> Reply {
    let status = wire_status(err);
    match format {
        OutputFormat::Json => Reply::json(
            status,
            &json!({
                "summary": err.to_string(),
                "info": err.info(),
                "operations": err.operations(),
            }),
        ),
        OutputFormat::Text => {
            let mut lines: Vec<String> = err
                .operations()
                .iter()
                .map(OperationRecord::format_line)
                .collect();
            lines.push(format!("ERROR: {err}"));
            Reply::text(status, lines.join("\n"))
        }
    }
}

fn parse_flag(req: &ApiRequest, key: &str) -> Result<bool, Reply> {
    match req.param(key).map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "false" | "0" | "no" | "off") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some(other) => Err(Reply::bad_request(
            &format!("invalid boolean for {key}: {other}"),
            json!({"param": key}),
        )),
    }
}

fn parse_count(req: &ApiRequest, key: &str, default: usize) -> Result<usize, Reply> {
    match req.param(key) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            Reply::bad_request(
                &format!("invalid number for {key}: {raw}"),
                json!({"param": key}),
            )
        }),
    }
}

fn copy_params(req: &ApiRequest) -> Result<(CopyRequest, CopyOptions), Reply> {
    let required = |key: &str| {
        req.param(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Reply::bad_request(&format!("missing parameter {key}"), json!({"param": key}))
            })
    };
    let request = CopyRequest::new(
        required("src_name")?,
        required("dst_name")?,
        req.param("metadataUuid").unwrap_or_default(),
    );
    let options = CopyOptions {
        include_meta: parse_flag(req, "copy_meta")?,
        include_layers: parse_flag(req, "copy_layers")?,
        include_styles: parse_flag(req, "copy_styles")?,
    };
    Ok((request, options))
}

fn handle_copy(state: &AppState, req: &ApiRequest) -> Reply {
    let (request, options) = match copy_params(req) {
        Ok(params) => params,
        Err(reply) => return reply,
    };
    let format = req.format();
    let log = Arc::new(LogCollector::new());
    let mut manager = CopyManager::new(Arc::clone(&state.env), request.clone(), Arc::clone(&log));
    let reply = match manager.copy_dataset(options) {
        Ok(message) => {
            info!("copy {} to {}: {message}", request.uuid, request.dst_name);
            Reply {
                status: 200,
                content_type: format.content_type(),
                body: render_log(&log, format).into_bytes(),
            }
        }
        Err(err) => error_reply(&err, format),
    };
    let identity = (
        req.header("sec-firstname").unwrap_or_default(),
        req.header("sec-lastname").unwrap_or_default(),
    );
    state.write_audit(&AuditRecord::from_log(
        &log,
        &request,
        options,
        identity,
        reply.status,
    ));
    reply
}

fn handle_preview(state: &AppState, req: &ApiRequest) -> Reply {
    let (request, options) = match copy_params(req) {
        Ok(params) => params,
        Err(reply) => return reply,
    };
    let log = Arc::new(LogCollector::new());
    let mut manager = CopyManager::new(Arc::clone(&state.env), request, log);
    match manager.copy_preview(options) {
        Ok(preview) => Reply::json(200, &json!(preview)),
        Err(err) => error_reply(&err, OutputFormat::Json),
    }
}

fn handle_search(state: &AppState, req: &ApiRequest, source: &str) -> Reply {
    let query: Value = if req.body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&req.body) {
            Ok(query) => query,
            Err(e) => return Reply::bad_request(&format!("invalid search body: {e}"), json!({})),
        }
    };
    let log = Arc::new(LogCollector::new());
    let mut scope = RequestScope::new(
        Arc::clone(&state.env.access),
        Arc::clone(&state.env.services),
        Arc::clone(&log),
    );
    let result = scope
        .catalog(Side::Source, source)
        .and_then(|catalog| catalog.search(&query).map_err(CopyError::from));
    match result {
        Ok(hits) => Reply::json(200, &hits),
        Err(err) => error_reply(&err.with_operations(log.records()), OutputFormat::Json),
    }
}

fn handle_logs(state: &AppState, req: &ApiRequest) -> Reply {
    let params = parse_count(req, "size", DEFAULT_LOG_PAGE).and_then(|size| {
        Ok((
            size,
            parse_count(req, "offset", 0)?,
            parse_flag(req, "get_details")?,
        ))
    });
    let (size, offset, details) = match params {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let records = match &state.audit {
        Some(sink) => match sink.recent(size, offset) {
            Ok(records) => records,
            Err(e) => {
                warn!("cannot read audit log: {e}");
                return Reply::json(
                    500,
                    &json!({"summary": format!("cannot read audit log: {e}"), "info": {}, "operations": []}),
                );
            }
        },
        None => Vec::new(),
    };
    match req.format() {
        OutputFormat::Text => Reply::text(
            200,
            records
                .iter()
                .map(AuditRecord::summary_line)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        OutputFormat::Json => {
            let records: Vec<AuditRecord> = if details {
                records
            } else {
                records.into_iter().map(AuditRecord::without_details).collect()
            };
            Reply::json(200, &json!(records))
        }
    }
}

/// Answer one request.
pub fn route(state: &AppState, req: &ApiRequest) -> Reply {
    debug!("{} {}", req.method, req.path);
    let path = req.path.trim_end_matches('/');
    match (&req.method, path) {
        (Method::Get, "/health") => Reply::json(200, &json!({"status": "ok"})),
        (Method::Get, "/sources") => Reply::json(200, &json!(state.config.source_catalogs())),
        (Method::Get, "/destinations") => {
            Reply::json(200, &json!(state.config.destination_entries()))
        }
        (Method::Get, "/transformations") => Reply::json(
            200,
            &json!({
                "transformations": state.config.registered_transforms(),
                "paths": state.config.transformation_paths,
            }),
        ),
        (Method::Get, "/copy_preview") => handle_preview(state, req),
        (Method::Put, "/copy") => handle_copy(state, req),
        (Method::Get, "/logs") => handle_logs(state, req),
        (Method::Post, p) if p.starts_with("/search/") => {
            let source = decode(&p["/search/".len()..]);
            handle_search(state, req, &source)
        }
        (
            _,
            "/health" | "/sources" | "/destinations" | "/transformations" | "/copy_preview"
            | "/copy" | "/logs",
        ) => Reply::text(405, "method not allowed"),
        (_, p) if p.starts_with("/search/") => Reply::text(405, "method not allowed"),
        _ => Reply::text(404, "not found"),
    }
}

fn read_request(req: &mut tiny_http::Request) -> std::io::Result<ApiRequest> {
    let mut body = Vec::new();
    req.as_reader().read_to_end(&mut body)?;
    let mut api = ApiRequest::new(req.method().clone(), req.url()).with_body(body);
    for header in req.headers() {
        api = api.with_header(header.field.as_str().as_str(), header.value.as_str());
    }
    Ok(api)
}

/// Handle a single HTTP request.
pub fn handle_request(state: &AppState, mut req: tiny_http::Request) {
    let reply = match read_request(&mut req) {
        Ok(api) => route(state, &api),
        Err(e) => Reply::text(500, format!("read error: {e}")),
    };
    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    if let Err(e) = req.respond(response) {
        warn!("cannot send response: {e}");
    }
}

fn serve(server: &Server, state: &Arc<AppState>) {
    for request in server.incoming_requests() {
        let state = Arc::clone(state);
        std::thread::spawn(move || handle_request(&state, request));
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(state: &Arc<AppState>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr)?;
    info!("listening on {addr}");
    serve(&server, state);
    Ok(())
}

/// A server on a random local port, served from a background thread.
///
/// Dropping it unblocks the accept loop.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(state: AppState) -> Result<Self, ServerError> {
        let server = Arc::new(Server::http("127.0.0.1:0")?);
        let port = server
            .server_addr()
            .to_ip()
            .ok_or("test server is not bound to an IP address")?
            .port();
        let srv = Arc::clone(&server);
        let state = Arc::new(state);
        let handle = std::thread::spawn(move || serve(&srv, &state));
        Ok(Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            server,
            _handle: handle,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
