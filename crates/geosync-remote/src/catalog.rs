//! Metadata catalog client.
//!
//! Records are exchanged as zip packages: `GET /records/{uuid}` with
//! `Accept: application/zip` downloads one, and a multipart
//! `POST /records?metadataType=METADATA&uuidProcessing=OVERWRITE` creates or
//! replaces one. Write calls need the `XSRF-TOKEN` cookie the API hands out
//! on any request (we use `GET /me`), echoed back as the `X-XSRF-TOKEN`
//! header.

use crate::config::Credentials;
use crate::http::{HttpClient, HttpResponse, Method};
use crate::RemoteError;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// Outcome of a record upload, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub message: String,
    pub detail: Value,
}

pub trait Catalog: Send + Sync {
    fn base_url(&self) -> &str;

    fn fetch_record_package(&self, uuid: &str) -> Result<Vec<u8>, RemoteError>;

    fn put_record_package(&self, package: &[u8]) -> Result<UploadResult, RemoteError>;

    fn search(&self, query: &Value) -> Result<Value, RemoteError>;
}

impl<T: Catalog + ?Sized> Catalog for Arc<T> {
    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn fetch_record_package(&self, uuid: &str) -> Result<Vec<u8>, RemoteError> {
        (**self).fetch_record_package(uuid)
    }

    fn put_record_package(&self, package: &[u8]) -> Result<UploadResult, RemoteError> {
        (**self).put_record_package(package)
    }

    fn search(&self, query: &Value) -> Result<Value, RemoteError> {
        (**self).search(query)
    }
}

pub struct HttpCatalog {
    client: HttpClient,
}

impl HttpCatalog {
    pub fn new(api_url: &str, credentials: Option<Credentials>, timeout: Duration) -> Self {
        Self {
            client: HttpClient::new(api_url, credentials, timeout),
        }
    }

    fn xsrf_token(&self) -> Result<Option<String>, RemoteError> {
        let resp = self.client.send(
            Method::Get,
            "/me",
            &[("Accept", "application/json")],
            None,
        )?;
        Ok(xsrf_from_cookies(&resp))
    }

    fn send_with_token(
        &self,
        method: Method,
        route: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, RemoteError> {
        let token = self.xsrf_token()?;
        let cookie = token.as_ref().map(|t| format!("{XSRF_COOKIE}={t}"));
        let mut all: Vec<(&str, &str)> = headers.to_vec();
        if let (Some(token), Some(cookie)) = (token.as_deref(), cookie.as_deref()) {
            all.push(("X-XSRF-TOKEN", token));
            all.push(("Cookie", cookie));
        }
        self.client.send(method, route, &all, Some(body))
    }
}

fn xsrf_from_cookies(resp: &HttpResponse) -> Option<String> {
    resp.header_values("set-cookie").find_map(|cookie| {
        cookie.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == XSRF_COOKIE && !v.is_empty()).then(|| v.to_owned())
        })
    })
}

fn multipart_zip(boundary: &str, package: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(package.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"record.zip\"\r\n\
             Content-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(package);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Map the catalog's import report to a one-line outcome.
fn upload_result(report: &Value) -> UploadResult {
    let errors = report
        .get("errors")
        .and_then(Value::as_array)
        .filter(|errors| !errors.is_empty());
    match errors {
        Some(errors) => UploadResult {
            message: "Metadata creation failed".to_owned(),
            detail: Value::Array(errors.clone()),
        },
        None => UploadResult {
            message: "Metadata creation successful".to_owned(),
            detail: report.get("infos").cloned().unwrap_or_else(|| json!([])),
        },
    }
}

impl Catalog for HttpCatalog {
    fn base_url(&self) -> &str {
        self.client.base_url()
    }

    fn fetch_record_package(&self, uuid: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self
            .client
            .send(
                Method::Get,
                &format!("/records/{}", urlencoding::encode(uuid)),
                &[("Accept", "application/zip")],
                None,
            )?
            .error_for_status()?;
        Ok(resp.body)
    }

    fn put_record_package(&self, package: &[u8]) -> Result<UploadResult, RemoteError> {
        let boundary = format!("geosync-{}", uuid::Uuid::new_v4().simple());
        let content_type = format!("multipart/form-data; boundary={boundary}");
        let body = multipart_zip(&boundary, package);
        let resp = self
            .send_with_token(
                Method::Post,
                "/records?metadataType=METADATA&uuidProcessing=OVERWRITE",
                &[
                    ("Content-Type", content_type.as_str()),
                    ("Accept", "application/json"),
                ],
                &body,
            )?
            .error_for_status()?;
        Ok(upload_result(&resp.json()?))
    }

    fn search(&self, query: &Value) -> Result<Value, RemoteError> {
        let body =
            serde_json::to_vec(query).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let resp = self
            .send_with_token(
                Method::Post,
                "/search/records/_search",
                &[
                    ("Content-Type", "application/json"),
                    ("Accept", "application/json"),
                ],
                &body,
            )?
            .error_for_status()?;
        resp.json()
    }
}
