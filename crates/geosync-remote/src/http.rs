use crate::config::Credentials;
use crate::RemoteError;
use base64::Engine;
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response of any status. Only transport failures are errors at this
/// level; callers decide which statuses they tolerate.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, RemoteError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RemoteError::Serialization(format!("invalid JSON from {} {}: {e}", self.method, self.url))
        })
    }

    /// All values of a header, case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn error_for_status(self) -> Result<Self, RemoteError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(RemoteError::Status {
            method: self.method.to_string(),
            status: self.status,
            body: self.text(),
            url: self.url,
        })
    }
}

/// Join a base URL and a route. Absolute routes are used as they are.
pub fn join_url(base: &str, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_owned();
    }
    let base = base.trim_end_matches('/');
    if route.starts_with('/') {
        format!("{base}{route}")
    } else {
        format!("{base}/{route}")
    }
}

/// Blocking HTTP client bound to one server and one set of credentials.
pub struct HttpClient {
    base_url: String,
    credentials: Option<Credentials>,
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(base_url: &str, credentials: Option<Credentials>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn login(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.login.as_str())
    }

    pub fn url_for(&self, route: &str) -> String {
        join_url(&self.base_url, route)
    }

    fn authorization(&self) -> Option<String> {
        self.credentials.as_ref().map(|c| {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", c.login, c.password));
            format!("Basic {token}")
        })
    }

    pub fn send(
        &self,
        method: Method,
        route: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, RemoteError> {
        let url = self.url_for(route);
        let mut all_headers: Vec<(&str, String)> =
            headers.iter().map(|(k, v)| (*k, (*v).to_owned())).collect();
        if let Some(auth) = self.authorization() {
            all_headers.push(("Authorization", auth));
        }
        tracing::debug!("{method} {url}");

        let result = match method {
            Method::Get => with_headers(self.agent.get(&url), &all_headers).call(),
            Method::Delete => with_headers(self.agent.delete(&url), &all_headers).call(),
            Method::Put => {
                with_headers(self.agent.put(&url), &all_headers).send(body.unwrap_or_default())
            }
            Method::Post => {
                with_headers(self.agent.post(&url), &all_headers).send(body.unwrap_or_default())
            }
        };
        let transport = |message: String| RemoteError::Transport {
            method: method.to_string(),
            url: url.clone(),
            message,
        };
        let response = result.map_err(|e| transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_owned(),
                    v.to_str().unwrap_or_default().to_owned(),
                )
            })
            .collect();
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        let mut data = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut data)
            .map_err(|e| transport(e.to_string()))?;
        tracing::debug!("{method} {url} -> {status} ({} bytes)", data.len());

        Ok(HttpResponse {
            method,
            url,
            status,
            content_type,
            headers,
            body: data,
        })
    }
}

fn with_headers<B>(
    mut request: ureq::RequestBuilder<B>,
    headers: &[(&str, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    request
}

/// REST access to a map-service (layers, styles, stores, workspaces).
///
/// Routes are relative to the service base URL (`/rest/layers/ws:velo.json`)
/// or absolute. Every status is returned as a response; only network-level
/// failures are errors.
pub trait MapService: Send + Sync {
    fn base_url(&self) -> &str;

    /// Login the service was opened with, for error reporting.
    fn login(&self) -> Option<&str>;

    fn get(&self, route: &str) -> Result<HttpResponse, RemoteError>;

    fn put(&self, route: &str, body: &[u8], content_type: &str)
        -> Result<HttpResponse, RemoteError>;

    fn post(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError>;

    fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError>;

    fn url_for(&self, route: &str) -> String {
        join_url(self.base_url(), route)
    }
}

impl<T: MapService + ?Sized> MapService for Arc<T> {
    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn login(&self) -> Option<&str> {
        (**self).login()
    }

    fn get(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        (**self).get(route)
    }

    fn put(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        (**self).put(route, body, content_type)
    }

    fn post(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        (**self).post(route, body, content_type)
    }

    fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        (**self).delete(route)
    }
}

/// Map-service client over HTTP with basic authentication.
pub struct HttpMapService {
    client: HttpClient,
}

impl HttpMapService {
    pub fn new(url: &str, credentials: Option<Credentials>, timeout: Duration) -> Self {
        Self {
            client: HttpClient::new(url, credentials, timeout),
        }
    }
}

impl MapService for HttpMapService {
    fn base_url(&self) -> &str {
        self.client.base_url()
    }

    fn login(&self) -> Option<&str> {
        self.client.login()
    }

    fn get(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        self.client.send(Method::Get, route, &[], None)
    }

    fn put(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        self.client
            .send(Method::Put, route, &[("Content-Type", content_type)], Some(body))
    }

    fn post(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        self.client
            .send(Method::Post, route, &[("Content-Type", content_type)], Some(body))
    }

    fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        self.client.send(Method::Delete, route, &[], None)
    }
}
