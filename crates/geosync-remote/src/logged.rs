//! Decorators that record every remote call into the request's log.

use crate::catalog::{Catalog, UploadResult};
use crate::http::{join_url, HttpResponse, MapService, Method};
use crate::log::{LogCollector, ServiceKind};
use crate::RemoteError;
use serde_json::Value;
use std::sync::Arc;

fn status_of<T>(result: &Result<T, RemoteError>, ok_status: impl FnOnce(&T) -> u16) -> u16 {
    match result {
        Ok(value) => ok_status(value),
        Err(err) => err.status().unwrap_or(0),
    }
}

/// Map-service wrapper that logs method, status and URL of each call.
pub struct LoggedMapService<S> {
    inner: S,
    log: Arc<LogCollector>,
}

impl<S: MapService> LoggedMapService<S> {
    pub fn new(inner: S, log: Arc<LogCollector>) -> Self {
        Self { inner, log }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn logged(
        &self,
        method: Method,
        route: &str,
        result: Result<HttpResponse, RemoteError>,
    ) -> Result<HttpResponse, RemoteError> {
        let url = match &result {
            Ok(resp) => resp.url.clone(),
            Err(_) => self.inner.url_for(route),
        };
        let status = status_of(&result, |resp| resp.status);
        self.log
            .record_api_call(ServiceKind::GsApi, method.as_str(), status, &url);
        result
    }
}

impl<S: MapService> MapService for LoggedMapService<S> {
    fn base_url(&self) -> &str {
        self.inner.base_url()
    }

    fn login(&self) -> Option<&str> {
        self.inner.login()
    }

    fn get(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        self.logged(Method::Get, route, self.inner.get(route))
    }

    fn put(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        self.logged(Method::Put, route, self.inner.put(route, body, content_type))
    }

    fn post(
        &self,
        route: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<HttpResponse, RemoteError> {
        self.logged(Method::Post, route, self.inner.post(route, body, content_type))
    }

    fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        self.logged(Method::Delete, route, self.inner.delete(route))
    }
}

/// Catalog wrapper that logs each call. Successful calls are recorded with
/// status 200; failures carry the upstream status, or 0 without a response.
pub struct LoggedCatalog<C> {
    inner: C,
    log: Arc<LogCollector>,
}

impl<C: Catalog> LoggedCatalog<C> {
    pub fn new(inner: C, log: Arc<LogCollector>) -> Self {
        Self { inner, log }
    }

    fn record<T>(&self, method: Method, route: &str, result: &Result<T, RemoteError>) {
        let url = join_url(self.inner.base_url(), route);
        let status = status_of(result, |_| 200);
        self.log
            .record_api_call(ServiceKind::GnApi, method.as_str(), status, &url);
    }
}

impl<C: Catalog> Catalog for LoggedCatalog<C> {
    fn base_url(&self) -> &str {
        self.inner.base_url()
    }

    fn fetch_record_package(&self, uuid: &str) -> Result<Vec<u8>, RemoteError> {
        let result = self.inner.fetch_record_package(uuid);
        self.record(Method::Get, &format!("/records/{uuid}"), &result);
        result
    }

    fn put_record_package(&self, package: &[u8]) -> Result<UploadResult, RemoteError> {
        let result = self.inner.put_record_package(package);
        self.record(Method::Post, "/records", &result);
        result
    }

    fn search(&self, query: &Value) -> Result<Value, RemoteError> {
        let result = self.inner.search(query);
        self.record(Method::Post, "/search/records/_search", &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{DataType, OperationRecord};

    struct FixedMapService;

    impl MapService for FixedMapService {
        fn base_url(&self) -> &str {
            "http://gs/geoserver"
        }

        fn login(&self) -> Option<&str> {
            Some("admin")
        }

        fn get(&self, route: &str) -> Result<HttpResponse, RemoteError> {
            let status = if route.contains("missing") { 404 } else { 200 };
            Ok(HttpResponse {
                method: Method::Get,
                url: self.url_for(route),
                status,
                content_type: None,
                headers: Vec::new(),
                body: Vec::new(),
            })
        }

        fn put(&self, route: &str, _: &[u8], _: &str) -> Result<HttpResponse, RemoteError> {
            Err(RemoteError::Transport {
                method: "PUT".into(),
                url: self.url_for(route),
                message: "timed out".into(),
            })
        }

        fn post(&self, route: &str, _: &[u8], _: &str) -> Result<HttpResponse, RemoteError> {
            self.get(route)
        }

        fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError> {
            self.get(route)
        }
    }

    struct FailingCatalog;

    impl Catalog for FailingCatalog {
        fn base_url(&self) -> &str {
            "http://gn/api"
        }

        fn fetch_record_package(&self, _: &str) -> Result<Vec<u8>, RemoteError> {
            Ok(b"zip".to_vec())
        }

        fn put_record_package(&self, _: &[u8]) -> Result<UploadResult, RemoteError> {
            Err(RemoteError::Status {
                method: "POST".into(),
                url: "http://gn/api/records".into(),
                status: 403,
                body: String::new(),
            })
        }

        fn search(&self, _: &Value) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
    }

    fn api_records(log: &LogCollector) -> Vec<(String, u16, String, DataType)> {
        log.records()
            .into_iter()
            .filter_map(|r| match r {
                OperationRecord::Api(a) => Some((a.method, a.status_code, a.url, a.data_type)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn map_service_calls_are_logged_with_status() {
        let log = Arc::new(LogCollector::new());
        let gs = LoggedMapService::new(FixedMapService, Arc::clone(&log));
        let _ctx = log.enter(DataType::Layer);
        assert!(gs.get("/rest/layers/ws:velo.json").unwrap().is_success());
        assert_eq!(gs.get("/rest/missing.json").unwrap().status, 404);
        assert!(gs.put("/rest/layers/ws:velo", b"{}", "application/json").is_err());

        assert_eq!(
            api_records(&log),
            vec![
                (
                    "GET".into(),
                    200,
                    "http://gs/geoserver/rest/layers/ws:velo.json".into(),
                    DataType::Layer
                ),
                (
                    "GET".into(),
                    404,
                    "http://gs/geoserver/rest/missing.json".into(),
                    DataType::Layer
                ),
                (
                    "PUT".into(),
                    0,
                    "http://gs/geoserver/rest/layers/ws:velo".into(),
                    DataType::Layer
                ),
            ]
        );
        assert_eq!(gs.login(), Some("admin"));
    }

    #[test]
    fn catalog_calls_are_logged() {
        let log = Arc::new(LogCollector::new());
        let gn = LoggedCatalog::new(FailingCatalog, Arc::clone(&log));
        gn.fetch_record_package("abc").unwrap();
        assert!(gn.put_record_package(b"zip").is_err());

        let formatted = log.formatted();
        assert_eq!(
            formatted,
            vec![
                "[General] gn_api GET 200 http://gn/api/records/abc".to_owned(),
                "[General] gn_api POST 403 http://gn/api/records".to_owned(),
            ]
        );
    }
}
