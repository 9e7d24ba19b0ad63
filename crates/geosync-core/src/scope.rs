//! Per-request service handles.
//!
//! A `RequestScope` opens each catalog and map-service at most once per
//! request and wraps it in the logging decorators. Handles are dropped with
//! the scope (or by `invalidate`), so rotated credentials are picked up by
//! the next request.

use crate::{CopyError, Side};
use geosync_remote::{
    AccessInfo, AccessResolver, Catalog, HttpCatalog, HttpMapService, LogCollector,
    LoggedCatalog, LoggedMapService, MapService, RemoteError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const VERSION_ROUTE: &str = "/rest/about/version.json";

/// Opens clients for resolved instances.
pub trait ServiceProvider: Send + Sync {
    fn catalog(&self, info: &AccessInfo) -> Result<Arc<dyn Catalog>, RemoteError>;

    fn map_service(&self, info: &AccessInfo) -> Result<Arc<dyn MapService>, RemoteError>;
}

/// Blocking HTTP clients with a uniform timeout.
pub struct HttpServiceProvider {
    timeout: Duration,
}

impl HttpServiceProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServiceProvider for HttpServiceProvider {
    fn catalog(&self, info: &AccessInfo) -> Result<Arc<dyn Catalog>, RemoteError> {
        Ok(Arc::new(HttpCatalog::new(
            &info.url,
            info.credentials.clone(),
            self.timeout,
        )))
    }

    fn map_service(&self, info: &AccessInfo) -> Result<Arc<dyn MapService>, RemoteError> {
        Ok(Arc::new(HttpMapService::new(
            &info.url,
            info.credentials.clone(),
            self.timeout,
        )))
    }
}

pub struct RequestScope {
    access: Arc<dyn AccessResolver>,
    services: Arc<dyn ServiceProvider>,
    log: Arc<LogCollector>,
    catalogs: HashMap<(Side, String), Arc<dyn Catalog>>,
    map_services: HashMap<(Side, String), Arc<dyn MapService>>,
}

impl RequestScope {
    pub fn new(
        access: Arc<dyn AccessResolver>,
        services: Arc<dyn ServiceProvider>,
        log: Arc<LogCollector>,
    ) -> Self {
        Self {
            access,
            services,
            log,
            catalogs: HashMap::new(),
            map_services: HashMap::new(),
        }
    }

    pub fn log(&self) -> &Arc<LogCollector> {
        &self.log
    }

    /// Drop every cached handle.
    pub fn invalidate(&mut self) {
        self.catalogs.clear();
        self.map_services.clear();
    }

    /// Connection info for an instance, with unknown names reported as such.
    pub fn access_info(
        &self,
        side: Side,
        is_catalog: bool,
        instance: &str,
    ) -> Result<AccessInfo, CopyError> {
        self.access
            .access_info(side == Side::Source, is_catalog, instance)
            .map_err(|e| match e {
                RemoteError::NotFound(_) => CopyError::unknown_instance(side, instance, is_catalog),
                other => other.into(),
            })
    }

    pub fn source_map_service_urls(&self) -> Vec<String> {
        self.access.source_map_service_urls()
    }

    pub fn catalog(&mut self, side: Side, instance: &str) -> Result<Arc<dyn Catalog>, CopyError> {
        let key = (side, instance.to_owned());
        if let Some(catalog) = self.catalogs.get(&key) {
            return Ok(Arc::clone(catalog));
        }
        let info = self.access_info(side, true, instance)?;
        let inner = self.services.catalog(&info)?;
        let catalog: Arc<dyn Catalog> =
            Arc::new(LoggedCatalog::new(inner, Arc::clone(&self.log)));
        self.catalogs.insert(key, Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Open a map-service and probe its version.
    ///
    /// A 401 on the probe is an authentication error naming the server and
    /// the login; the handle is cached only once the probe succeeds.
    pub fn map_service(
        &mut self,
        side: Side,
        instance: &str,
    ) -> Result<Arc<dyn MapService>, CopyError> {
        let key = (side, instance.to_owned());
        if let Some(service) = self.map_services.get(&key) {
            return Ok(Arc::clone(service));
        }
        let info = self.access_info(side, false, instance)?;
        let inner = self.services.map_service(&info)?;
        let service: Arc<dyn MapService> =
            Arc::new(LoggedMapService::new(inner, Arc::clone(&self.log)));

        let resp = service.get(VERSION_ROUTE)?;
        if resp.status == 401 {
            return Err(CopyError::Auth {
                server: info.url,
                user: service.login().map(str::to_owned),
                operations: Vec::new(),
            });
        }
        let about = resp.error_for_status()?.json()?;
        let component = &about["about"]["resource"][0];
        let name = component["@name"].as_str().unwrap_or("GeoServer");
        let version = component["Version"].as_str().unwrap_or("unknown");
        tracing::info!("opened {} ({name} {version})", info.url);
        self.log.record_info(
            format!("Session opened on {name} at {version}"),
            json!({"server": info.url}),
        );

        self.map_services.insert(key, Arc::clone(&service));
        Ok(service)
    }
}
