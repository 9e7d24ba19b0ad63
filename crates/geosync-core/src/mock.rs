//! In-memory stand-ins for the catalog and the map-service.
//!
//! `MockMapService` keeps a tree of REST objects keyed by route and answers
//! the subset of the map-service REST API the copy pipeline uses, so a copy
//! can run end to end against two of them and the resulting destination
//! state can be inspected afterwards. Every call is recorded.

use crate::scope::ServiceProvider;
use geosync_meta::RecordPackage;
use geosync_remote::{
    AccessInfo, Catalog, HttpResponse, MapService, Method, RemoteError, UploadResult,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const VERSION_ROUTE: &str = "/rest/about/version.json";
const EXTENSIONS: [&str; 3] = ["json", "xml", "sld"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub method: Method,
    pub route: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Representations of one REST object, by extension.
type Representations = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct MapState {
    objects: BTreeMap<String, Representations>,
    calls: Vec<MockCall>,
    failures: Vec<(Method, String, u16)>,
    reject_credentials: bool,
}

pub struct MockMapService {
    base_url: String,
    login: Option<String>,
    state: Mutex<MapState>,
}

/// A published layer together with its store, workspace and styles.
#[derive(Debug, Clone)]
pub struct LayerSeed {
    pub workspace: String,
    pub store: String,
    pub layer: String,
    pub default_style: String,
    /// Additional styles and the workspace each lives in, if any.
    pub styles: Vec<(String, Option<String>)>,
}

impl LayerSeed {
    pub fn new(workspace: &str, store: &str, layer: &str, default_style: &str) -> Self {
        Self {
            workspace: workspace.to_owned(),
            store: store.to_owned(),
            layer: layer.to_owned(),
            default_style: default_style.to_owned(),
            styles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_styles(mut self, styles: &[(&str, Option<&str>)]) -> Self {
        self.styles = styles
            .iter()
            .map(|(name, ws)| ((*name).to_owned(), ws.map(str::to_owned)))
            .collect();
        self
    }
}

/// Split a route into the object path and its representation extension.
fn split_route(route: &str) -> (String, String) {
    let route = route.split('?').next().unwrap_or_default();
    if let Some((path, ext)) = route.rsplit_once('.') {
        if EXTENSIONS.contains(&ext) && !path.ends_with('/') {
            return (path.to_owned(), ext.to_owned());
        }
    }
    (route.to_owned(), String::new())
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "json" => "application/json",
        "sld" => "application/vnd.ogc.sld+xml",
        _ => "application/xml",
    }
}

fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("json") {
        "json"
    } else if content_type.contains("sld") || content_type.contains("se+xml") {
        "sld"
    } else {
        "xml"
    }
}

/// Name of the object carried by a create request body.
fn created_name(body: &[u8], ext: &str) -> Option<String> {
    if ext == "json" {
        let value: Value = serde_json::from_slice(body).ok()?;
        let inner = value.as_object()?.values().next()?;
        return inner["name"].as_str().map(str::to_owned);
    }
    let text = String::from_utf8_lossy(body);
    let start = text.find("<name>")? + "<name>".len();
    let end = text[start..].find("</name>")? + start;
    Some(text[start..end].to_owned())
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

impl MockMapService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            login: Some("admin".to_owned()),
            state: Mutex::new(MapState::default()),
        }
    }

    /// Answer 401 to every call.
    pub fn reject_credentials(&self) {
        lock(&self.state).reject_credentials = true;
    }

    /// Answer `status` to `method` calls on routes starting with `prefix`.
    pub fn fail(&self, method: Method, prefix: &str, status: u16) {
        lock(&self.state)
            .failures
            .push((method, prefix.to_owned(), status));
    }

    pub fn insert(&self, route: &str, body: impl Into<Vec<u8>>) {
        let (path, ext) = split_route(route);
        lock(&self.state)
            .objects
            .entry(path)
            .or_default()
            .insert(ext, body.into());
    }

    pub fn insert_json(&self, route: &str, value: &Value) {
        self.insert(route, value.to_string());
    }

    /// Whether the object behind `route` exists, in any representation.
    pub fn contains(&self, route: &str) -> bool {
        lock(&self.state).objects.contains_key(&split_route(route).0)
    }

    pub fn get_json(&self, route: &str) -> Option<Value> {
        let (path, _) = split_route(route);
        let state = lock(&self.state);
        let body = state.objects.get(&path)?.get("json")?;
        serde_json::from_slice(body).ok()
    }

    /// Every stored object and its representations.
    pub fn objects(&self) -> BTreeMap<String, BTreeMap<String, Vec<u8>>> {
        lock(&self.state).objects.clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Every call that is not a GET.
    pub fn writes(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::Get)
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn href(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    pub fn seed_workspace(&self, workspace: &str) {
        self.insert_json(
            &format!("/rest/workspaces/{workspace}.json"),
            &json!({"workspace": {"name": workspace, "isolated": false}}),
        );
    }

    pub fn seed_datastore(&self, workspace: &str, store: &str) {
        self.insert_json(
            &format!("/rest/workspaces/{workspace}/datastores/{store}.json"),
            &json!({"dataStore": {
                "name": store,
                "type": "PostGIS",
                "enabled": true,
                "workspace": {
                    "name": workspace,
                    "href": self.href(&format!("/rest/workspaces/{workspace}.json")),
                },
            }}),
        );
    }

    fn seed_style(&self, name: &str, workspace: Option<&str>) -> Value {
        let collection = match workspace {
            Some(ws) => format!("/rest/workspaces/{ws}/styles"),
            None => "/rest/styles".to_owned(),
        };
        let mut descriptor = json!({
            "name": name,
            "format": "sld",
            "languageVersion": {"version": "1.0.0"},
            "filename": format!("{name}.sld"),
        });
        if let Some(ws) = workspace {
            descriptor["workspace"] = json!({"name": ws});
        }
        self.insert_json(
            &format!("{collection}/{name}.json"),
            &json!({ "style": descriptor }),
        );
        self.insert(
            &format!("{collection}/{name}.sld"),
            format!(
                "<StyledLayerDescriptor version=\"1.0.0\"><NamedLayer><Name>{name}</Name>\
                 </NamedLayer></StyledLayerDescriptor>"
            ),
        );

        let mut reference = json!({
            "name": workspace.map_or_else(|| name.to_owned(), |ws| format!("{ws}:{name}")),
            "href": self.href(&format!("{collection}/{name}.json")),
        });
        if let Some(ws) = workspace {
            reference["workspace"] = json!(ws);
        }
        reference
    }

    /// Seed a vector layer with its feature type, store, workspace and
    /// styles, shaped the way the REST API returns them.
    pub fn seed_layer(&self, seed: &LayerSeed) {
        let (ws, store, layer) = (&seed.workspace, &seed.store, &seed.layer);
        self.seed_workspace(ws);
        self.seed_datastore(ws, store);

        let store_route = format!("/rest/workspaces/{ws}/datastores/{store}");
        let resource_route = format!("{store_route}/featuretypes/{layer}");
        self.insert_json(
            &format!("{resource_route}.json"),
            &json!({"featureType": {
                "name": layer,
                "nativeName": layer,
                "title": layer,
                "srs": "EPSG:2154",
                "store": {
                    "@class": "dataStore",
                    "name": format!("{ws}:{store}"),
                    "href": self.href(&format!("{store_route}.json")),
                },
            }}),
        );
        self.insert(
            &format!("{resource_route}.xml"),
            format!(
                "<featureType><name>{layer}</name><nativeName>{layer}</nativeName>\
                 <title>{layer}</title><srs>EPSG:2154</srs>\
                 <store class=\"dataStore\"><name>{ws}:{store}</name></store></featureType>"
            ),
        );

        let default_style = self.seed_style(&seed.default_style, None);
        let styles: Vec<Value> = seed
            .styles
            .iter()
            .map(|(name, style_ws)| self.seed_style(name, style_ws.as_deref()))
            .collect();
        self.insert_json(
            &format!("/rest/layers/{ws}:{layer}.json"),
            &json!({"layer": {
                "name": layer,
                "type": "VECTOR",
                "defaultStyle": default_style,
                "styles": {"@class": "linked-hash-set", "style": styles},
                "resource": {
                    "@class": "featureType",
                    "name": format!("{ws}:{layer}"),
                    "href": self.href(&format!("{resource_route}.json")),
                },
                "queryable": true,
            }}),
        );
    }

    fn respond(&self, method: Method, route: &str, status: u16, ext: &str, body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            method,
            url: self.url_for(route),
            status,
            content_type: (!body.is_empty()).then(|| content_type_for(ext).to_owned()),
            headers: Vec::new(),
            body,
        }
    }

    fn handle(
        &self,
        method: Method,
        route: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> HttpResponse {
        let relative = route.strip_prefix(self.base_url.as_str()).unwrap_or(route);
        let mut state = lock(&self.state);
        state.calls.push(MockCall {
            method,
            route: relative.to_owned(),
            content_type: content_type.map(str::to_owned),
            body: body.to_vec(),
        });

        if state.reject_credentials {
            return self.respond(method, route, 401, "", Vec::new());
        }
        let failure = state
            .failures
            .iter()
            .find(|(m, prefix, _)| *m == method && relative.starts_with(prefix.as_str()))
            .map(|(_, _, status)| *status);
        if let Some(status) = failure {
            return self.respond(method, route, status, "", Vec::new());
        }
        if method == Method::Get && relative == VERSION_ROUTE {
            let about = json!({"about": {"resource": [{"@name": "GeoServer", "Version": "2.25.2"}]}});
            return self.respond(method, route, 200, "json", about.to_string().into_bytes());
        }

        let (path, ext) = split_route(relative);
        let body_ext = content_type.map_or("xml", extension_for);
        match method {
            Method::Get => match state.objects.get(&path) {
                Some(reps) => {
                    let (ext, data) = reps
                        .get_key_value(&ext)
                        .or_else(|| reps.iter().next())
                        .map(|(e, d)| (e.clone(), d.clone()))
                        .unwrap_or_default();
                    self.respond(method, route, 200, &ext, data)
                }
                None => self.respond(method, route, 404, "", Vec::new()),
            },
            Method::Put => match state.objects.get_mut(&path) {
                Some(reps) => {
                    reps.insert(body_ext.to_owned(), body.to_vec());
                    self.respond(method, route, 200, "", Vec::new())
                }
                None => self.respond(method, route, 404, "", Vec::new()),
            },
            Method::Post => {
                let parent = parent_of(&path);
                if parent != "/rest" && !state.objects.contains_key(parent) {
                    return self.respond(method, route, 404, "", Vec::new());
                }
                let Some(name) = created_name(body, body_ext) else {
                    return self.respond(method, route, 400, "", Vec::new());
                };
                let created = format!("{path}/{name}");
                if state.objects.contains_key(&created) {
                    return self.respond(method, route, 500, "", Vec::new());
                }
                state
                    .objects
                    .entry(created.clone())
                    .or_default()
                    .insert(body_ext.to_owned(), body.to_vec());
                if path.ends_with("/featuretypes") || path.ends_with("/coverages") {
                    let ws = path
                        .strip_prefix("/rest/workspaces/")
                        .and_then(|rest| rest.split('/').next())
                        .unwrap_or_default();
                    let layer = json!({"layer": {
                        "name": name,
                        "resource": {"name": format!("{ws}:{name}"), "href": self.href(&format!("{created}.json"))},
                    }});
                    state
                        .objects
                        .entry(format!("/rest/layers/{ws}:{name}"))
                        .or_default()
                        .insert("json".to_owned(), layer.to_string().into_bytes());
                }
                self.respond(method, route, 201, "", Vec::new())
            }
            Method::Delete => {
                if state.objects.remove(&path).is_none() {
                    return self.respond(method, route, 404, "", Vec::new());
                }
                let nested = format!("{path}/");
                state.objects.retain(|k, _| !k.starts_with(&nested));
                self.respond(method, route, 200, "", Vec::new())
            }
        }
    }
}

impl MapService for MockMapService {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    fn get(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        Ok(self.handle(Method::Get, route, &[], None))
    }

    fn put(&self, route: &str, body: &[u8], content_type: &str) -> Result<HttpResponse, RemoteError> {
        Ok(self.handle(Method::Put, route, body, Some(content_type)))
    }

    fn post(&self, route: &str, body: &[u8], content_type: &str) -> Result<HttpResponse, RemoteError> {
        Ok(self.handle(Method::Post, route, body, Some(content_type)))
    }

    fn delete(&self, route: &str) -> Result<HttpResponse, RemoteError> {
        Ok(self.handle(Method::Delete, route, &[], None))
    }
}

#[derive(Default)]
struct CatalogState {
    records: BTreeMap<String, Vec<u8>>,
    uploads: Vec<Vec<u8>>,
    searches: Vec<Value>,
}

pub struct MockCatalog {
    base_url: String,
    state: Mutex<CatalogState>,
}

impl MockCatalog {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            state: Mutex::new(CatalogState::default()),
        }
    }

    pub fn insert_record(&self, uuid: &str, package: Vec<u8>) {
        lock(&self.state).records.insert(uuid.to_owned(), package);
    }

    pub fn record(&self, uuid: &str) -> Option<Vec<u8>> {
        lock(&self.state).records.get(uuid).cloned()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        lock(&self.state).uploads.clone()
    }

    pub fn searches(&self) -> Vec<Value> {
        lock(&self.state).searches.clone()
    }
}

impl Catalog for MockCatalog {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch_record_package(&self, uuid: &str) -> Result<Vec<u8>, RemoteError> {
        self.record(uuid).ok_or_else(|| RemoteError::Status {
            method: "GET".to_owned(),
            url: format!("{}/records/{uuid}", self.base_url),
            status: 404,
            body: String::new(),
        })
    }

    fn put_record_package(&self, package: &[u8]) -> Result<UploadResult, RemoteError> {
        let uuid = RecordPackage::open(package.to_vec())
            .map(|p| p.index().uuid.clone())
            .map_err(|e| RemoteError::Status {
                method: "POST".to_owned(),
                url: format!("{}/records", self.base_url),
                status: 400,
                body: e.to_string(),
            })?;
        let mut state = lock(&self.state);
        state.uploads.push(package.to_vec());
        state.records.insert(uuid.clone(), package.to_vec());
        Ok(UploadResult {
            message: "Metadata creation successful".to_owned(),
            detail: json!([{"message": format!("Metadata imported with uuid {uuid}")}]),
        })
    }

    fn search(&self, query: &Value) -> Result<Value, RemoteError> {
        let mut state = lock(&self.state);
        state.searches.push(query.clone());
        let hits: Vec<Value> = state
            .records
            .keys()
            .map(|uuid| json!({"_id": uuid, "_source": {}}))
            .collect();
        Ok(json!({"hits": {"total": {"value": hits.len()}, "hits": hits}}))
    }
}

/// Hands out registered mocks by URL.
#[derive(Default)]
pub struct MockServiceProvider {
    catalogs: Mutex<HashMap<String, Arc<MockCatalog>>>,
    map_services: Mutex<HashMap<String, Arc<MockMapService>>>,
    opened: Mutex<Vec<String>>,
}

impl MockServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_catalog(&self, catalog: Arc<MockCatalog>) {
        lock(&self.catalogs).insert(catalog.base_url.clone(), catalog);
    }

    pub fn add_map_service(&self, service: Arc<MockMapService>) {
        lock(&self.map_services).insert(service.base_url.clone(), service);
    }

    /// URLs of every handle opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }

    fn refused(url: &str) -> RemoteError {
        RemoteError::Transport {
            method: "GET".to_owned(),
            url: url.to_owned(),
            message: "connection refused".to_owned(),
        }
    }
}

impl ServiceProvider for MockServiceProvider {
    fn catalog(&self, info: &AccessInfo) -> Result<Arc<dyn Catalog>, RemoteError> {
        let url = info.url.trim_end_matches('/');
        let catalog = lock(&self.catalogs)
            .get(url)
            .cloned()
            .ok_or_else(|| Self::refused(url))?;
        lock(&self.opened).push(url.to_owned());
        Ok(catalog)
    }

    fn map_service(&self, info: &AccessInfo) -> Result<Arc<dyn MapService>, RemoteError> {
        let url = info.url.trim_end_matches('/');
        let service = lock(&self.map_services)
            .get(url)
            .cloned()
            .ok_or_else(|| Self::refused(url))?;
        lock(&self.opened).push(url.to_owned());
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_split_on_known_extensions() {
        assert_eq!(
            split_route("/rest/layers/ws:velo.json"),
            ("/rest/layers/ws:velo".to_owned(), "json".to_owned())
        );
        assert_eq!(
            split_route("/rest/styles/point.sld?raw=true"),
            ("/rest/styles/point".to_owned(), "sld".to_owned())
        );
        assert_eq!(
            split_route("/rest/workspaces/ws/styles"),
            ("/rest/workspaces/ws/styles".to_owned(), String::new())
        );
    }

    #[test]
    fn post_needs_an_existing_parent() {
        let gs = MockMapService::new("http://gs/geoserver");
        let body = b"<featureType><name>velo</name></featureType>";
        let resp = gs
            .post("/rest/workspaces/ws/datastores/ds/featuretypes", body, "application/xml")
            .unwrap();
        assert_eq!(resp.status, 404);

        gs.seed_workspace("ws");
        gs.seed_datastore("ws", "ds");
        let resp = gs
            .post("/rest/workspaces/ws/datastores/ds/featuretypes", body, "application/xml")
            .unwrap();
        assert_eq!(resp.status, 201);
        assert!(gs.contains("/rest/workspaces/ws/datastores/ds/featuretypes/velo.json"));
        assert!(gs.contains("/rest/layers/ws:velo.json"));
    }

    #[test]
    fn put_updates_existing_objects_only() {
        let gs = MockMapService::new("http://gs/geoserver");
        assert_eq!(gs.put("/rest/styles/point.sld", b"<sld/>", "application/vnd.ogc.sld+xml").unwrap().status, 404);
        gs.insert_json("/rest/styles/point.json", &json!({"style": {"name": "point"}}));
        assert_eq!(gs.put("/rest/styles/point.sld", b"<sld/>", "application/vnd.ogc.sld+xml").unwrap().status, 200);
        assert_eq!(gs.get("/rest/styles/point.sld").unwrap().body, b"<sld/>");
    }

    #[test]
    fn rejected_credentials_and_injected_failures() {
        let gs = MockMapService::new("http://gs/geoserver");
        gs.fail(Method::Post, "/rest/styles", 500);
        gs.seed_workspace("ws");
        assert_eq!(
            gs.post("/rest/styles", br#"{"style":{"name":"a"}}"#, "application/json").unwrap().status,
            500
        );
        gs.reject_credentials();
        assert_eq!(gs.get("/rest/workspaces/ws.json").unwrap().status, 401);
        assert_eq!(gs.calls().len(), 2);
    }

    #[test]
    fn catalog_round_trips_uploads() {
        let gn = MockCatalog::new("http://gn/api");
        let package =
            RecordPackage::assemble("abc", &geosync_meta::Schema::Iso19139, b"<r/>").unwrap();
        let result = gn.put_record_package(&package).unwrap();
        assert_eq!(result.message, "Metadata creation successful");
        assert_eq!(gn.fetch_record_package("abc").unwrap(), package);
        assert_eq!(gn.fetch_record_package("nope").unwrap_err().status(), Some(404));
    }
}
