//! Style and layer replication from a source to a destination map-service.

use crate::prereq::exists;
use crate::resources::{layer_route, LayerDescription, StyleRef};
use crate::{CopyError, Side};
use geosync_meta::GsLayer;
use geosync_remote::{LogCollector, MapService};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleAction {
    /// Hosted outside the source map-service.
    Skipped,
    Created,
    Updated,
}

/// What happened to the resource (feature type or coverage) behind a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerAction {
    Created,
    /// The resource existed without a layer and was deleted first.
    Recreated,
    Updated,
}

fn with_extension(route: &str, ext: &str) -> String {
    let stem = route.strip_suffix(".json").unwrap_or(route);
    format!("{stem}.{ext}")
}

fn definition_content_type(format: &str, version: Option<&str>) -> Option<&'static str> {
    match (format, version) {
        ("sld", Some("1.1.0" | "1.1")) => Some("application/vnd.ogc.se+xml"),
        ("sld", _) => Some("application/vnd.ogc.sld+xml"),
        ("css", _) => Some("application/vnd.geoserver.geocss+css"),
        ("ysld", _) => Some("application/vnd.geoserver.ysld+yaml"),
        ("mbstyle", _) => Some("application/vnd.geoserver.mbstyle+json"),
        _ => None,
    }
}

pub struct StyleReplicator<'a> {
    source: &'a dyn MapService,
    destination: &'a dyn MapService,
    log: &'a LogCollector,
    tolerate_create_failure: bool,
}

impl<'a> StyleReplicator<'a> {
    pub fn new(
        source: &'a dyn MapService,
        destination: &'a dyn MapService,
        log: &'a LogCollector,
    ) -> Self {
        Self {
            source,
            destination,
            log,
            tolerate_create_failure: true,
        }
    }

    /// Whether a failed descriptor POST is logged and skipped instead of
    /// aborting the copy. The definition PUT that follows is always fatal.
    #[must_use]
    pub fn tolerate_create_failure(mut self, tolerate: bool) -> Self {
        self.tolerate_create_failure = tolerate;
        self
    }

    pub fn copy_style(&self, style: &StyleRef) -> Result<StyleAction, CopyError> {
        let base = self.source.base_url();
        let Some(route) = style
            .href
            .as_deref()
            .and_then(|href| href.strip_prefix(base))
        else {
            tracing::debug!("style {} is not hosted on {base}, skipped", style.name);
            return Ok(StyleAction::Skipped);
        };

        let descriptor = self.source.get(route)?.error_for_status()?;
        let descriptor_json = descriptor.json()?;
        let format = descriptor_json["style"]["format"].as_str().unwrap_or("sld");
        let version = descriptor_json["style"]["languageVersion"]["version"].as_str();
        let definition_route = with_extension(route, format);
        let definition = self.source.get(&definition_route)?.error_for_status()?;
        let content_type = definition_content_type(format, version)
            .map(str::to_owned)
            .or_else(|| definition.content_type.clone())
            .unwrap_or_else(|| "application/xml".to_owned());

        let action = if exists(self.destination, route)? {
            self.destination
                .put(route, &descriptor.body, "application/json")?
                .error_for_status()?;
            StyleAction::Updated
        } else {
            let collection = route
                .rsplit_once("/styles/")
                .map_or_else(|| "/rest/styles".to_owned(), |(head, _)| format!("{head}/styles"));
            let created = self
                .destination
                .post(&collection, &descriptor.body, "application/json")?;
            if !created.is_success() {
                if !self.tolerate_create_failure {
                    return Err(created.error_for_status().err().map_or_else(
                        || CopyError::protocol("style creation failed"),
                        CopyError::from,
                    ));
                }
                tracing::warn!(
                    "creating style {} answered {}, continuing",
                    style.name,
                    created.status
                );
                self.log.record_info(
                    format!("Style {} creation failed, continuing", style.name),
                    json!({"status": created.status, "url": created.url}),
                );
            }
            StyleAction::Created
        };

        self.destination
            .put(&definition_route, &definition.body, &content_type)?
            .error_for_status()?;
        Ok(action)
    }
}

pub struct LayerReplicator<'a> {
    source: &'a dyn MapService,
    destination: &'a dyn MapService,
}

impl<'a> LayerReplicator<'a> {
    pub fn new(source: &'a dyn MapService, destination: &'a dyn MapService) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// The layer description with every source base URL replaced by the
    /// destination's, as one string-level substitution.
    fn rewritten(&self, description: &LayerDescription) -> Result<Vec<u8>, CopyError> {
        let text = serde_json::to_string(&description.0)
            .map_err(|e| CopyError::protocol(e.to_string()))?;
        let text = text.replace(self.source.base_url(), self.destination.base_url());
        let value: Value =
            serde_json::from_str(&text).map_err(|e| CopyError::protocol(e.to_string()))?;
        Ok(value.to_string().into_bytes())
    }

    pub fn copy_layer(
        &self,
        key: &GsLayer,
        description: &LayerDescription,
    ) -> Result<LayerAction, CopyError> {
        let href = description
            .resource_href()
            .ok_or_else(|| CopyError::protocol(format!("layer {key} has no resource reference")))?;
        let json_route = href.replacen(self.source.base_url(), "", 1);
        let resource_path = json_route
            .strip_suffix(".json")
            .unwrap_or(&json_route)
            .to_owned();
        let xml_route = format!("{resource_path}.xml");
        let collection = resource_path
            .rsplit_once('/')
            .map_or("", |(parent, _)| parent)
            .to_owned();

        let resource = self.source.get(&xml_route)?.error_for_status()?;
        let layer_body = self.rewritten(description)?;
        let resource_exists = exists(self.destination, &json_route)?;
        let layer_exists = exists(self.destination, &layer_route(key))?;

        let action = match (resource_exists, layer_exists) {
            (false, _) => {
                self.create_resource(key, &collection, &resource.body)?;
                LayerAction::Created
            }
            (true, false) => {
                self.destination
                    .delete(&resource_path)?
                    .error_for_status()?;
                self.create_resource(key, &collection, &resource.body)?;
                LayerAction::Recreated
            }
            (true, true) => {
                self.destination
                    .put(&xml_route, &resource.body, "application/xml")?
                    .error_for_status()?;
                LayerAction::Updated
            }
        };

        self.destination
            .put(&layer_route(key), &layer_body, "application/json")?
            .error_for_status()?;
        tracing::debug!("layer {key} replicated ({action:?})");
        Ok(action)
    }

    fn create_resource(&self, key: &GsLayer, collection: &str, body: &[u8]) -> Result<(), CopyError> {
        let resp = self.destination.post(collection, body, "application/xml")?;
        if resp.status == 404 {
            return Err(CopyError::param(
                Side::Destination,
                format!("Layer {key}"),
                "Route not found. Check Workspace and datastore",
            ));
        }
        resp.error_for_status()?;
        Ok(())
    }
}
