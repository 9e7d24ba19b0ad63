//! Walks the map-service resource graph behind a set of layer keys.
//!
//! A layer description names its default and additional styles and the
//! resource (feature type or coverage) it publishes; the resource names its
//! store; the store names its workspace. Everything is fetched from the
//! source map-service as JSON.

use crate::CopyError;
use geosync_meta::GsLayer;
use geosync_remote::MapService;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A layer as returned by `GET /rest/layers/{key}.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LayerDescription(pub Value);

impl LayerDescription {
    fn layer(&self) -> &Value {
        &self.0["layer"]
    }

    pub fn resource_href(&self) -> Option<&str> {
        self.layer()["resource"]["href"].as_str()
    }

    /// Default style first, then the additional styles in listed order.
    pub fn styles(&self) -> Vec<StyleRef> {
        let layer = self.layer();
        let default = layer.get("defaultStyle").into_iter();
        let extra = match &layer["styles"]["style"] {
            Value::Array(items) => items.iter().collect(),
            // a single style comes back as a bare object
            single @ Value::Object(_) => vec![single],
            _ => Vec::new(),
        };
        default
            .chain(extra)
            .filter_map(StyleRef::from_json)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleRef {
    /// Bare style name, without a `workspace:` prefix.
    pub name: String,
    pub workspace: Option<String>,
    pub href: Option<String>,
}

impl StyleRef {
    fn from_json(value: &Value) -> Option<Self> {
        let qualified = value["name"].as_str()?;
        let workspace = name_of(&value["workspace"]);
        let name = match &workspace {
            Some(ws) => qualified
                .strip_prefix(ws.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(qualified),
            None => qualified,
        };
        Some(Self {
            name: name.to_owned(),
            workspace,
            href: value["href"].as_str().map(str::to_owned),
        })
    }

    /// `workspace:name` for workspace styles, the bare name otherwise.
    /// Two styles are the same style only if this matches.
    pub fn qualified_name(&self) -> String {
        match &self.workspace {
            Some(ws) => format!("{ws}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRef {
    /// As the map-service names it, usually `workspace:store`.
    pub name: String,
    /// `dataStore` or `coverageStore`.
    pub class: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceRef {
    pub name: String,
    pub href: String,
}

/// Everything a set of layers depends on.
///
/// Workspaces seen only through a style carry no reference; those derived
/// from a store always do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    pub layers: BTreeMap<GsLayer, LayerDescription>,
    /// Keyed by qualified name.
    pub styles: BTreeMap<String, StyleRef>,
    pub stores: BTreeMap<String, StoreRef>,
    pub workspaces: BTreeMap<String, Option<WorkspaceRef>>,
}

/// Layer and style names found by a read-only survey.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSurvey {
    pub layers: Vec<GsLayer>,
    /// Qualified style names.
    pub styles: BTreeSet<String>,
}

fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(name) if !name.is_empty() => Some(name.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

pub(crate) fn layer_route(key: &GsLayer) -> String {
    format!("/rest/layers/{key}.json")
}

pub struct LayerResourceResolver<'a> {
    service: &'a dyn MapService,
}

impl<'a> LayerResourceResolver<'a> {
    pub fn new(service: &'a dyn MapService) -> Self {
        Self { service }
    }

    /// Route of `href` on this service; hrefs on other hosts stay absolute.
    fn route_of(&self, href: &str) -> String {
        href.replacen(self.service.base_url(), "", 1)
    }

    fn fetch_json(&self, route: &str) -> Result<Value, CopyError> {
        let resp = self.service.get(route)?.error_for_status()?;
        Ok(resp.json()?)
    }

    /// Fetch every layer and, on request, its styles and store graph.
    ///
    /// Any failed fetch aborts the whole resolution.
    pub fn resolve(
        &self,
        keys: &BTreeSet<GsLayer>,
        want_styles: bool,
        want_store_graph: bool,
    ) -> Result<ResourceSet, CopyError> {
        let mut set = ResourceSet::default();
        for key in keys {
            let description = LayerDescription(self.fetch_json(&layer_route(key))?);
            if want_styles {
                for style in description.styles() {
                    if let Some(ws) = &style.workspace {
                        set.workspaces.entry(ws.clone()).or_insert(None);
                    }
                    set.styles.insert(style.qualified_name(), style);
                }
            }
            if want_store_graph {
                self.resolve_store(key, &description, &mut set)?;
            }
            set.layers.insert(key.clone(), description);
        }
        tracing::debug!(
            "resolved {} layer(s), {} style(s), {} store(s), {} workspace(s) on {}",
            set.layers.len(),
            set.styles.len(),
            set.stores.len(),
            set.workspaces.len(),
            self.service.base_url()
        );
        Ok(set)
    }

    fn resolve_store(
        &self,
        key: &GsLayer,
        description: &LayerDescription,
        set: &mut ResourceSet,
    ) -> Result<(), CopyError> {
        let href = description
            .resource_href()
            .ok_or_else(|| CopyError::protocol(format!("layer {key} has no resource reference")))?;
        let resource = self.fetch_json(&self.route_of(href))?;
        let store = resource
            .as_object()
            .and_then(|m| m.values().next())
            .map(|r| &r["store"])
            .ok_or_else(|| CopyError::protocol(format!("resource of {key} has no store")))?;
        let (Some(store_name), Some(store_href)) = (name_of(store), store["href"].as_str()) else {
            return Err(CopyError::protocol(format!(
                "resource of {key} has an incomplete store reference"
            )));
        };
        if set.stores.contains_key(&store_name) {
            return Ok(());
        }

        let store_json = self.fetch_json(&self.route_of(store_href))?;
        let class = store["@class"]
            .as_str()
            .or_else(|| store_json.as_object().and_then(|m| m.keys().next()).map(String::as_str))
            .unwrap_or("dataStore")
            .to_owned();
        let workspace = store_json
            .as_object()
            .and_then(|m| m.values().next())
            .map(|s| &s["workspace"])
            .ok_or_else(|| CopyError::protocol(format!("store {store_name} has no workspace")))?;
        let (Some(ws_name), Some(ws_href)) = (name_of(workspace), workspace["href"].as_str())
        else {
            return Err(CopyError::protocol(format!(
                "store {store_name} has an incomplete workspace reference"
            )));
        };
        if !matches!(set.workspaces.get(&ws_name), Some(Some(_))) {
            self.fetch_json(&self.route_of(ws_href))?;
            set.workspaces.insert(
                ws_name.clone(),
                Some(WorkspaceRef {
                    name: ws_name,
                    href: ws_href.to_owned(),
                }),
            );
        }
        set.stores.insert(
            store_name.clone(),
            StoreRef {
                name: store_name,
                class,
                href: store_href.to_owned(),
            },
        );
        Ok(())
    }

    /// Names only: layers that answer 200 and all of their styles.
    /// Missing layers are skipped rather than reported.
    pub fn survey(&self, keys: &BTreeSet<GsLayer>) -> Result<LayerSurvey, CopyError> {
        let mut survey = LayerSurvey::default();
        for key in keys {
            let resp = self.service.get(&layer_route(key))?;
            if resp.status != 200 {
                tracing::debug!("layer {key} not available ({})", resp.status);
                continue;
            }
            let description = LayerDescription(resp.json()?);
            survey
                .styles
                .extend(description.styles().iter().map(StyleRef::qualified_name));
            survey.layers.push(key.clone());
        }
        Ok(survey)
    }
}
