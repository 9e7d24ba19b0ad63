//! The copy orchestrator.
//!
//! `CopyManager` runs one copy request: fetch the source record, replicate
//! styles and layers for every source map-service the record links to, then
//! transform and upload the record. Each step is checked against the
//! lifecycle state machine, and any failure aborts the request with the
//! operation log attached.

use crate::lifecycle::{validate_transition, CopyState};
use crate::prereq::PrerequisiteValidator;
use crate::replicate::{LayerReplicator, StyleReplicator};
use crate::resources::LayerResourceResolver;
use crate::scope::{HttpServiceProvider, RequestScope, ServiceProvider};
use crate::{CopyError, Side};
use geosync_meta::{GsLayer, MetaDocument, UrlMapping};
use geosync_remote::config::CopySettings;
use geosync_remote::{AccessResolver, AppConfig, DataType, LogCollector, TransformRegistry};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Collaborators shared by every request.
pub struct CopyEnv {
    pub access: Arc<dyn AccessResolver>,
    pub transforms: Arc<dyn TransformRegistry>,
    pub services: Arc<dyn ServiceProvider>,
    pub settings: CopySettings,
}

impl CopyEnv {
    /// Resolve instances and transform chains from `config` and talk HTTP.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let services = Arc::new(HttpServiceProvider::new(config.http.timeout()));
        Self::with_services(config, services)
    }

    pub fn with_services(config: Arc<AppConfig>, services: Arc<dyn ServiceProvider>) -> Self {
        Self {
            settings: config.copy.clone(),
            access: Arc::clone(&config) as Arc<dyn AccessResolver>,
            transforms: config as Arc<dyn TransformRegistry>,
            services,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub src_name: String,
    pub dst_name: String,
    pub uuid: String,
}

impl CopyRequest {
    pub fn new(src_name: &str, dst_name: &str, uuid: &str) -> Self {
        Self {
            src_name: src_name.to_owned(),
            dst_name: dst_name.to_owned(),
            uuid: uuid.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyOptions {
    pub include_meta: bool,
    pub include_layers: bool,
    pub include_styles: bool,
}

impl CopyOptions {
    pub fn all() -> Self {
        Self {
            include_meta: true,
            include_layers: true,
            include_styles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewMetadata {
    pub title: String,
    pub iso_standard: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewCatalog {
    pub src: String,
    pub dst: String,
    pub metadata: Vec<PreviewMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewMapService {
    pub src: String,
    pub dst: String,
    pub layers: Vec<String>,
    pub styles: Vec<String>,
}

/// What a copy would touch, for confirmation before running it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyPreview {
    pub geonetwork_resources: Vec<PreviewCatalog>,
    pub geoserver_resources: Vec<PreviewMapService>,
}

/// How a finished request's operation log is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(a) if a.contains("application/json") => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// One line per record, or the structured records as a JSON array.
pub fn render_log(log: &LogCollector, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => log.formatted().join("\n"),
        OutputFormat::Json => json!(log.records()).to_string(),
    }
}

pub struct CopyManager {
    env: Arc<CopyEnv>,
    request: CopyRequest,
    scope: RequestScope,
    log: Arc<LogCollector>,
    state: CopyState,
}

impl CopyManager {
    pub fn new(env: Arc<CopyEnv>, request: CopyRequest, log: Arc<LogCollector>) -> Self {
        let scope = RequestScope::new(
            Arc::clone(&env.access),
            Arc::clone(&env.services),
            Arc::clone(&log),
        );
        Self {
            env,
            request,
            scope,
            log,
            state: CopyState::Init,
        }
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    pub fn log(&self) -> &Arc<LogCollector> {
        &self.log
    }

    pub fn request(&self) -> &CopyRequest {
        &self.request
    }

    fn advance(&mut self, to: CopyState) -> Result<(), CopyError> {
        validate_transition(self.state, to)?;
        tracing::debug!("copy {}: {} -> {to}", self.request.uuid, self.state);
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, err: CopyError) -> CopyError {
        tracing::warn!("copy of {} failed in {}: {err}", self.request.uuid, self.state);
        if validate_transition(self.state, CopyState::Failed).is_ok() {
            self.state = CopyState::Failed;
        }
        err.with_operations(self.log.records())
    }

    fn fetch_metadata(&mut self) -> Result<MetaDocument, CopyError> {
        let catalog = self.scope.catalog(Side::Source, &self.request.src_name)?;
        let package = catalog.fetch_record_package(&self.request.uuid)?;
        Ok(MetaDocument::from_package(package)?)
    }

    /// Layer keys per configured source map-service, services without any
    /// linked layer left out.
    fn linked_services(&self, meta: &MetaDocument) -> BTreeMap<String, BTreeSet<GsLayer>> {
        let mut services = meta.resolve_layer_keys(&self.scope.source_map_service_urls());
        services.retain(|_, keys| !keys.is_empty());
        services
    }

    /// Copy the record and, on request, the styles and layers it links to.
    ///
    /// Returns the catalog's upload message, `copy_successful` when the
    /// record itself was not copied, or an empty string for an empty uuid.
    pub fn copy_dataset(&mut self, options: CopyOptions) -> Result<String, CopyError> {
        tracing::info!(
            "copy {} from {} to {} ({options:?})",
            self.request.uuid,
            self.request.src_name,
            self.request.dst_name
        );
        match self.run_copy(options) {
            Ok(message) => Ok(message),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn run_copy(&mut self, options: CopyOptions) -> Result<String, CopyError> {
        if self.request.uuid.is_empty() {
            self.advance(CopyState::Done)?;
            return Ok(String::new());
        }
        let mut meta = self.fetch_metadata()?;
        self.log.set_property("src_title", meta.title());
        self.advance(CopyState::MetadataFetched)?;

        let mut copied_services = Vec::new();
        if options.include_layers || options.include_styles {
            for (gs_url, keys) in self.linked_services(&meta) {
                self.copy_service_resources(&gs_url, &keys, options)?;
                copied_services.push(gs_url);
            }
        }

        if !options.include_meta {
            self.advance(CopyState::Done)?;
            return Ok("copy_successful".to_owned());
        }
        let sources = if options.include_layers {
            copied_services
        } else {
            Vec::new()
        };
        self.copy_metadata(&mut meta, sources)
    }

    fn copy_service_resources(
        &mut self,
        gs_url: &str,
        keys: &BTreeSet<GsLayer>,
        options: CopyOptions,
    ) -> Result<(), CopyError> {
        let log = Arc::clone(&self.log);
        let source = self.scope.map_service(Side::Source, gs_url)?;
        let destination = self
            .scope
            .map_service(Side::Destination, &self.request.dst_name)?;

        let resources = LayerResourceResolver::new(source.as_ref()).resolve(
            keys,
            options.include_styles,
            options.include_layers,
        )?;
        self.advance(CopyState::ResourcesResolved)?;

        let validator = PrerequisiteValidator::new(
            source.base_url(),
            destination.as_ref(),
            &self.request.dst_name,
        );
        validator.check_workspaces(&resources.workspaces)?;
        validator.check_datastores(&resources.stores)?;
        self.advance(CopyState::PrerequisitesChecked)?;

        if options.include_styles {
            {
                let _ctx = log.enter(DataType::Style);
                let replicator =
                    StyleReplicator::new(source.as_ref(), destination.as_ref(), &log)
                        .tolerate_create_failure(self.env.settings.tolerate_style_create_failure);
                for style in resources.styles.values() {
                    replicator.copy_style(style)?;
                }
                let names: Vec<&String> = resources.styles.keys().collect();
                log.record_success("Styles copied successfully", json!({ "styles": names }));
            }
            self.advance(CopyState::StylesCopied)?;
        }

        if options.include_layers {
            {
                let _ctx = log.enter(DataType::Layer);
                let replicator = LayerReplicator::new(source.as_ref(), destination.as_ref());
                for (key, description) in &resources.layers {
                    replicator.copy_layer(key, description)?;
                }
                let names: Vec<String> = resources.layers.keys().map(ToString::to_string).collect();
                log.record_success("Layers copied successfully", json!({ "layers": names }));
            }
            self.advance(CopyState::LayersCopied)?;
        }
        Ok(())
    }

    /// Point links at the destination for the services whose layers were
    /// copied, apply the configured transform chain and upload the record.
    fn copy_metadata(
        &mut self,
        meta: &mut MetaDocument,
        copied_services: Vec<String>,
    ) -> Result<String, CopyError> {
        if !copied_services.is_empty() {
            let dst_gs = self
                .scope
                .access_info(Side::Destination, false, &self.request.dst_name)?;
            let report = meta.rewrite_urls(&UrlMapping {
                sources: copied_services,
                destinations: vec![dst_gs.url],
            });
            self.log.record_info(
                "Rewrite map-service URLs in metadata",
                json!({
                    "replacements": report.replacements,
                    "before": report.before.linkage_urls,
                    "after": report.after.linkage_urls,
                }),
            );
        }

        let chain = self
            .env
            .transforms
            .chain(&self.request.src_name, &self.request.dst_name)?;
        if !chain.is_empty() {
            let paths: Vec<&std::path::Path> = chain.iter().map(|t| t.path.as_path()).collect();
            let report = meta.apply_transform_chain(&paths)?;
            self.log.record_info(
                "Apply transformations in zip archive",
                json!({
                    "transformations": chain,
                    "before": report.before,
                    "after": report.after,
                }),
            );
        }
        self.advance(CopyState::MetadataTransformed)?;
        self.log.set_property("dst_title", meta.title());

        let package = meta.serialize_package()?;
        let catalog = self
            .scope
            .catalog(Side::Destination, &self.request.dst_name)?;
        let result = {
            let _ctx = self.log.enter(DataType::Meta);
            let result = catalog.put_record_package(&package)?;
            self.log
                .record_success(result.message.clone(), json!({ "info": result.detail }));
            result
        };
        self.advance(CopyState::MetadataUploaded)?;
        self.advance(CopyState::Done)?;
        Ok(result.message)
    }

    /// Read-only summary of what `copy_dataset` would copy. Only GETs are
    /// issued, and only against the source.
    pub fn copy_preview(&mut self, options: CopyOptions) -> Result<CopyPreview, CopyError> {
        self.run_preview(options).map_err(|err| self.fail(err))
    }

    fn run_preview(&mut self, options: CopyOptions) -> Result<CopyPreview, CopyError> {
        let mut preview = CopyPreview::default();
        if self.request.uuid.is_empty() {
            return Ok(preview);
        }
        let meta = self.fetch_metadata()?;
        preview.geonetwork_resources.push(PreviewCatalog {
            src: self.request.src_name.clone(),
            dst: self.request.dst_name.clone(),
            metadata: if options.include_meta {
                vec![PreviewMetadata {
                    title: meta.title(),
                    iso_standard: meta.schema().id().to_owned(),
                }]
            } else {
                Vec::new()
            },
        });

        let dst_gs = self
            .scope
            .access_info(Side::Destination, false, &self.request.dst_name)?;
        if options.include_layers || options.include_styles {
            for (gs_url, keys) in self.linked_services(&meta) {
                let source = self.scope.map_service(Side::Source, &gs_url)?;
                let survey = LayerResourceResolver::new(source.as_ref()).survey(&keys)?;
                if survey.layers.is_empty() && survey.styles.is_empty() {
                    continue;
                }
                preview.geoserver_resources.push(PreviewMapService {
                    src: gs_url,
                    dst: dst_gs.url.clone(),
                    layers: if options.include_layers {
                        survey.layers.iter().map(ToString::to_string).collect()
                    } else {
                        Vec::new()
                    },
                    styles: if options.include_styles {
                        survey.styles.into_iter().collect()
                    } else {
                        Vec::new()
                    },
                });
            }
        }
        Ok(preview)
    }
}
