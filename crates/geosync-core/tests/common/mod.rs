#![allow(dead_code)]

use geosync_core::mock::{LayerSeed, MockCatalog, MockMapService, MockServiceProvider};
use geosync_core::{CopyEnv, CopyManager, CopyRequest};
use geosync_meta::{RecordPackage, Schema};
use geosync_remote::{AppConfig, LogCollector};
use std::sync::Arc;

pub const SRC_GN: &str = "http://src.example.org/geonetwork/srv/api";
pub const SRC_GS: &str = "http://src.example.org/geoserver";
pub const DST_GN: &str = "http://dst.example.org/geonetwork/srv/api";
pub const DST_GS: &str = "http://dst.example.org/geoserver";
/// Second source map-service, used by [`Fixture::two_services`].
pub const MAPS_GS: &str = "http://maps.example.org/geoserver";
pub const UUID: &str = "7f1e4c2a-velo";

const TAG_AS_COPY: &str = r#"description: Tag the record title as a copy
rules:
  - op: replace_text
    path: gmd:title/gco:CharacterString
    from: "vélo"
    to: "vélo (copie)"
"#;

/// An ISO 19139 record titled "Stations vélo" with one WMS link per layer
/// on the source map-service.
pub fn record_xml(layers: &[&str]) -> String {
    let links: Vec<(&str, &str)> = layers.iter().map(|layer| (SRC_GS, *layer)).collect();
    record_xml_with_links(&links)
}

/// Same record, with one WMS link per `(service, layer)` pair.
pub fn record_xml_with_links(links: &[(&str, &str)]) -> String {
    let links: String = links
        .iter()
        .map(|(service, layer)| {
            format!(
                "<gmd:onLine><gmd:CI_OnlineResource>\
                 <gmd:linkage><gmd:URL>{service}/ows</gmd:URL></gmd:linkage>\
                 <gmd:protocol><gco:CharacterString>OGC:WMS</gco:CharacterString></gmd:protocol>\
                 <gmd:name><gco:CharacterString>{layer}</gco:CharacterString></gmd:name>\
                 </gmd:CI_OnlineResource></gmd:onLine>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <gmd:MD_Metadata xmlns:gmd=\"http://www.isotc211.org/2005/gmd\" \
         xmlns:gco=\"http://www.isotc211.org/2005/gco\">\
         <gmd:fileIdentifier><gco:CharacterString>{UUID}</gco:CharacterString></gmd:fileIdentifier>\
         <gmd:identificationInfo><gmd:MD_DataIdentification><gmd:citation><gmd:CI_Citation>\
         <gmd:title><gco:CharacterString>Stations vélo</gco:CharacterString></gmd:title>\
         </gmd:CI_Citation></gmd:citation></gmd:MD_DataIdentification></gmd:identificationInfo>\
         <gmd:distributionInfo><gmd:MD_Distribution><gmd:transferOptions>\
         <gmd:MD_DigitalTransferOptions>{links}</gmd:MD_DigitalTransferOptions>\
         </gmd:transferOptions></gmd:MD_Distribution></gmd:distributionInfo>\
         </gmd:MD_Metadata>"
    )
}

/// Source and destination platforms wired to a config file, all in memory.
pub struct Fixture {
    pub env: Arc<CopyEnv>,
    pub provider: Arc<MockServiceProvider>,
    pub src_gn: Arc<MockCatalog>,
    pub dst_gn: Arc<MockCatalog>,
    pub src_gs: Arc<MockMapService>,
    pub maps_gs: Arc<MockMapService>,
    pub dst_gs: Arc<MockMapService>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    /// Source publishing `ws:velo` (default style `point`, extra styles
    /// `style1` in `ws` and global `style2`); destination with workspace
    /// `ws` and datastore `ws:ds`.
    pub fn new() -> Self {
        Self::with_destination(|dst| {
            dst.seed_workspace("ws");
            dst.seed_datastore("ws", "ds");
        })
    }

    pub fn with_destination(prepare: impl FnOnce(&MockMapService)) -> Self {
        Self::build(false, prepare)
    }

    /// Like [`Fixture::new`], plus a second source map-service publishing
    /// `ws2:pistes` (store `ws2:ds2`, style `line`). The record links to
    /// both services and the destination has both workspaces.
    pub fn two_services() -> Self {
        Self::two_services_with_destination(|dst| {
            dst.seed_workspace("ws");
            dst.seed_datastore("ws", "ds");
            dst.seed_workspace("ws2");
            dst.seed_datastore("ws2", "ds2");
        })
    }

    pub fn two_services_with_destination(prepare: impl FnOnce(&MockMapService)) -> Self {
        Self::build(true, prepare)
    }

    fn build(second_service: bool, prepare: impl FnOnce(&MockMapService)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tag_as_copy.yaml"), TAG_AS_COPY).unwrap();
        let config_path = dir.path().join("geosync.yaml");
        std::fs::write(
            &config_path,
            format!(
                r#"
sources:
  login: reader
  password: reader
  geonetwork_instances:
    - name: Src
      api_url: {SRC_GN}
  geoserver_instances:
    - url: {SRC_GS}
    - url: {MAPS_GS}
destinations:
  Dst:
    login: admin
    password: admin
    geonetwork:
      api_url: {DST_GN}
    geoserver:
      url: {DST_GS}
transformations:
  tag_as_copy:
    path: tag_as_copy.yaml
    description: Tag the record title as a copy
transformation_paths:
  Src:
    Dst: [tag_as_copy]
"#
            ),
        )
        .unwrap();
        let config = Arc::new(AppConfig::load(&config_path).unwrap());

        let record = if second_service {
            record_xml_with_links(&[(SRC_GS, "ws:velo"), (MAPS_GS, "ws2:pistes")])
        } else {
            record_xml(&["ws:velo"])
        };
        let src_gn = Arc::new(MockCatalog::new(SRC_GN));
        src_gn.insert_record(
            UUID,
            RecordPackage::assemble(UUID, &Schema::Iso19139, record.as_bytes()).unwrap(),
        );
        let dst_gn = Arc::new(MockCatalog::new(DST_GN));
        let src_gs = Arc::new(MockMapService::new(SRC_GS));
        src_gs.seed_layer(
            &LayerSeed::new("ws", "ds", "velo", "point")
                .with_styles(&[("style1", Some("ws")), ("style2", None)]),
        );
        let maps_gs = Arc::new(MockMapService::new(MAPS_GS));
        maps_gs.seed_layer(&LayerSeed::new("ws2", "ds2", "pistes", "line"));
        let dst_gs = Arc::new(MockMapService::new(DST_GS));
        prepare(&dst_gs);

        let provider = Arc::new(MockServiceProvider::new());
        provider.add_catalog(Arc::clone(&src_gn));
        provider.add_catalog(Arc::clone(&dst_gn));
        provider.add_map_service(Arc::clone(&src_gs));
        provider.add_map_service(Arc::clone(&maps_gs));
        provider.add_map_service(Arc::clone(&dst_gs));

        let env = Arc::new(CopyEnv::with_services(
            config,
            Arc::clone(&provider) as Arc<dyn geosync_core::ServiceProvider>,
        ));
        Self {
            env,
            provider,
            src_gn,
            dst_gn,
            src_gs,
            maps_gs,
            dst_gs,
            _dir: dir,
        }
    }

    pub fn manager_for(&self, dst_name: &str, uuid: &str) -> CopyManager {
        CopyManager::new(
            Arc::clone(&self.env),
            CopyRequest::new("Src", dst_name, uuid),
            Arc::new(LogCollector::new()),
        )
    }

    pub fn manager(&self) -> CopyManager {
        self.manager_for("Dst", UUID)
    }
}
