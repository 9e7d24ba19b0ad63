mod common;

use common::{Fixture, DST_GS, MAPS_GS, SRC_GS, UUID};
use geosync_core::mock::MockCall;
use geosync_core::{CopyError, CopyOptions, CopyState};
use geosync_meta::MetaDocument;
use geosync_remote::{DataType, Method, OperationRecord};
use std::collections::BTreeSet;

fn layers_and_styles() -> CopyOptions {
    CopyOptions {
        include_meta: false,
        include_layers: true,
        include_styles: true,
    }
}

fn touches(call: &MockCall, fragment: &str) -> bool {
    call.route.contains(fragment)
}

fn success_kinds(manager: &geosync_core::CopyManager) -> Vec<DataType> {
    manager
        .log()
        .records()
        .into_iter()
        .filter_map(|r| match r {
            OperationRecord::Success(info) => Some(info.data_type),
            _ => None,
        })
        .collect()
}

#[test]
fn full_copy_replicates_styles_layers_and_record() {
    let fx = Fixture::new();
    let mut manager = fx.manager();
    let message = manager.copy_dataset(CopyOptions::all()).unwrap();
    assert_eq!(message, "Metadata creation successful");
    assert_eq!(manager.state(), CopyState::Done);

    assert!(fx.dst_gs.contains("/rest/styles/point.sld"));
    assert!(fx.dst_gs.contains("/rest/workspaces/ws/styles/style1.sld"));
    assert!(fx.dst_gs.contains("/rest/styles/style2.sld"));
    assert!(fx
        .dst_gs
        .contains("/rest/workspaces/ws/datastores/ds/featuretypes/velo.xml"));
    let layer = fx.dst_gs.get_json("/rest/layers/ws:velo.json").unwrap();
    assert!(!layer.to_string().contains(SRC_GS));
    assert!(layer.to_string().contains(DST_GS));

    let uploads = fx.dst_gn.uploads();
    assert_eq!(uploads.len(), 1);
    let copied = MetaDocument::from_package(uploads[0].clone()).unwrap();
    assert_eq!(copied.title(), "Stations vélo (copie)");
    assert_eq!(copied.uuid(), Some(UUID));
    let links = copied.linked_layers();
    assert!(!links.is_empty());
    assert!(links.iter().all(|l| l.server_url.starts_with(DST_GS)));

    let log = manager.log();
    assert_eq!(log.property_str("src_title"), "Stations vélo");
    assert_eq!(log.property_str("dst_title"), "Stations vélo (copie)");
    let successes: Vec<(DataType, String)> = log
        .records()
        .into_iter()
        .filter_map(|r| match r {
            OperationRecord::Success(info) => Some((info.data_type, info.message)),
            _ => None,
        })
        .collect();
    assert_eq!(
        successes,
        vec![
            (DataType::Style, "Styles copied successfully".to_owned()),
            (DataType::Layer, "Layers copied successfully".to_owned()),
            (DataType::Meta, "Metadata creation successful".to_owned()),
        ]
    );
    assert!(log
        .formatted()
        .iter()
        .any(|l| l.contains("Apply transformations in zip archive")));
}

#[test]
fn styles_are_written_before_layers() {
    let fx = Fixture::new();
    fx.manager().copy_dataset(layers_and_styles()).unwrap();
    let writes = fx.dst_gs.writes();
    let last_style = writes
        .iter()
        .rposition(|c| touches(c, "/styles"))
        .unwrap();
    let first_layer = writes
        .iter()
        .position(|c| touches(c, "/featuretypes") || touches(c, "/rest/layers/"))
        .unwrap();
    assert!(last_style < first_layer);
}

#[test]
fn second_copy_updates_in_place() {
    let fx = Fixture::new();
    assert_eq!(
        fx.manager().copy_dataset(layers_and_styles()).unwrap(),
        "copy_successful"
    );
    let after_first = fx.dst_gs.objects();
    assert!(fx.dst_gs.writes().iter().any(|c| c.method == Method::Post));

    fx.dst_gs.clear_calls();
    fx.manager().copy_dataset(layers_and_styles()).unwrap();
    let writes = fx.dst_gs.writes();
    assert!(!writes.is_empty());
    assert!(writes.iter().all(|c| c.method == Method::Put), "{writes:?}");
    assert!(writes
        .iter()
        .any(|c| c.route == "/rest/workspaces/ws/datastores/ds/featuretypes/velo.xml"));
    assert!(writes.iter().any(|c| c.route == "/rest/layers/ws:velo.json"));
    assert_eq!(fx.dst_gs.objects(), after_first);
}

#[test]
fn missing_datastore_fails_closed() {
    let fx = Fixture::with_destination(|dst| dst.seed_workspace("ws"));
    let mut manager = fx.manager();
    let err = manager
        .copy_dataset(CopyOptions {
            include_meta: true,
            include_layers: true,
            include_styles: false,
        })
        .unwrap_err();
    assert!(matches!(err, CopyError::Param { .. }));
    assert_eq!(err.status_code(), 400);
    assert_eq!(
        err.to_string(),
        "Datastore ws:ds not found on destination Geoserver Dst"
    );
    assert!(!err.operations().is_empty());
    assert_eq!(manager.state(), CopyState::Failed);

    assert!(fx
        .dst_gs
        .writes()
        .iter()
        .all(|c| !touches(c, "/featuretypes") && !touches(c, "/styles")));
    assert!(fx.dst_gs.writes().is_empty());
    assert!(fx.dst_gn.uploads().is_empty());
}

#[test]
fn missing_workspace_fails_before_any_write() {
    let fx = Fixture::with_destination(|_| {});
    let err = fx.manager().copy_dataset(CopyOptions::all()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Workspace ws not found on destination Geoserver Dst"
    );
    assert!(fx.dst_gs.writes().is_empty());
    assert!(fx.dst_gn.uploads().is_empty());
}

#[test]
fn preview_lists_names_without_writing() {
    let fx = Fixture::new();
    let preview = fx.manager().copy_preview(CopyOptions::all()).unwrap();

    assert_eq!(preview.geonetwork_resources.len(), 1);
    let catalog = &preview.geonetwork_resources[0];
    assert_eq!((catalog.src.as_str(), catalog.dst.as_str()), ("Src", "Dst"));
    assert_eq!(catalog.metadata[0].title, "Stations vélo");
    assert_eq!(catalog.metadata[0].iso_standard, "iso19139");

    assert_eq!(preview.geoserver_resources.len(), 1);
    let gs = &preview.geoserver_resources[0];
    assert_eq!(gs.src, SRC_GS);
    assert_eq!(gs.dst, DST_GS);
    assert_eq!(gs.layers, vec!["ws:velo"]);
    let styles: BTreeSet<&str> = gs.styles.iter().map(String::as_str).collect();
    assert_eq!(styles, BTreeSet::from(["point", "style2", "ws:style1"]));

    assert!(fx.dst_gs.calls().is_empty());
    assert!(fx.dst_gn.uploads().is_empty());
    assert!(fx.src_gs.writes().is_empty());
}

#[test]
fn preview_honours_options() {
    let fx = Fixture::new();
    let preview = fx
        .manager()
        .copy_preview(CopyOptions {
            include_meta: false,
            include_layers: false,
            include_styles: true,
        })
        .unwrap();
    assert!(preview.geonetwork_resources[0].metadata.is_empty());
    let gs = &preview.geoserver_resources[0];
    assert!(gs.layers.is_empty());
    assert_eq!(gs.styles.len(), 3);
}

#[test]
fn empty_uuid_is_a_no_op() {
    let fx = Fixture::new();
    let mut manager = fx.manager_for("Dst", "");
    assert_eq!(manager.copy_dataset(CopyOptions::all()).unwrap(), "");
    assert_eq!(manager.state(), CopyState::Done);
    assert!(fx.provider.opened().is_empty());

    let preview = fx
        .manager_for("Dst", "")
        .copy_preview(CopyOptions::all())
        .unwrap();
    assert!(preview.geonetwork_resources.is_empty());
    assert!(preview.geoserver_resources.is_empty());
}

#[test]
fn metadata_only_copy_leaves_links_alone() {
    let fx = Fixture::new();
    let message = fx
        .manager()
        .copy_dataset(CopyOptions {
            include_meta: true,
            include_layers: false,
            include_styles: false,
        })
        .unwrap();
    assert_eq!(message, "Metadata creation successful");
    assert!(fx.dst_gs.calls().is_empty());
    let copied = MetaDocument::from_package(fx.dst_gn.uploads()[0].clone()).unwrap();
    assert!(copied
        .linked_layers()
        .iter()
        .all(|l| l.server_url.starts_with(SRC_GS)));
}

#[test]
fn styles_only_copy_skips_layers() {
    let fx = Fixture::new();
    let mut manager = fx.manager();
    let message = manager
        .copy_dataset(CopyOptions {
            include_meta: true,
            include_layers: false,
            include_styles: true,
        })
        .unwrap();
    assert_eq!(message, "Metadata creation successful");
    assert_eq!(manager.state(), CopyState::Done);
    assert_eq!(success_kinds(&manager), vec![DataType::Style, DataType::Meta]);

    assert!(fx.dst_gs.contains("/rest/styles/point.sld"));
    assert!(fx.dst_gs.contains("/rest/workspaces/ws/styles/style1.sld"));
    let writes = fx.dst_gs.writes();
    assert!(!writes.is_empty());
    assert!(writes
        .iter()
        .all(|c| !touches(c, "/featuretypes") && !touches(c, "/rest/layers/")));
    // no store graph is walked for styles alone
    assert!(fx.src_gs.calls().iter().all(|c| !touches(c, "/datastores/")));

    let copied = MetaDocument::from_package(fx.dst_gn.uploads()[0].clone()).unwrap();
    assert!(copied
        .linked_layers()
        .iter()
        .all(|l| l.server_url.starts_with(SRC_GS)));
}

#[test]
fn every_linked_service_is_copied_in_turn() {
    let fx = Fixture::two_services();
    let mut manager = fx.manager();
    let message = manager.copy_dataset(CopyOptions::all()).unwrap();
    assert_eq!(message, "Metadata creation successful");
    assert_eq!(manager.state(), CopyState::Done);
    assert_eq!(
        success_kinds(&manager),
        vec![
            DataType::Style,
            DataType::Layer,
            DataType::Style,
            DataType::Layer,
            DataType::Meta,
        ]
    );

    assert!(fx.dst_gs.contains("/rest/styles/line.sld"));
    assert!(fx
        .dst_gs
        .contains("/rest/workspaces/ws2/datastores/ds2/featuretypes/pistes.xml"));
    assert!(fx
        .dst_gs
        .contains("/rest/workspaces/ws/datastores/ds/featuretypes/velo.xml"));
    let pistes = fx.dst_gs.get_json("/rest/layers/ws2:pistes.json").unwrap();
    assert!(!pistes.to_string().contains(MAPS_GS));
    assert!(pistes.to_string().contains(DST_GS));

    let upload = fx.dst_gn.uploads()[0].clone();
    let copied = MetaDocument::from_package(upload).unwrap();
    let links = copied.linked_layers();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.server_url.starts_with(DST_GS)), "{links:?}");
    let xml = String::from_utf8(copied.xml_bytes().to_vec()).unwrap();
    assert!(!xml.contains(SRC_GS));
    assert!(!xml.contains(MAPS_GS));
}

#[test]
fn second_service_prerequisites_are_checked_too() {
    let fx = Fixture::two_services_with_destination(|dst| {
        dst.seed_workspace("ws");
        dst.seed_workspace("ws2");
        dst.seed_datastore("ws2", "ds2");
    });
    let mut manager = fx.manager();
    let err = manager.copy_dataset(CopyOptions::all()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Datastore ws:ds not found on destination Geoserver Dst"
    );
    assert_eq!(manager.state(), CopyState::Failed);
    // services go in URL order: maps.example.org is copied before src.example.org fails
    assert!(fx.dst_gs.contains("/rest/layers/ws2:pistes.json"));
    assert!(!fx.dst_gs.contains("/rest/layers/ws:velo.json"));
    assert!(fx
        .dst_gs
        .writes()
        .iter()
        .all(|c| !touches(c, "/rest/workspaces/ws/styles/")));
    assert!(fx.dst_gn.uploads().is_empty());
}

#[test]
fn unknown_record_is_a_remote_error() {
    let fx = Fixture::new();
    let mut manager = fx.manager_for("Dst", "does-not-exist");
    let err = manager.copy_dataset(CopyOptions::all()).unwrap_err();
    assert!(matches!(err, CopyError::Remote { status: 404, .. }));
    assert_eq!(manager.state(), CopyState::Failed);
}

#[test]
fn unknown_destination_is_reported_by_name() {
    let fx = Fixture::new();
    let err = fx
        .manager_for("Nope", UUID)
        .copy_dataset(layers_and_styles())
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.to_string(), "Nope: geoserver not found in config");
}

#[test]
fn rejected_destination_credentials() {
    let fx = Fixture::new();
    fx.dst_gs.reject_credentials();
    let err = fx.manager().copy_dataset(CopyOptions::all()).unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert!(matches!(
        err,
        CopyError::Auth { ref server, user: Some(ref user), .. }
            if server == DST_GS && user == "admin"
    ));
    assert!(fx.dst_gs.writes().is_empty());
}

#[test]
fn failed_style_body_upload_aborts_before_layers() {
    let fx = Fixture::new();
    fx.dst_gs.fail(Method::Put, "/rest/styles/style2", 500);
    let err = fx.manager().copy_dataset(layers_and_styles()).unwrap_err();
    assert!(matches!(err, CopyError::Remote { status: 500, .. }));
    assert!(fx
        .dst_gs
        .writes()
        .iter()
        .all(|c| !touches(c, "/featuretypes") && !touches(c, "/rest/layers/")));
}
