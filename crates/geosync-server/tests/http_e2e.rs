//! Requests over a real socket against a server backed by in-memory
//! catalogs and map-services.

use geosync_core::mock::{LayerSeed, MockCatalog, MockMapService, MockServiceProvider};
use geosync_core::{AuditSink, CopyEnv, JsonlAuditSink, ServiceProvider};
use geosync_meta::{MetaDocument, RecordPackage, Schema};
use geosync_remote::{AppConfig, HttpClient, HttpResponse, Method};
use geosync_server::{AppState, TestServer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const RECORD: &[u8] = include_bytes!("../../geosync-meta/testdata/iso19139_velo.xml");
const UUID: &str = "ef6fe5e6-b8f8-49c4-a885-69ce665515dc";
const SRC_GN: &str = "https://public.sig.example.org/geonetwork/srv/api";
const SRC_GS: &str = "https://public.sig.example.org/geoserver";
const DST_GN: &str = "https://staging.example.org/geonetwork/srv/api";
const DST_GS: &str = "https://staging.example.org/geoserver";

struct Harness {
    server: TestServer,
    client: HttpClient,
    sink: Arc<JsonlAuditSink>,
    dst_gn: Arc<MockCatalog>,
    dst_gs: Arc<MockMapService>,
    _dir: tempfile::TempDir,
}

fn start() -> Harness {
    let config = Arc::new(
        AppConfig::from_yaml(
            &format!(
                r#"
sources:
  geonetwork_instances:
    - name: Public
      api_url: {SRC_GN}
  geoserver_instances:
    - url: {SRC_GS}
destinations:
  Staging:
    login: admin
    password: admin
    geonetwork:
      api_url: {DST_GN}
    geoserver:
      url: {DST_GS}
"#
            ),
            &|_| None,
        )
        .unwrap(),
    );

    let src_gn = Arc::new(MockCatalog::new(SRC_GN));
    src_gn.insert_record(
        UUID,
        RecordPackage::assemble(UUID, &Schema::Iso19139, RECORD).unwrap(),
    );
    let src_gs = Arc::new(MockMapService::new(SRC_GS));
    src_gs.seed_layer(
        &LayerSeed::new("ws", "ds", "velo", "point")
            .with_styles(&[("style1", Some("ws")), ("style2", None)]),
    );
    let dst_gn = Arc::new(MockCatalog::new(DST_GN));
    let dst_gs = Arc::new(MockMapService::new(DST_GS));
    dst_gs.seed_workspace("ws");
    dst_gs.seed_datastore("ws", "ds");

    let provider = Arc::new(MockServiceProvider::new());
    provider.add_catalog(src_gn);
    provider.add_catalog(Arc::clone(&dst_gn));
    provider.add_map_service(src_gs);
    provider.add_map_service(Arc::clone(&dst_gs));
    let env = Arc::new(CopyEnv::with_services(
        Arc::clone(&config),
        provider as Arc<dyn ServiceProvider>,
    ));

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlAuditSink::new(&dir.path().join("audit.jsonl")));
    let state = AppState::new(config, env, Some(Arc::clone(&sink) as Arc<dyn AuditSink>));
    let server = TestServer::start(state).unwrap();
    let client = HttpClient::new(&server.url, None, Duration::from_secs(5));
    Harness {
        server,
        client,
        sink,
        dst_gn,
        dst_gs,
        _dir: dir,
    }
}

fn json_of(resp: &HttpResponse) -> Value {
    serde_json::from_slice(&resp.body).unwrap()
}

fn copy_route(dst: &str, flags: &str) -> String {
    format!("/copy?src_name=Public&dst_name={dst}&metadataUuid={UUID}&{flags}")
}

#[test]
fn health_and_listings() {
    let h = start();
    assert!(h.server.port > 0);
    let resp = h.client.send(Method::Get, "/health", &[], None).unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(json_of(&resp), json!({"status": "ok"}));

    let resp = h.client.send(Method::Get, "/sources", &[], None).unwrap();
    assert_eq!(json_of(&resp), json!([{"name": "Public", "url": SRC_GN}]));
    let resp = h.client.send(Method::Get, "/destinations", &[], None).unwrap();
    assert_eq!(json_of(&resp)[0]["gs_url"], DST_GS);
}

#[test]
fn preview_then_copy() {
    let h = start();
    let resp = h
        .client
        .send(
            Method::Get,
            &format!(
                "/copy_preview?src_name=Public&dst_name=Staging&metadataUuid={UUID}\
                 &copy_meta=true&copy_layers=true&copy_styles=true"
            ),
            &[],
            None,
        )
        .unwrap();
    assert_eq!(resp.status, 200);
    let preview = json_of(&resp);
    assert_eq!(
        preview["geonetwork_resources"][0]["metadata"][0]["title"],
        "Stations de réparation et gonflage pour vélo"
    );
    assert_eq!(preview["geoserver_resources"][0]["layers"], json!(["ws:velo"]));
    assert!(h.dst_gs.writes().is_empty());

    let resp = h
        .client
        .send(
            Method::Put,
            &copy_route("Staging", "copy_meta=true&copy_layers=true&copy_styles=true"),
            &[("Accept", "application/json"), ("sec-firstname", "Ada"), ("sec-lastname", "Lovelace")],
            None,
        )
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));
    let records = json_of(&resp);
    let last = records.as_array().unwrap().last().unwrap();
    assert_eq!(last["message"], "Metadata creation successful");

    let uploaded = MetaDocument::from_package(h.dst_gn.uploads()[0].clone()).unwrap();
    assert!(uploaded
        .linked_layers()
        .iter()
        .all(|l| !l.server_url.starts_with(SRC_GS)));
    assert!(h.dst_gs.contains("/rest/layers/ws:velo.json"));

    let audit = h.sink.recent(10, 0).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].first_name, "Ada");
    assert_eq!(audit[0].status_code, 200);
    assert_eq!(audit[0].src_title, "Stations de réparation et gonflage pour vélo");
}

#[test]
fn copy_transcript_is_plain_text_by_default() {
    let h = start();
    let resp = h
        .client
        .send(Method::Put, &copy_route("Staging", "copy_styles=true"), &[], None)
        .unwrap();
    assert_eq!(resp.status, 200);
    let text = resp.text();
    assert!(text.lines().any(|l| l == "[Style] OK: Styles copied successfully"));
    assert!(h.dst_gn.uploads().is_empty());
}

#[test]
fn errors_carry_the_operation_log() {
    let h = start();
    let resp = h
        .client
        .send(
            Method::Put,
            &copy_route("Nowhere", "copy_layers=true"),
            &[("Accept", "application/json")],
            None,
        )
        .unwrap();
    assert_eq!(resp.status, 400);
    let body = json_of(&resp);
    assert_eq!(body["summary"], "Nowhere: geoserver not found in config");
    let operations = body["operations"].as_array().unwrap();
    assert!(operations
        .iter()
        .any(|op| op["url"] == format!("{SRC_GN}/records/{UUID}")));

    let logs = h
        .client
        .send(Method::Get, "/logs?size=5", &[("Accept", "application/json")], None)
        .unwrap();
    let logs = json_of(&logs);
    assert_eq!(logs[0]["status_code"], 400);
    assert_eq!(logs[0]["dst_name"], "Nowhere");
}

#[test]
fn search_is_forwarded_to_the_source_catalog() {
    let h = start();
    let resp = h
        .client
        .send(
            Method::Post,
            "/search/Public",
            &[("Content-Type", "application/json")],
            Some(br#"{"query":{"match_all":{}}}"#),
        )
        .unwrap();
    assert_eq!(resp.status, 200);
    assert!(json_of(&resp).is_object());

    let resp = h
        .client
        .send(Method::Post, "/search/Unknown", &[], Some(b"{}"))
        .unwrap();
    assert_eq!(resp.status, 400);
}
