#![allow(clippy::unwrap_used)]
// Integration tests for `BackendClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xds_agent_api::{
    BackendClient, Error, EventRegisterArgs, FolderConfig, FolderType, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, BackendClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let transport = TransportConfig {
        agent_sid: Some("agent-123".into()),
        ..TransportConfig::default()
    };
    let client = BackendClient::new(&base_url, &transport).unwrap();
    (server, client)
}

fn api_path(suffix: &str) -> String {
    format!("/api/v1{suffix}")
}

// ── Server info ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_config() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(api_path("/config")))
        .and(header("xds-agent-sid", "agent-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "srv-uid-1",
            "version": "1.2.0",
            "supportedSharing": { "PathMap": true, "CloudSync": true },
            "builder": { "ip": "10.0.0.2", "port": "8000", "syncThingID": "BUILDER-DEV" }
        })))
        .mount(&server)
        .await;

    let cfg = client.get_config().await.unwrap();
    assert_eq!(cfg.server_uid, "srv-uid-1");
    assert_eq!(cfg.builder.sync_thing_id, "BUILDER-DEV");
    assert!(cfg.supports(FolderType::CloudSync));
}

#[tokio::test]
async fn test_get_version() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(api_path("/version")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "srv-uid-1", "version": "1.2.0", "apiVersion": "1", "gitTag": "v1.2.0"
        })))
        .mount(&server)
        .await;

    let version = client.get_version().await.unwrap();
    assert_eq!(version.git_tag, "v1.2.0");
}

// ── Folders ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_folder_add_returns_backend_id() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(api_path("/folders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "f-1", "label": "demo", "path": "/tmp/demo", "type": "PathMap",
            "status": "Enable", "isInSync": true,
            "dataPathMap": { "serverPath": "/srv/demo" }
        })))
        .mount(&server)
        .await;

    let request = FolderConfig {
        label: "demo".into(),
        client_path: "/tmp/demo".into(),
        ..FolderConfig::default()
    };
    let folder = client.folder_add(&request).await.unwrap();
    assert_eq!(folder.id, "f-1");
    assert_eq!(folder.data_path_map.server_path, "/srv/demo");
}

#[tokio::test]
async fn test_folder_delete_and_sync_paths() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path(api_path("/folders/f-9")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "f-9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/folders/sync/f-9")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.folder_delete("f-9").await.unwrap().id, "f-9");
    client.folder_sync("f-9").await.unwrap();
}

#[tokio::test]
async fn test_api_error_carries_status_and_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(api_path("/folders")))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let err = client.get_folders().await.unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "disk full");
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(api_path("/folders")))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = client.get_folders().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }), "got: {err:?}");
}

// ── Events / commands ───────────────────────────────────────────────

#[tokio::test]
async fn test_event_register_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(api_path("/events/register")))
        .and(body_json(json!({
            "name": "event:folder-state-change",
            "filterProjectID": "f-1"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .event_register(&EventRegisterArgs {
            name: "event:folder-state-change".into(),
            project_id: "f-1".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_command_adds_leading_slash() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(api_path("/sdks/install")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let res: serde_json::Value = client
        .send_command("sdks/install", &json!({"id": "sdk-1"}))
        .await
        .unwrap();
    assert_eq!(res, json!({"ok": true}));
}

#[tokio::test]
async fn test_raw_post_relays_body_verbatim() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(api_path("/sdks")))
        .and(body_json(json!({"name": "x"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"answer":1}"#))
        .mount(&server)
        .await;

    let body = client
        .raw_post("/sdks", bytes::Bytes::from_static(br#"{"name":"x"}"#))
        .await
        .unwrap();
    assert_eq!(&body[..], br#"{"answer":1}"#);
}

#[tokio::test]
async fn test_connection_refused_is_detected() {
    // Bind then drop a listener to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let base = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    let client = BackendClient::new(&base, &TransportConfig::default()).unwrap();

    let err = client.get_version().await.unwrap_err();
    assert!(err.is_connection_refused(), "got: {err:?}");
}
