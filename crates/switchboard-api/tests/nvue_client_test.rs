// Integration tests for `NvueClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{basic_auth, body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard_api::nvue::RevisionState;
use switchboard_api::{Error, NvueClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, NvueClient) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/nvue_v1/", server.uri())).unwrap();
    let client = NvueClient::with_client(
        reqwest::Client::new(),
        base,
        "cumulus",
        secrecy::SecretString::from("pw".to_owned()),
    );
    (server, client)
}

// ── Revision flow ───────────────────────────────────────────────────

#[tokio::test]
async fn test_create_revision_returns_first_key() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/nvue_v1/revision"))
        .and(basic_auth("cumulus", "pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changeset/cumulus/2024-01-01_00.00.00_AB12": { "state": "pending" }
        })))
        .mount(&server)
        .await;

    let rev = client.create_revision().await.unwrap();
    assert_eq!(rev, "changeset/cumulus/2024-01-01_00.00.00_AB12");
}

#[tokio::test]
async fn test_empty_revision_response_is_an_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/nvue_v1/revision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let err = client.create_revision().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}

#[tokio::test]
async fn test_patch_carries_revision_query() {
    let (server, client) = setup().await;

    let payload = json!({ "vlan": { "300": {} } });
    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .and(query_param("rev", "changeset/cumulus/1"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .patch("changeset/cumulus/1", "/bridge/domain/br_default", &payload)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apply_and_poll_state() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/revision/changeset%2Fcumulus%2F1"))
        .and(body_json(json!({ "state": "apply", "auto-prompt": { "ays": "ays_yes" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/changeset%2Fcumulus%2F1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "applied" })))
        .mount(&server)
        .await;

    client.apply_revision("changeset/cumulus/1").await.unwrap();
    let state = client.revision_state("changeset/cumulus/1").await.unwrap();
    assert_eq!(state, RevisionState::Applied);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/r1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.revision_state("r1").await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
}
