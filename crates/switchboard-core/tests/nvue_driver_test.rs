// Integration tests for the revision REST driver against a wiremock switch.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard_api::{NvueClient, TransportConfig};
use switchboard_core::driver::LockScope;
use switchboard_core::driver::NvueDriver;
use switchboard_core::driver::nvue::PollPolicy;
use switchboard_core::{
    AddNetwork, CoreError, DeleteNetwork, DeviceKind, NetworkSegment, NvueSettings,
    Operation, OperationLock, PlugPort, RetryPolicy, SegmentationId, Supervisor, SwitchConfig,
    SwitchDriver, UnplugPort,
};

const PORT_PATH: &str = "/nvue_v1/interface/swp3/bridge/domain/br_default";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(attempts: u32) -> (MockServer, NvueDriver) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/nvue_v1/", server.uri())).unwrap();
    let password = SecretString::from("pw".to_owned());
    let switch = SwitchConfig {
        name: "leaf1".into(),
        address: "10.0.1.1".into(),
        mac_address: None,
        max_connections: 1,
        physical_networks: vec![],
        manage_vlans: true,
        session_timeout: Duration::from_secs(5),
        device: DeviceKind::Nvue(NvueSettings {
            base_url: base.clone(),
            username: "cumulus".into(),
            password: password.clone(),
            transport: TransportConfig::default(),
            bridge_domain: "br_default".into(),
            poll_attempts: attempts,
            poll_interval: Duration::from_millis(5),
        }),
    };
    let client = NvueClient::new(base, "cumulus", password, &TransportConfig::default()).unwrap();
    let lock = LockScope::new(Arc::new(OperationLock::disabled()), "10.0.1.1", 1);
    let poll = PollPolicy {
        attempts,
        interval: Duration::from_millis(5),
    };
    let driver = NvueDriver::new(&switch, client, "br_default", poll, lock);
    (server, driver)
}

fn seg(v: u16) -> SegmentationId {
    SegmentationId::new(v).unwrap()
}

/// Mount revision creation and apply for `rev1`.
async fn revision(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/nvue_v1/revision"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "rev1": { "state": "pending" } })),
        )
        .expect(expected)
        .mount(server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/revision/rev1"))
        .and(body_json(json!({ "state": "apply", "auto-prompt": { "ays": "ays_yes" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected)
        .mount(server)
        .await;
}

async fn revision_state(server: &MockServer, state: &str) {
    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/rev1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": state })))
        .mount(server)
        .await;
}

async fn access_vlan(server: &MockServer, vlan: u16) {
    Mock::given(method("GET"))
        .and(path(PORT_PATH))
        .and(query_param("rev", "applied"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": vlan })))
        .mount(server)
        .await;
}

// ── Networks ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_network_waits_for_applied_revision() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .and(query_param("rev", "rev1"))
        .and(body_json(json!({ "vlan": { "200": {} } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/rev1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "applying" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    revision_state(&server, "applied").await;

    let op = AddNetwork::new(NetworkSegment::new(seg(200), Uuid::new_v4()));
    driver.add_network(&op).await.unwrap();
}

#[tokio::test]
async fn test_delete_network_stages_null_merge_patch() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;
    revision_state(&server, "applied").await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .and(body_json(json!({ "vlan": { "200": null } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let segment = NetworkSegment::new(seg(200), Uuid::new_v4());
    driver
        .delete_network(&DeleteNetwork { segment })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_revision_is_a_device_error() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;
    revision_state(&server, "apply_fail").await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let op = AddNetwork::new(NetworkSegment::new(seg(200), Uuid::new_v4()));
    let err = driver.add_network(&op).await.unwrap_err();
    assert!(matches!(err, CoreError::Device { .. }), "{err:?}");
    assert!(err.to_string().contains("apply_fail"), "{err}");
    assert!(!err.is_unknown_outcome());
}

#[tokio::test]
async fn test_poll_budget_exhaustion_is_unknown_outcome() {
    let (server, driver) = setup(3).await;
    revision(&server, 1).await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/rev1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "applying" })))
        .expect(3)
        .mount(&server)
        .await;

    let op = AddNetwork::new(NetworkSegment::new(seg(200), Uuid::new_v4()));
    let err = driver.add_network(&op).await.unwrap_err();
    assert!(
        matches!(err, CoreError::RevisionApplyTimeout { attempts: 3, .. }),
        "{err:?}"
    );
    assert!(err.is_unknown_outcome());
}

#[tokio::test]
async fn test_unreadable_state_after_apply_is_never_retried() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;

    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nvue_v1/revision/rev1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
        .expect(1)
        .mount(&server)
        .await;

    let supervisor = Supervisor::new(RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(5),
    });
    let op = AddNetwork::new(NetworkSegment::new(seg(200), Uuid::new_v4()));
    let err = supervisor
        .run("leaf1", Operation::AddNetwork, "vlan 200", || driver.add_network(&op))
        .await
        .unwrap_err();
    assert!(err.is_unknown_outcome(), "{err:?}");
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("rev1"), "{err}");
}

#[tokio::test]
async fn test_rejected_staging_stays_retryable() {
    let (server, driver) = setup(5).await;
    Mock::given(method("POST"))
        .and(path("/nvue_v1/revision"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "rev1": { "state": "pending" } })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/bridge/domain/br_default"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/nvue_v1/revision/rev1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let op = AddNetwork::new(NetworkSegment::new(seg(200), Uuid::new_v4()));
    let err = driver.add_network(&op).await.unwrap_err();
    assert!(!err.is_unknown_outcome(), "{err:?}");
    assert!(err.is_retryable(), "{err:?}");
}

// ── Ports ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plug_sets_access_vlan() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;
    revision_state(&server, "applied").await;

    // No applied config for the port yet: the read answers 404.
    Mock::given(method("PATCH"))
        .and(path(PORT_PATH))
        .and(query_param("rev", "rev1"))
        .and(body_json(json!({ "access": 200 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    driver
        .plug_port(&PlugPort {
            port: "swp3".into(),
            segmentation_id: seg(200),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_plug_already_on_segment_skips_revision() {
    let (server, driver) = setup(5).await;
    revision(&server, 0).await;
    access_vlan(&server, 200).await;

    driver
        .plug_port(&PlugPort {
            port: "swp3".into(),
            segmentation_id: seg(200),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unplug_other_segment_skips_revision() {
    let (server, driver) = setup(5).await;
    revision(&server, 0).await;
    access_vlan(&server, 100).await;

    driver
        .unplug_port(&UnplugPort {
            port: "swp3".into(),
            segmentation_id: seg(200),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unplug_clears_access_vlan() {
    let (server, driver) = setup(5).await;
    revision(&server, 1).await;
    revision_state(&server, "applied").await;
    access_vlan(&server, 200).await;

    Mock::given(method("PATCH"))
        .and(path(PORT_PATH))
        .and(body_json(json!({ "access": null })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    driver
        .unplug_port(&UnplugPort {
            port: "swp3".into(),
            segmentation_id: seg(200),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_port_state_reports_access_vlan() {
    let (server, driver) = setup(5).await;
    access_vlan(&server, 100).await;

    let state = driver.query_port_state("swp3").await.unwrap();
    assert_eq!(state.access_vlan, Some(100));
    assert!(state.raw.unwrap().contains("access"));
}
