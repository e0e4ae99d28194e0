//! Status API over a finished preset run.
#![cfg(feature = "api")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use flownet_sim::api::{AppState, router};
use flownet_sim::config::ScenarioConfig;
use flownet_sim::observation::MemoryPublisher;
use flownet_sim::simulation::Simulation;
use tower::util::ServiceExt;

fn finished_state() -> Arc<AppState> {
    let config = ScenarioConfig::district_heating();
    let sim = Simulation::from_config(&config, Arc::new(MemoryPublisher::new()), None).unwrap();
    let state = Arc::new(AppState {
        status: Arc::clone(sim.status()),
        networks: sim.networks().to_vec(),
    });
    sim.run().unwrap();
    state
}

async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn status_follows_the_shared_run_status() {
    let (code, json) = get_json(finished_state(), "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(json["state"], "finished");
    assert_eq!(json["progress"], 1.0);
    assert_eq!(json["code"], 0);
    assert!(json["step"].is_null());
}

#[tokio::test]
async fn networks_list_identity_and_ranks() {
    let (code, json) = get_json(finished_state(), "/networks").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(json["ranks"], 2);
    let networks = json["networks"].as_array().cloned().unwrap_or_default();
    let heat = networks.iter().find(|n| n["carrier"] == "heat").unwrap();
    assert_eq!(heat["has_transport"], true);
    assert_eq!(heat["rank"], 0);
}
