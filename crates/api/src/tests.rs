use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use solarlink_domain::decode::{self, REG_BATTERY_SOC, REG_LOAD_POWER, REG_PV1_POWER};
use solarlink_domain::memory::InMemoryTelemetryStore;
use solarlink_domain::ports::store::TelemetryStore;
use solarlink_domain::reading::{now_epoch_secs, CachedSnapshot, RawSnapshot};
use solarlink_infra::config::AppConfig;
use tower::ServiceExt;

use crate::routes;
use crate::state::AppState;

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        redis_key_prefix: "solarlink-test".to_string(),
        inverter_host: "192.0.2.10".to_string(),
        inverter_port: 8899,
        inverter_serial: 2_712_345_678,
        modbus_slave_id: 1,
        socket_timeout_secs: 8,
        register_retry_limit: 3,
        register_retry_delay_ms: 500,
        register_read_spacing_ms: 100,
        active_interval_secs: 3,
        idle_interval_secs: 300,
        activity_timeout_secs: 120,
        freshness_margin_secs: 2,
        activity_margin_secs: 60,
        lock_ttl_secs: 20,
        force_poll_ttl_secs: 10,
        wait_timeout_secs: 15,
        wait_granularity_ms: 200,
        backoff_initial_secs: 5,
        backoff_factor: 2.0,
        backoff_max_secs: 120,
    }
}

fn test_app() -> (InMemoryTelemetryStore, axum::Router) {
    let store = InMemoryTelemetryStore::new();
    let state = AppState::with_store(test_config(), Arc::new(store.clone()));
    (store, routes::router(state))
}

fn snapshot_from_registers(pairs: &[(u16, u16)], age_secs: f64) -> CachedSnapshot {
    let raw = RawSnapshot::new(pairs.iter().copied().collect::<HashMap<_, _>>());
    CachedSnapshot {
        data: decode::decode(&raw),
        timestamp: now_epoch_secs() - age_secs,
    }
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn health_reports_an_empty_cache() {
    let (_store, app) = test_app();
    let (status, body) = get_json(app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store_connected"], true);
    assert_eq!(body["snapshot_cached"], false);
    assert!(body["snapshot_age_seconds"].is_null());
}

#[tokio::test]
async fn critical_data_serves_a_fresh_snapshot() {
    let (store, app) = test_app();
    store
        .put_snapshot(&snapshot_from_registers(
            &[(REG_BATTERY_SOC, 77), (REG_LOAD_POWER, 640)],
            1.0,
        ))
        .await
        .unwrap();

    let (status, body) = get_json(app, "/api/critical-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["freshness"], "fresh");
    assert_eq!(body["data"]["battery_soc"], 77);
    assert_eq!(body["data"]["load_power"], 640);
    // Serving data counts as reader activity for the poll cadence.
    assert!(store.last_activity().await.unwrap().is_some());
}

#[tokio::test]
async fn borderline_stale_snapshot_is_flagged_but_served() {
    let (store, app) = test_app();
    store
        .put_snapshot(&snapshot_from_registers(&[(REG_BATTERY_SOC, 50)], 30.0))
        .await
        .unwrap();

    let (status, body) = get_json(app, "/api/critical-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["freshness"], "stale");
    assert_eq!(body["data"]["battery_soc"], 50);
}

#[tokio::test(start_paused = true)]
async fn complete_data_without_telemetry_is_unavailable() {
    let (_store, app) = test_app();
    let (status, body) = get_json(app, "/api/complete-data").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("no telemetry"));
}

#[tokio::test]
async fn legacy_data_path_matches_complete_data() {
    let (store, app) = test_app();
    store
        .put_snapshot(&snapshot_from_registers(&[(REG_PV1_POWER, 1_850)], 1.0))
        .await
        .unwrap();

    let (status, legacy) = get_json(app.clone(), "/api/data").await;
    assert_eq!(status, StatusCode::OK);
    let (_, complete) = get_json(app, "/api/complete-data").await;
    assert_eq!(legacy["data"], complete["data"]);
    assert_eq!(legacy["data"]["solar"]["pv1_power"], 1_850);
}

#[tokio::test]
async fn solar_current_reports_string_totals() {
    let (store, app) = test_app();
    store
        .put_snapshot(&snapshot_from_registers(&[(REG_PV1_POWER, 1_200)], 1.0))
        .await
        .unwrap();

    let (status, body) = get_json(app, "/api/solar-current").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["solar"]["total_power"], 1_200);
    assert!(body["data"]["daily_production_kwh"].is_number());
}

#[tokio::test]
async fn system_info_exposes_the_configured_inverter() {
    let (_store, app) = test_app();
    let (status, body) = get_json(app, "/api/system-info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inverter_host"], "192.0.2.10");
    assert_eq!(body["inverter_port"], 8899);
    assert_eq!(body["active_interval_secs"], 3);
}
