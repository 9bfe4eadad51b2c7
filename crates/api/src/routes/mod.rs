use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use solarlink_domain::reading::{now_epoch_secs, CachedSnapshot, SolarReading, StructuredReading};
use tracing::warn;

use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/system-info", get(system_info))
        .route("/api/critical-data", get(critical_data))
        .route("/api/solar-current", get(solar_current))
        .route("/api/complete-data", get(complete_data))
        // Pre-rename path kept for dashboards that still poll it.
        .route("/api/data", get(complete_data))
        .route("/metrics", get(metrics))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .with_state(state)
}

#[derive(Serialize)]
struct Envelope<T> {
    status: &'static str,
    timestamp: f64,
    data_timestamp: f64,
    freshness: &'static str,
    data: T,
}

impl<T: Serialize> Envelope<T> {
    fn success(snapshot_timestamp: f64, freshness: &'static str, data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            timestamp: now_epoch_secs(),
            data_timestamp: snapshot_timestamp,
            freshness,
            data,
        })
    }
}

/// Shared front half of every data endpoint: refresh-on-demand, then a 503
/// only when there is nothing at all to serve.
async fn serve_snapshot(
    state: &AppState,
    endpoint: &'static str,
) -> Result<(CachedSnapshot, &'static str), ApiError> {
    let result = state.snapshots.fresh().await?;
    let freshness = result.freshness.as_str();
    observability::register_snapshot_served(endpoint, freshness);
    let snapshot = result.snapshot.ok_or(ApiError::NoData)?;
    Ok((snapshot, freshness))
}

#[derive(Serialize)]
struct CriticalData {
    battery_soc: u16,
    battery_power: i32,
    battery_status: String,
    grid_power: i32,
    grid_feeding_in: bool,
    on_grid: bool,
    load_power: u16,
    inverter_status: String,
    total_ac_power: i32,
}

async fn critical_data(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (snapshot, freshness) = serve_snapshot(&state, "critical_data").await?;
    let data = CriticalData {
        battery_soc: snapshot.data.battery.percentage,
        battery_power: snapshot.data.battery.power,
        battery_status: snapshot.data.battery.status.label(),
        grid_power: snapshot.data.grid.power,
        grid_feeding_in: snapshot.data.grid.feeding_in,
        on_grid: snapshot.data.grid.on_grid,
        load_power: snapshot.data.load_power,
        inverter_status: snapshot.data.inverter.status.label(),
        total_ac_power: snapshot.data.inverter.total_ac_power,
    };
    Ok(Envelope::success(snapshot.timestamp, freshness, data).into_response())
}

#[derive(Serialize)]
struct SolarCurrent {
    solar: SolarReading,
    daily_production_kwh: f64,
}

async fn solar_current(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (snapshot, freshness) = serve_snapshot(&state, "solar_current").await?;
    let data = SolarCurrent {
        solar: snapshot.data.solar.clone(),
        daily_production_kwh: snapshot.data.daily.production_kwh,
    };
    Ok(Envelope::success(snapshot.timestamp, freshness, data).into_response())
}

async fn complete_data(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (snapshot, freshness) = serve_snapshot(&state, "complete_data").await?;
    let data: StructuredReading = snapshot.data.clone();
    Ok(Envelope::success(snapshot.timestamp, freshness, data).into_response())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: f64,
    store_connected: bool,
    snapshot_cached: bool,
    snapshot_age_seconds: Option<f64>,
}

/// Liveness plus cache visibility. Always 200; a down store is reported in
/// the body so probes distinguish "degraded" from "dead".
async fn health(State(state): State<AppState>) -> Json<Health> {
    let now = now_epoch_secs();
    let (store_connected, snapshot) = match state.snapshots.latest().await {
        Ok(snapshot) => (true, snapshot),
        Err(err) => {
            warn!(error = %err, "health check could not reach the store");
            (false, None)
        }
    };
    let snapshot_age_seconds = snapshot.as_ref().map(|s| now - s.timestamp);
    Json(Health {
        status: if store_connected { "ok" } else { "degraded" },
        timestamp: now,
        store_connected,
        snapshot_cached: snapshot.is_some(),
        snapshot_age_seconds,
    })
}

#[derive(Serialize)]
struct SystemInfo {
    status: &'static str,
    timestamp: f64,
    service: &'static str,
    version: &'static str,
    inverter_host: String,
    inverter_port: u16,
    modbus_slave_id: u8,
    active_interval_secs: u64,
    idle_interval_secs: u64,
}

async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        status: "success",
        timestamp: now_epoch_secs(),
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        inverter_host: state.config.inverter_host.clone(),
        inverter_port: state.config.inverter_port,
        modbus_slave_id: state.config.modbus_slave_id,
        active_interval_secs: state.config.active_interval_secs,
        idle_interval_secs: state.config.idle_interval_secs,
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => body.into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
