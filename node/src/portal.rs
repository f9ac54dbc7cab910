use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sensornode_common::config::{FIRMWARE_NAME, FIRMWARE_VERSION};

use crate::{
    journal::BootManager,
    runtime::ControlFlags,
    store::{ConfigStore, StoreError},
};

#[derive(Clone)]
pub struct PortalState {
    pub store: ConfigStore,
    pub boot: Arc<BootManager>,
    pub flags: ControlFlags,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    firmware: &'static str,
    version: &'static str,
    device_id: String,
}

/// Thin local configuration surface. It shares the store with the tick loop
/// and signals changes through flags; it never touches runtime state
/// directly.
pub async fn serve(state: PortalState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/restart", post(handle_restart))
        .route("/api/recovery", post(handle_recovery))
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid portal address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind config portal at {addr}"))?;

    info!("config portal listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_health(State(state): State<PortalState>) -> impl IntoResponse {
    Json(HealthBody {
        status: "ok",
        firmware: FIRMWARE_NAME,
        version: FIRMWARE_VERSION,
        device_id: state.device_id.clone(),
    })
}

async fn handle_get_config(State(state): State<PortalState>) -> impl IntoResponse {
    let config = state.store.load();
    match serde_json::to_value(&config) {
        Ok(mut value) => {
            redact_secrets(&mut value);
            Json(value).into_response()
        }
        Err(err) => {
            warn!("config serialization failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
        }
    }
}

async fn handle_put_config(
    State(state): State<PortalState>,
    Json(patch): Json<Value>,
) -> impl IntoResponse {
    match state.store.update(&patch) {
        Ok(merged) => {
            state
                .flags
                .config_dirty
                .store(true, std::sync::atomic::Ordering::Relaxed);
            info!("configuration updated over http");
            match serde_json::to_value(&merged) {
                Ok(mut value) => {
                    redact_secrets(&mut value);
                    Json(value).into_response()
                }
                Err(err) => {
                    warn!("config serialization failed: {err}");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
                }
            }
        }
        Err(StoreError::Busy) => {
            error_response(StatusCode::CONFLICT, "another update is in progress")
        }
        Err(StoreError::Invalid(err)) => {
            error_response(StatusCode::BAD_REQUEST, &format!("invalid config: {err}"))
        }
        Err(err) => {
            warn!("config update failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "update failed")
        }
    }
}

async fn handle_restart(State(state): State<PortalState>) -> impl IntoResponse {
    info!("restart requested over http");
    state
        .flags
        .reboot
        .store(true, std::sync::atomic::Ordering::Relaxed);
    Json(serde_json::json!({"status": "rebooting"}))
}

/// Flag the next boot into recovery mode, then reboot.
async fn handle_recovery(State(state): State<PortalState>) -> impl IntoResponse {
    if let Err(err) = state.boot.request_failsafe() {
        warn!("failed to write recovery marker: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "could not flag recovery");
    }
    state
        .flags
        .reboot
        .store(true, std::sync::atomic::Ordering::Relaxed);
    Json(serde_json::json!({"status": "rebooting_into_recovery"})).into_response()
}

/// Blank out credentials before a config document leaves the device.
fn redact_secrets(config: &mut Value) {
    if let Some(profiles) = config
        .pointer_mut("/wifi/profiles")
        .and_then(Value::as_array_mut)
    {
        for profile in profiles {
            if let Some(password) = profile.get_mut("password") {
                mask(password);
            }
        }
    }
    if let Some(password) = config.pointer_mut("/mqtt/password") {
        mask(password);
    }
}

fn mask(value: &mut Value) {
    let set = value.as_str().map(|s| !s.is_empty()).unwrap_or(false);
    *value = Value::String(if set { "********".to_string() } else { String::new() });
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn secrets_are_masked_but_presence_is_visible() {
        let mut config = json!({
            "wifi": {"profiles": [
                {"ssid": "main", "password": "hunter2", "priority": 1},
                {"ssid": "open", "password": "", "priority": 2},
            ]},
            "mqtt": {"broker": "10.0.0.2", "password": "secret"},
        });

        redact_secrets(&mut config);

        assert_eq!(config["wifi"]["profiles"][0]["password"], "********");
        assert_eq!(config["wifi"]["profiles"][0]["ssid"], "main");
        assert_eq!(config["wifi"]["profiles"][1]["password"], "");
        assert_eq!(config["mqtt"]["password"], "********");
        assert_eq!(config["mqtt"]["broker"], "10.0.0.2");
    }
}
