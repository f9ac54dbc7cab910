use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sensornode_common::{
    boot::{BootJournal, FailsafeReason},
    config::FIRMWARE_VERSION,
    led::StatusOverride,
    types::Diagnostics,
    LedStrip, NodeConfig,
};

use crate::{
    journal::BootManager,
    leds::LedOutput,
    ota as image,
    platform::{self, DataDir},
    runtime::ExitMode,
    store::ConfigStore,
};

#[derive(Clone)]
struct FailsafeState {
    store: ConfigStore,
    boot: Arc<BootManager>,
    dir: DataDir,
    diagnostics: Arc<Diagnostics>,
    reboot: Arc<AtomicBool>,
}

#[derive(Debug, Serialize)]
struct ActionResult {
    status: &'static str,
}

/// Recovery listens on its own default so it is not mistaken for the
/// normal-mode portal on 8080.
const RECOVERY_PORT_DEFAULT: u16 = 8081;

fn recovery_port() -> u16 {
    std::env::var("SENSORNODE_RECOVERY_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(RECOVERY_PORT_DEFAULT)
}

/// Minimal recovery controller: no radio scanning, no broker, no updates.
/// Just enough surface to inspect the failure and repair the device, plus a
/// red blink so the mode is obvious from across the room.
///
/// On hardware this also brings up the `<name>-FAILSAFE` access point so the
/// surface stays reachable when the configured networks are the problem.
pub async fn run(
    config: &NodeConfig,
    device_id: String,
    dir: DataDir,
    store: ConfigStore,
    boot: BootManager,
    journal: &BootJournal,
    reason: FailsafeReason,
    mut led_out: Box<dyn LedOutput>,
) -> anyhow::Result<ExitMode> {
    let recovery_ssid = format!("{}-FAILSAFE", config.device.name);
    info!(ssid = %recovery_ssid, "recovery mode active");

    let diagnostics = Diagnostics {
        device_id: device_id.clone(),
        firmware_version: FIRMWARE_VERSION.to_string(),
        reason: reason.as_str().to_string(),
        recovery_ssid,
        flagged_at: Utc::now().timestamp(),
        reset_cause: platform::reset_cause(),
        free_memory: platform::free_memory_bytes(),
        boot_attempts: journal.attempt_count,
    };

    let reboot = Arc::new(AtomicBool::new(false));
    let state = FailsafeState {
        store,
        boot: Arc::new(boot),
        dir,
        diagnostics: Arc::new(diagnostics),
        reboot: reboot.clone(),
    };

    // Visual heartbeat while the server runs.
    let led_count = config.led.count as usize;
    let mut strip = LedStrip::from_config(&config.led);
    strip.set_status(Some(StatusOverride::Failsafe));
    let blinker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            let frame = strip.render(led_count);
            led_out.write(&frame);
        }
    });

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/api/diagnostics", get(handle_diagnostics))
        .route("/api/boot/reset", post(handle_boot_reset))
        .route("/api/config/clear", post(handle_config_clear))
        .route("/api/firmware/rollback", post(handle_firmware_rollback))
        .route("/api/reboot", post(handle_reboot))
        .with_state(state);

    let port = recovery_port();
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid recovery address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind recovery server at {addr}"))?;
    info!("recovery server listening on http://{addr}");

    let shutdown_flag = reboot.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if shutdown_flag.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        })
        .await?;

    blinker.abort();
    if reboot.load(Ordering::Relaxed) {
        Ok(ExitMode::Reboot)
    } else {
        Ok(ExitMode::Shutdown)
    }
}

async fn handle_index(State(state): State<FailsafeState>) -> Html<String> {
    let d = &state.diagnostics;
    Html(format!(
        r#"<!doctype html>
<html><head><title>Recovery</title></head><body>
<h1>Recovery mode</h1>
<p>Device <code>{}</code> entered recovery: <strong>{}</strong> after {} boot attempt(s).</p>
<ul>
<li><form method="post" action="/api/boot/reset"><button>Reset boot counter</button></form></li>
<li><form method="post" action="/api/config/clear"><button>Clear configuration</button></form></li>
<li><form method="post" action="/api/firmware/rollback"><button>Roll back firmware</button></form></li>
<li><form method="post" action="/api/reboot"><button>Reboot</button></form></li>
</ul>
<p>Diagnostics: <a href="/api/diagnostics">/api/diagnostics</a></p>
</body></html>"#,
        d.device_id, d.reason, d.boot_attempts
    ))
}

async fn handle_diagnostics(State(state): State<FailsafeState>) -> impl IntoResponse {
    Json(state.diagnostics.as_ref().clone())
}

/// Forget the boot loop, then reboot so the next start is a clean window.
async fn handle_boot_reset(State(state): State<FailsafeState>) -> impl IntoResponse {
    match state.boot.reset(Utc::now().timestamp()) {
        Ok(_) => {
            info!("boot counter reset, rebooting");
            state.reboot.store(true, Ordering::Relaxed);
            Json(ActionResult {
                status: "rebooting",
            })
            .into_response()
        }
        Err(err) => {
            warn!("boot reset failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "boot reset failed").into_response()
        }
    }
}

/// Drop both stored configuration copies, then reboot onto defaults.
async fn handle_config_clear(State(state): State<FailsafeState>) -> impl IntoResponse {
    match state.store.clear() {
        Ok(()) => {
            info!("stored configuration cleared, rebooting");
            state.reboot.store(true, Ordering::Relaxed);
            Json(ActionResult {
                status: "rebooting",
            })
            .into_response()
        }
        Err(err) => {
            warn!("config clear failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "config clear failed").into_response()
        }
    }
}

async fn handle_firmware_rollback(State(state): State<FailsafeState>) -> impl IntoResponse {
    match image::rollback(&state.dir) {
        Ok(true) => Json(ActionResult { status: "rolled_back" }).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "no backup image").into_response(),
        Err(err) => {
            warn!("rollback failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "rollback failed").into_response()
        }
    }
}

async fn handle_reboot(State(state): State<FailsafeState>) -> impl IntoResponse {
    info!("reboot requested from recovery surface");
    state.reboot.store(true, Ordering::Relaxed);
    Json(ActionResult { status: "rebooting" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sensornode_common::{boot::BootDecision, config::SystemConfig};
    use tempfile::TempDir;

    fn recovery_state() -> (TempDir, FailsafeState) {
        let tmp = TempDir::new().unwrap();
        let dir = DataDir::at(tmp.path());
        let store = ConfigStore::new(dir.clone());
        let boot = BootManager::new(dir.clone(), &SystemConfig::default());
        let diagnostics = Diagnostics {
            device_id: "testnode".to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            reason: "boot_loop".to_string(),
            recovery_ssid: "sensornode-FAILSAFE".to_string(),
            flagged_at: 0,
            reset_cause: "power_on".to_string(),
            free_memory: 0,
            boot_attempts: 3,
        };
        let state = FailsafeState {
            store,
            boot: Arc::new(boot),
            dir,
            diagnostics: Arc::new(diagnostics),
            reboot: Arc::new(AtomicBool::new(false)),
        };
        (tmp, state)
    }

    #[tokio::test]
    async fn boot_reset_persists_then_reboots() {
        let (_tmp, state) = recovery_state();
        for t in [0, 1, 2] {
            state.boot.register_boot(t).unwrap();
        }

        let _ = handle_boot_reset(State(state.clone())).await;

        assert!(state.reboot.load(Ordering::Relaxed));
        let (decision, journal) = state.boot.register_boot(10).unwrap();
        assert_eq!(decision, BootDecision::Normal);
        assert_eq!(journal.attempt_count, 1);
    }

    #[tokio::test]
    async fn config_clear_removes_both_copies_then_reboots() {
        let (tmp, state) = recovery_state();
        state.store.save(&NodeConfig::default()).unwrap();
        state.store.save(&NodeConfig::default()).unwrap();

        let _ = handle_config_clear(State(state.clone())).await;

        assert!(state.reboot.load(Ordering::Relaxed));
        assert!(!tmp.path().join("config.json").exists());
        assert!(!tmp.path().join("config.json.bak").exists());
    }

    #[test]
    fn recovery_port_default_differs_from_the_portal() {
        std::env::remove_var("SENSORNODE_RECOVERY_PORT");
        assert_eq!(recovery_port(), 8081);
    }
}
