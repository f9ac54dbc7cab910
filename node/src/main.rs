mod failsafe;
mod journal;
mod leds;
mod mqtt;
mod ota;
mod platform;
mod portal;
mod runtime;
mod sensor;
mod store;
mod wifi;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use sensornode_common::boot::BootDecision;

use crate::{
    journal::BootManager,
    leds::HostLedOutput,
    platform::DataDir,
    runtime::{ControlFlags, ExitMode},
    sensor::HostSensor,
    store::ConfigStore,
    wifi::HostLink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = DataDir::from_env();
    let store = ConfigStore::new(dir.clone());
    let config = store.load();
    let device_id = platform::device_id();

    // Boot accounting happens before anything touches the network; the
    // decision below is already durable if we crash from here on.
    let boot = BootManager::new(dir.clone(), &config.system);
    let (decision, journal) = boot.register_boot(Utc::now().timestamp())?;

    let exit = match decision {
        BootDecision::Normal => {
            let flags = ControlFlags::new();

            let portal_state = portal::PortalState {
                store: store.clone(),
                boot: Arc::new(boot.clone()),
                flags: flags.clone(),
                device_id: device_id.clone(),
            };
            let port = std::env::var("SENSORNODE_HTTP_PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(8080);
            tokio::spawn(async move {
                if let Err(err) = portal::serve(portal_state, port).await {
                    warn!("config portal stopped: {err:#}");
                }
            });

            let ctx = runtime::NodeCtx::new(
                config.clone(),
                device_id,
                dir,
                store,
                boot,
                journal,
                Box::new(HostLink::from_env()),
                Box::new(HostSensor::new()),
                Box::new(HostLedOutput::new()),
                flags,
            );
            let scheduler = runtime::build_scheduler(&config);
            runtime::run(ctx, scheduler).await?
        }
        BootDecision::Failsafe(reason) => {
            failsafe::run(
                &config,
                device_id,
                dir,
                store,
                boot,
                &journal,
                reason,
                Box::new(HostLedOutput::new()),
            )
            .await?
        }
    };

    match exit {
        ExitMode::Shutdown => {
            info!("shutdown complete");
            Ok(())
        }
        ExitMode::Reboot => {
            info!("exiting for reboot");
            std::process::exit(platform::REBOOT_EXIT_CODE);
        }
    }
}
