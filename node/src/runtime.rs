use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sensornode_common::{
    boot::BootJournal,
    config::FIRMWARE_NAME,
    discovery::{discovery_messages, DeviceInfo},
    led::StatusOverride,
    link::LinkAction,
    ota::OtaError,
    scheduler::TaskResult,
    session::{classify, Inbound, SessionAction},
    types::{CommandAction, CommandMessage, CommandResponse, StatePayload},
    ConnectivityEngine, LedCommand, LedStrip, NodeConfig, OtaEngine, OtaRequest, RetryBackoff,
    Scheduler, SessionEngine, Topics,
};

use crate::{
    journal::BootManager,
    leds::LedOutput,
    mqtt::MqttTransport,
    ota::{self as image, DownloadEvent, DownloadHandle},
    platform::{self, DataDir, Watchdog},
    sensor::{calibrated, is_significant_change, Reading, SensorDriver},
    store::ConfigStore,
    wifi::LinkDriver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    Shutdown,
    Reboot,
}

/// Cross-task flags shared with the HTTP surface.
#[derive(Clone)]
pub struct ControlFlags {
    pub reboot: Arc<AtomicBool>,
    pub config_dirty: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self {
            reboot: Arc::new(AtomicBool::new(false)),
            config_dirty: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Everything the cooperative tasks operate on. Tasks run one at a time on
/// the tick loop, so no field here needs its own lock.
pub struct NodeCtx {
    config: NodeConfig,
    topics: Topics,
    device_id: String,
    dir: DataDir,
    store: ConfigStore,
    boot: BootManager,
    journal: BootJournal,
    boot_marked: bool,
    link: ConnectivityEngine,
    link_driver: Box<dyn LinkDriver>,
    session: SessionEngine,
    mqtt: MqttTransport,
    sensor: Box<dyn SensorDriver>,
    last_reading: Option<Reading>,
    last_published: Option<Reading>,
    strip: LedStrip,
    led_out: Box<dyn LedOutput>,
    ota: OtaEngine,
    ota_pending: Option<OtaRequest>,
    download: Option<DownloadHandle>,
    http: reqwest::Client,
    watchdog: Watchdog,
    flags: ControlFlags,
    now_ms: u64,
}

impl NodeCtx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        device_id: String,
        dir: DataDir,
        store: ConfigStore,
        boot: BootManager,
        journal: BootJournal,
        link_driver: Box<dyn LinkDriver>,
        sensor: Box<dyn SensorDriver>,
        led_out: Box<dyn LedOutput>,
        flags: ControlFlags,
    ) -> Self {
        let topics = Topics::new(&config.device.location, &device_id);
        let system = &config.system;

        let link = ConnectivityEngine::new(
            config.wifi.profiles.clone(),
            config.wifi.connect_timeout_secs * 1_000,
            RetryBackoff::new(system.link_backoff_base_ms, system.link_backoff_max_ms),
        );
        let session = SessionEngine::new(
            system.session_connect_timeout_secs * 1_000,
            RetryBackoff::new(system.session_backoff_base_ms, system.session_backoff_max_ms),
        );
        let ota = OtaEngine::new(config.ota.max_image_bytes, config.ota.timeout_secs * 1_000);
        let strip = LedStrip::from_config(&config.led);
        let mqtt = MqttTransport::new(
            format!("{FIRMWARE_NAME}-{device_id}"),
            topics.status(),
        );
        let watchdog = Watchdog::new(system.watchdog_budget_ms);

        Self {
            config,
            topics,
            device_id,
            dir,
            store,
            boot,
            journal,
            boot_marked: false,
            link,
            link_driver,
            session,
            mqtt,
            sensor,
            last_reading: None,
            last_published: None,
            strip,
            led_out,
            ota,
            ota_pending: None,
            download: None,
            http: reqwest::Client::new(),
            watchdog,
            flags,
            now_ms: 0,
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.now_ms / 1_000
    }

    fn task_link(&mut self) -> TaskResult {
        let report = self.link_driver.report();
        for action in self.link.poll(self.now_ms, report) {
            match action {
                LinkAction::Associate(profile) => self.link_driver.begin_associate(&profile),
                LinkAction::AbortAssociate => self.link_driver.abort(),
                LinkAction::Connected { ssid } => info!(%ssid, "network link up"),
                LinkAction::Disconnected => warn!("network link lost"),
            }
        }
        self.refresh_status_override();
        Ok(())
    }

    fn task_session(&mut self) -> TaskResult {
        let wanted = self.config.mqtt.enabled && !self.config.mqtt.broker.is_empty();
        let report = self.mqtt.report();
        let actions = self
            .session
            .poll(self.now_ms, self.link.is_connected() && wanted, report);

        for action in actions {
            match action {
                SessionAction::Open => {
                    if let Err(err) = self.mqtt.open(&self.config.mqtt) {
                        warn!("broker connect failed to start: {err:#}");
                    }
                }
                SessionAction::Close => self.mqtt.close(),
                SessionAction::Resubscribe => {
                    self.mqtt.subscribe_all(&self.topics.subscriptions())?;
                }
                SessionAction::AnnounceOnline => self.announce_online()?,
            }
        }
        self.refresh_status_override();
        Ok(())
    }

    fn task_inbound(&mut self) -> TaskResult {
        for (topic, payload) in self.mqtt.poll_inbox() {
            match classify(&self.topics, &topic) {
                Some(Inbound::Command) => self.handle_command(&payload),
                Some(Inbound::ConfigUpdate) => self.handle_config_update(&payload),
                Some(Inbound::LedCommand) => self.handle_led_command(&payload),
                Some(Inbound::OtaRequest) => self.handle_ota_request(&payload),
                None => debug!(%topic, "ignoring unexpected topic"),
            }
        }
        Ok(())
    }

    fn task_ota(&mut self) -> TaskResult {
        self.maybe_start_update();
        self.drain_download_events();
        Ok(())
    }

    fn task_led(&mut self) -> TaskResult {
        let frame = self.strip.render(self.config.led.count as usize);
        self.led_out.write(&frame);
        Ok(())
    }

    fn task_sensor_read(&mut self) -> TaskResult {
        let Some(raw) = self.sensor.sample() else {
            warn!("sensor read failed");
            return Ok(());
        };
        let reading = calibrated(raw, &self.config.sensor);
        self.last_reading = Some(reading);
        self.strip
            .set_gauge_data(Some(reading.temperature as f64), Some(reading.humidity as f64));

        if let Some(published) = self.last_published {
            if is_significant_change(reading, published) {
                debug!("significant change, publishing early");
                self.publish_state()?;
            }
        }
        Ok(())
    }

    fn task_state_publish(&mut self) -> TaskResult {
        self.publish_state()
    }

    fn task_boot_success(&mut self) -> TaskResult {
        if !self.boot_marked && self.uptime_secs() >= self.boot.policy().success_uptime_secs {
            self.boot.mark_success(&mut self.journal)?;
            self.boot_marked = true;
        }
        Ok(())
    }

    fn task_config_refresh(&mut self) -> TaskResult {
        if self.flags.config_dirty.swap(false, Ordering::Relaxed) {
            let fresh = self.store.load();
            self.apply_config(fresh);
        }
        Ok(())
    }

    fn refresh_status_override(&mut self) {
        let status = if !self.link.is_connected() {
            Some(StatusOverride::LinkDown)
        } else if self.config.mqtt.enabled && !self.session.is_connected() {
            Some(StatusOverride::BrokerDown)
        } else {
            None
        };
        self.strip.set_status(status);
    }

    fn announce_online(&mut self) -> TaskResult {
        self.mqtt
            .publish(&self.topics.status(), b"online".to_vec(), true)?;

        if self.config.mqtt.discovery_enabled {
            let device = DeviceInfo {
                device_id: self.device_id.clone(),
                name: self.config.device.name.clone(),
            };
            for (topic, payload) in discovery_messages(&self.topics, &device) {
                self.mqtt.publish(&topic, serde_json::to_vec(&payload)?, true)?;
            }
        }

        self.publish_led_state()?;
        self.publish_state()?;
        Ok(())
    }

    fn publish_state(&mut self) -> TaskResult {
        if !self.session.is_connected() {
            return Ok(());
        }
        let Some(reading) = self.last_reading else {
            return Ok(());
        };

        let payload = StatePayload {
            temperature: (reading.temperature * 10.0).round() / 10.0,
            humidity: (reading.humidity * 10.0).round() / 10.0,
            rssi: self.link_driver.rssi(),
            uptime: self.uptime_secs(),
            timestamp: Utc::now().timestamp(),
        };
        self.mqtt
            .publish_json(&self.topics.state(), &payload, false)?;
        self.last_published = Some(reading);
        Ok(())
    }

    fn publish_led_state(&self) -> TaskResult {
        self.mqtt
            .publish_json(&self.topics.led_state(), &self.strip.state_payload(), true)?;
        Ok(())
    }

    fn handle_command(&mut self, payload: &[u8]) {
        let message: CommandMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("unparseable command payload: {err}");
                return;
            }
        };

        match message.action {
            CommandAction::Restart => {
                info!("restart requested over mqtt");
                self.flags.reboot.store(true, Ordering::Relaxed);
            }
            CommandAction::ScanWifi => {
                let networks = self.link_driver.scan();
                let response = CommandResponse { networks };
                if let Err(err) =
                    self.mqtt
                        .publish_json(&self.topics.command_response(), &response, false)
                {
                    warn!("scan response publish failed: {err:#}");
                }
            }
        }
    }

    fn handle_config_update(&mut self, payload: &[u8]) {
        let patch: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(patch) => patch,
            Err(err) => {
                warn!("unparseable config payload: {err}");
                return;
            }
        };

        match self.store.update(&patch) {
            Ok(merged) => {
                info!("configuration updated over mqtt");
                self.apply_config(merged);
            }
            Err(err) => warn!("config update rejected: {err}"),
        }
    }

    fn handle_led_command(&mut self, payload: &[u8]) {
        let command: LedCommand = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(err) => {
                warn!("unparseable led command: {err}");
                return;
            }
        };

        self.strip.apply_command(&command);
        if self.session.is_connected() {
            if let Err(err) = self.publish_led_state() {
                warn!("led state publish failed: {err}");
            }
        }
    }

    fn handle_ota_request(&mut self, payload: &[u8]) {
        let request: OtaRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!("unparseable update request: {err}");
                return;
            }
        };

        if !self.config.ota.enabled {
            warn!("update request refused: updates disabled");
            self.publish_ota_failed("updates_disabled");
            return;
        }
        if self.ota.is_active() || self.ota_pending.is_some() {
            warn!("update request refused: already in progress");
            self.publish_ota_failed("update_already_in_progress");
            return;
        }

        info!(url = %request.url, "update request accepted");
        self.ota_pending = Some(request);
    }

    fn maybe_start_update(&mut self) {
        if self.ota.is_active() || self.download.is_some() {
            return;
        }
        let Some(request) = self.ota_pending.take() else {
            return;
        };

        if let Err(err) = self.ota.begin(request.clone(), self.now_ms) {
            warn!("could not start update: {err}");
            return;
        }
        let handle = image::spawn_download(
            self.http.clone(),
            request.url.clone(),
            self.dir.firmware_staging(),
            Duration::from_secs(self.config.ota.timeout_secs),
        );
        self.download = Some(handle);
        self.publish_ota_status();
    }

    fn drain_download_events(&mut self) {
        let mut events = Vec::new();
        if let Some(handle) = self.download.as_mut() {
            while let Ok(event) = handle.events.try_recv() {
                events.push(event);
            }
        }

        for event in events {
            match event {
                DownloadEvent::Chunk(chunk) => {
                    if let Err(err) = self.ota.ingest(&chunk, self.now_ms) {
                        warn!("update aborted: {err}");
                        self.abort_download();
                        self.publish_ota_status();
                        return;
                    }
                }
                DownloadEvent::Done => {
                    self.download = None;
                    self.finish_update();
                    return;
                }
                DownloadEvent::Failed(reason) => {
                    warn!("image download failed: {reason}");
                    self.ota.download_failed(&reason);
                    self.abort_download();
                    self.publish_ota_status();
                    return;
                }
            }
        }
    }

    /// Download complete: verify, preserve the running image, swap in the
    /// staged one, then ask for a reboot into it.
    fn finish_update(&mut self) {
        let result = self.ota.finish_download().and_then(|()| self.ota.verify());
        if let Err(err) = result {
            if err != OtaError::DigestMismatch {
                self.ota.fail(&err.to_string());
            }
            warn!("image verification failed: {err}");
            image::discard_staged(&self.dir);
            self.publish_ota_status();
            return;
        }
        info!(
            digest = self.ota.computed_digest().unwrap_or(""),
            "image verified"
        );

        match self.apply_verified_image() {
            Ok(()) => {
                info!("update installed, rebooting into the new image");
                self.publish_ota_status();
                self.flags.reboot.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                warn!("install failed: {err:#}");
                self.ota.install_failed(&format!("{err:#}"));
                image::discard_staged(&self.dir);
                self.publish_ota_status();
            }
        }
    }

    fn apply_verified_image(&mut self) -> anyhow::Result<()> {
        image::backup_current(&self.dir)?;
        self.ota.backup_complete()?;
        image::install_staged(&self.dir)?;
        self.ota.install_complete()?;
        Ok(())
    }

    fn abort_download(&mut self) {
        if let Some(handle) = self.download.take() {
            handle.abort();
        }
        image::discard_staged(&self.dir);
    }

    fn publish_ota_failed(&mut self, reason: &str) {
        if !self.session.is_connected() {
            return;
        }
        let payload = sensornode_common::types::OtaStatusPayload {
            status: "failed",
            message: Some(reason.to_string()),
        };
        if let Err(err) = self.mqtt.publish_json(&self.topics.ota_status(), &payload, false) {
            warn!("ota status publish failed: {err:#}");
        }
    }

    fn publish_ota_status(&mut self) {
        if !self.session.is_connected() {
            return;
        }
        if let Some(payload) = self.ota.status_payload() {
            if let Err(err) =
                self.mqtt.publish_json(&self.topics.ota_status(), &payload, false)
            {
                warn!("ota status publish failed: {err:#}");
            }
        }
    }

    /// Adopt a freshly persisted configuration without restarting. Sections
    /// that feed long-lived machinery rebuild their engines; identity and
    /// cadence changes need a restart and say so.
    fn apply_config(&mut self, fresh: NodeConfig) {
        let old = std::mem::replace(&mut self.config, fresh);
        let system = &self.config.system;

        if old.wifi != self.config.wifi {
            self.link = ConnectivityEngine::new(
                self.config.wifi.profiles.clone(),
                self.config.wifi.connect_timeout_secs * 1_000,
                RetryBackoff::new(system.link_backoff_base_ms, system.link_backoff_max_ms),
            );
            self.link_driver.abort();
            info!("wifi settings changed, reconnecting");
        }
        if old.mqtt != self.config.mqtt {
            self.mqtt.close();
            self.session = SessionEngine::new(
                system.session_connect_timeout_secs * 1_000,
                RetryBackoff::new(
                    system.session_backoff_base_ms,
                    system.session_backoff_max_ms,
                ),
            );
            info!("mqtt settings changed, reconnecting");
        }
        if old.led != self.config.led {
            self.strip = LedStrip::from_config(&self.config.led);
        }
        if old.ota != self.config.ota && !self.ota.is_active() {
            self.ota = OtaEngine::new(
                self.config.ota.max_image_bytes,
                self.config.ota.timeout_secs * 1_000,
            );
        }
        if old.device.location != self.config.device.location
            || old.sensor.read_interval_secs != self.config.sensor.read_interval_secs
            || old.sensor.publish_interval_secs != self.config.sensor.publish_interval_secs
            || old.system.tick_ms != self.config.system.tick_ms
        {
            warn!("identity or cadence changed, restart required to take effect");
        }
    }

    /// Orderly exit: any queued publishes (update status, the retained
    /// "offline") are flushed before the transport stops.
    async fn shutdown(&mut self) {
        self.abort_download();
        if self.session.is_connected() {
            let _ = self
                .mqtt
                .publish(&self.topics.status(), b"offline".to_vec(), true);
        }
        self.mqtt.close_flushed(Duration::from_secs(2)).await;
    }
}

pub fn build_scheduler(config: &NodeConfig) -> Scheduler<NodeCtx> {
    let tick_ms = config.system.tick_ms;
    let mut scheduler = Scheduler::new();

    scheduler.register("link", tick_ms, NodeCtx::task_link);
    scheduler.register("session", tick_ms, NodeCtx::task_session);
    scheduler.register("inbound", tick_ms, NodeCtx::task_inbound);
    scheduler.register("ota", tick_ms, NodeCtx::task_ota);
    scheduler.register("led", tick_ms, NodeCtx::task_led);
    scheduler.register(
        "sensor_read",
        config.sensor.read_interval_secs * 1_000,
        NodeCtx::task_sensor_read,
    );
    scheduler.register(
        "state_publish",
        config.sensor.publish_interval_secs * 1_000,
        NodeCtx::task_state_publish,
    );
    scheduler.register("boot_success", 1_000, NodeCtx::task_boot_success);
    scheduler.register("config_refresh", 1_000, NodeCtx::task_config_refresh);

    scheduler
}

/// The main tick loop: one scheduler pass per tick, watchdog pet after, and
/// an exit once a reboot is requested or the process is signalled.
pub async fn run(mut ctx: NodeCtx, mut scheduler: Scheduler<NodeCtx>) -> anyhow::Result<ExitMode> {
    let mut interval = tokio::time::interval(Duration::from_millis(ctx.config.system.tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        device_id = %ctx.device_id,
        base_topic = ctx.topics.base(),
        "node runtime started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = platform::monotonic_ms();
                ctx.now_ms = now;
                scheduler.tick(now, &mut ctx);
                ctx.watchdog.pet(now);

                if ctx.flags.reboot.load(Ordering::Relaxed) {
                    info!("reboot requested, leaving tick loop");
                    ctx.shutdown().await;
                    return Ok(ExitMode::Reboot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                ctx.shutdown().await;
                return Ok(ExitMode::Shutdown);
            }
        }
    }
}
