use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Context};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{info, warn};

use sensornode_common::{config::MqttConfig, session::BrokerReport};

const MAX_INBOUND_PAYLOAD_BYTES: usize = 8 * 1024;

const STATUS_DOWN: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_UP: u8 = 2;

/// Broker transport behind the session engine.
///
/// The engine decides when to open and close; this type owns the client, the
/// event-loop worker, and an inbox the tick loop drains synchronously. A
/// transport error marks the session down and stops the worker rather than
/// retrying internally, so the engine's backoff stays the only retry policy.
pub struct MqttTransport {
    client_id: String,
    lwt_topic: String,
    client: Option<AsyncClient>,
    worker: Option<JoinHandle<()>>,
    status: Arc<AtomicU8>,
    inbox: Option<UnboundedReceiver<(String, Vec<u8>)>>,
}

impl MqttTransport {
    pub fn new(client_id: String, lwt_topic: String) -> Self {
        Self {
            client_id,
            lwt_topic,
            client: None,
            worker: None,
            status: Arc::new(AtomicU8::new(STATUS_DOWN)),
            inbox: None,
        }
    }

    pub fn report(&self) -> BrokerReport {
        match self.status.load(Ordering::Relaxed) {
            STATUS_UP => BrokerReport::Up,
            STATUS_CONNECTING => BrokerReport::Connecting,
            _ => BrokerReport::Down,
        }
    }

    /// Start a fresh connection attempt. The last will is registered before
    /// the connect packet, so the broker retains "offline" on our behalf if
    /// we ever vanish without a clean disconnect.
    pub fn open(&mut self, config: &MqttConfig) -> anyhow::Result<()> {
        self.close();
        if config.broker.is_empty() {
            bail!("no broker configured");
        }

        let mut options = MqttOptions::new(&self.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.max(5)));
        options.set_last_will(LastWill::new(
            &self.lwt_topic,
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::unbounded_channel();

        self.status.store(STATUS_CONNECTING, Ordering::Relaxed);
        self.worker = Some(spawn_event_worker(eventloop, tx, self.status.clone()));
        self.client = Some(client);
        self.inbox = Some(rx);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.inbox = None;
        self.status.store(STATUS_DOWN, Ordering::Relaxed);
    }

    /// Close, but let the worker drain the request queue first. The
    /// disconnect request sits behind any queued publishes, so the event
    /// loop flushes them before the connection goes down; the grace period
    /// bounds a worker that cannot make progress.
    pub async fn close_flushed(&mut self, grace: Duration) {
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        if let Some(mut worker) = self.worker.take() {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                worker.abort();
            }
        }
        self.inbox = None;
        self.status.store(STATUS_DOWN, Ordering::Relaxed);
    }

    pub fn subscribe_all(&self, topics: &[String]) -> anyhow::Result<()> {
        let client = self.client.as_ref().context("mqtt transport not open")?;
        for topic in topics {
            client
                .try_subscribe(topic, QoS::AtMostOnce)
                .with_context(|| format!("subscribe to {topic} failed"))?;
        }
        Ok(())
    }

    pub fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> anyhow::Result<()> {
        let client = self.client.as_ref().context("mqtt transport not open")?;
        client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)
            .with_context(|| format!("publish to {topic} failed"))?;
        Ok(())
    }

    pub fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> anyhow::Result<()> {
        self.publish(topic, serde_json::to_vec(value)?, retain)
    }

    /// Drain everything that arrived since the last tick.
    pub fn poll_inbox(&mut self) -> Vec<(String, Vec<u8>)> {
        let mut messages = Vec::new();
        if let Some(inbox) = self.inbox.as_mut() {
            while let Ok(message) = inbox.try_recv() {
                messages.push(message);
            }
        }
        messages
    }
}

fn spawn_event_worker(
    mut eventloop: rumqttc::EventLoop,
    tx: UnboundedSender<(String, Vec<u8>)>,
    status: Arc<AtomicU8>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    status.store(STATUS_UP, Ordering::Relaxed);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if publish.payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
                        warn!(
                            topic = %publish.topic,
                            bytes = publish.payload.len(),
                            "dropping oversized inbound payload"
                        );
                        continue;
                    }
                    if tx
                        .send((publish.topic, publish.payload.to_vec()))
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt transport error: {err}");
                    status.store(STATUS_DOWN, Ordering::Relaxed);
                    break;
                }
            }
        }
    })
}
