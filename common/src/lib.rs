//! Engine crate for the sensor node firmware: every state machine here is
//! pure and synchronous, driven by the runtime with explicit timestamps so
//! the whole decision surface is testable on the host.

pub mod backoff;
pub mod boot;
pub mod config;
pub mod discovery;
pub mod led;
pub mod link;
pub mod ota;
pub mod scheduler;
pub mod session;
pub mod topics;
pub mod types;

pub use backoff::RetryBackoff;
pub use boot::{register_boot, BootDecision, BootJournal, BootPolicy, FailsafeReason};
pub use config::NodeConfig;
pub use led::{LedCommand, LedEffect, LedStrip};
pub use link::{ConnectivityEngine, LinkAction, LinkReport, LinkState};
pub use ota::{OtaEngine, OtaPhase, OtaRequest};
pub use scheduler::{Scheduler, TaskResult};
pub use session::{SessionAction, SessionEngine, SessionState};
pub use topics::Topics;
pub use types::{RgbColor, StatePayload};
