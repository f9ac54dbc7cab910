use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::OtaStatusPayload;

/// Inbound update request from `<base>/ota`.
#[derive(Debug, Clone, Deserialize)]
pub struct OtaRequest {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Downloading,
    Verifying,
    BackingUp,
    Installing,
    Succeeded,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OtaError {
    #[error("an update is already in progress")]
    Busy,
    #[error("updates are disabled by policy")]
    Disabled,
    #[error("image exceeds the configured size limit")]
    SizeLimit,
    #[error("download exceeded the time bound")]
    Timeout,
    #[error("computed digest does not match the expected digest")]
    DigestMismatch,
    #[error("operation is not valid in phase {0:?}")]
    InvalidPhase(OtaPhase),
}

/// Update phase machine and integrity gate.
///
/// The runtime streams downloaded bytes through [`ingest`]; the digest is
/// folded incrementally so verification is a single compare. A mismatch
/// fails the attempt before any backup or install step runs, so the
/// installed image is never touched on a failed verification.
///
/// [`ingest`]: OtaEngine::ingest
pub struct OtaEngine {
    phase: OtaPhase,
    request: Option<OtaRequest>,
    hasher: Option<Sha256>,
    computed_digest: Option<String>,
    bytes_received: u64,
    started_ms: u64,
    max_bytes: u64,
    timeout_ms: u64,
    failure: Option<String>,
}

impl OtaEngine {
    pub fn new(max_bytes: u64, timeout_ms: u64) -> Self {
        Self {
            phase: OtaPhase::Idle,
            request: None,
            hasher: None,
            computed_digest: None,
            bytes_received: 0,
            started_ms: 0,
            max_bytes,
            timeout_ms,
            failure: None,
        }
    }

    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            OtaPhase::Downloading | OtaPhase::Verifying | OtaPhase::BackingUp | OtaPhase::Installing
        )
    }

    pub fn request(&self) -> Option<&OtaRequest> {
        self.request.as_ref()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn computed_digest(&self) -> Option<&str> {
        self.computed_digest.as_deref()
    }

    pub fn begin(&mut self, request: OtaRequest, now_ms: u64) -> Result<(), OtaError> {
        if self.is_active() {
            return Err(OtaError::Busy);
        }
        *self = Self::new(self.max_bytes, self.timeout_ms);
        self.request = Some(request);
        self.hasher = Some(Sha256::new());
        self.started_ms = now_ms;
        self.phase = OtaPhase::Downloading;
        Ok(())
    }

    /// Fold one downloaded chunk. Enforces the size and time bounds.
    pub fn ingest(&mut self, chunk: &[u8], now_ms: u64) -> Result<(), OtaError> {
        if self.phase != OtaPhase::Downloading {
            return Err(OtaError::InvalidPhase(self.phase));
        }
        if now_ms.saturating_sub(self.started_ms) >= self.timeout_ms {
            self.fail("download_timeout");
            return Err(OtaError::Timeout);
        }
        self.bytes_received += chunk.len() as u64;
        if self.bytes_received > self.max_bytes {
            self.fail("size_limit_exceeded");
            return Err(OtaError::SizeLimit);
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
        Ok(())
    }

    pub fn download_failed(&mut self, detail: &str) {
        self.fail(&format!("download_error: {detail}"));
    }

    pub fn finish_download(&mut self) -> Result<(), OtaError> {
        if self.phase != OtaPhase::Downloading {
            return Err(OtaError::InvalidPhase(self.phase));
        }
        self.phase = OtaPhase::Verifying;
        Ok(())
    }

    /// The integrity gate: compare the streamed digest against the expected
    /// one, if the request carried it. Must pass before any install step.
    pub fn verify(&mut self) -> Result<(), OtaError> {
        if self.phase != OtaPhase::Verifying {
            return Err(OtaError::InvalidPhase(self.phase));
        }
        let digest = self
            .hasher
            .take()
            .map(|hasher| hex_string(&hasher.finalize()))
            .unwrap_or_default();
        self.computed_digest = Some(digest.clone());

        let expected = self
            .request
            .as_ref()
            .and_then(|request| request.sha256.as_deref());
        if let Some(expected) = expected {
            if !expected.eq_ignore_ascii_case(&digest) {
                self.fail("digest_mismatch");
                return Err(OtaError::DigestMismatch);
            }
        }
        self.phase = OtaPhase::BackingUp;
        Ok(())
    }

    pub fn backup_complete(&mut self) -> Result<(), OtaError> {
        if self.phase != OtaPhase::BackingUp {
            return Err(OtaError::InvalidPhase(self.phase));
        }
        self.phase = OtaPhase::Installing;
        Ok(())
    }

    pub fn install_complete(&mut self) -> Result<(), OtaError> {
        if self.phase != OtaPhase::Installing {
            return Err(OtaError::InvalidPhase(self.phase));
        }
        self.phase = OtaPhase::Succeeded;
        Ok(())
    }

    pub fn install_failed(&mut self, detail: &str) {
        self.fail(&format!("install_error: {detail}"));
    }

    pub fn fail(&mut self, reason: &str) {
        self.phase = OtaPhase::Failed;
        self.failure = Some(reason.to_string());
        self.hasher = None;
    }

    pub fn status_payload(&self) -> Option<OtaStatusPayload> {
        let payload = match self.phase {
            OtaPhase::Idle => return None,
            OtaPhase::Downloading | OtaPhase::Verifying | OtaPhase::BackingUp
            | OtaPhase::Installing => OtaStatusPayload {
                status: "downloading",
                message: None,
            },
            OtaPhase::Succeeded => OtaStatusPayload {
                status: "success",
                message: None,
            },
            OtaPhase::Failed => OtaStatusPayload {
                status: "failed",
                message: self.failure.clone(),
            },
        };
        Some(payload)
    }
}

pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
