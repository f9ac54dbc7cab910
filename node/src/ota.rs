use std::{fs, io::ErrorKind, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use futures_util::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::platform::DataDir;

#[derive(Debug)]
pub enum DownloadEvent {
    /// One body chunk, already appended to the staging file.
    Chunk(Vec<u8>),
    Done,
    Failed(String),
}

/// A running background download. The tick loop drains `events` and feeds
/// the chunks to the update engine; dropping or aborting the handle stops
/// the transfer.
pub struct DownloadHandle {
    pub events: UnboundedReceiver<DownloadEvent>,
    worker: JoinHandle<()>,
}

impl DownloadHandle {
    pub fn abort(&self) {
        self.worker.abort();
    }
}

pub fn spawn_download(
    client: reqwest::Client,
    url: String,
    staging: PathBuf,
    timeout: Duration,
) -> DownloadHandle {
    let (tx, events) = mpsc::unbounded_channel();
    let worker = tokio::spawn(async move {
        if let Err(err) = download(client, &url, &staging, timeout, &tx).await {
            let _ = tx.send(DownloadEvent::Failed(format!("{err:#}")));
        }
    });
    DownloadHandle { events, worker }
}

async fn download(
    client: reqwest::Client,
    url: &str,
    staging: &PathBuf,
    timeout: Duration,
    tx: &UnboundedSender<DownloadEvent>,
) -> anyhow::Result<()> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("server rejected the request")?;

    let mut file = tokio::fs::File::create(staging)
        .await
        .context("could not create staging file")?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("body read failed")?;
        file.write_all(&chunk).await?;
        if tx.send(DownloadEvent::Chunk(chunk.to_vec())).is_err() {
            bail!("download consumer went away");
        }
    }

    file.sync_all().await?;
    let _ = tx.send(DownloadEvent::Done);
    Ok(())
}

/// Preserve the running image before the staged one replaces it.
pub fn backup_current(dir: &DataDir) -> std::io::Result<()> {
    match fs::copy(dir.firmware(), dir.firmware_backup()) {
        Ok(_) => Ok(()),
        // First install on a fresh device: nothing to preserve.
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Atomic swap of the verified staged image into the active slot.
pub fn install_staged(dir: &DataDir) -> std::io::Result<()> {
    fs::rename(dir.firmware_staging(), dir.firmware())
}

pub fn discard_staged(dir: &DataDir) {
    let _ = fs::remove_file(dir.firmware_staging());
}

/// Restore the previous image. Returns false when no backup exists.
pub fn rollback(dir: &DataDir) -> std::io::Result<bool> {
    match fs::copy(dir.firmware_backup(), dir.firmware()) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn dir() -> (TempDir, DataDir) {
        let tmp = TempDir::new().unwrap();
        let dir = DataDir::at(tmp.path());
        (tmp, dir)
    }

    #[test]
    fn install_replaces_the_active_image_and_keeps_a_backup() {
        let (_tmp, dir) = dir();
        fs::write(dir.firmware(), b"v1").unwrap();
        fs::write(dir.firmware_staging(), b"v2").unwrap();

        backup_current(&dir).unwrap();
        install_staged(&dir).unwrap();

        assert_eq!(fs::read(dir.firmware()).unwrap(), b"v2");
        assert_eq!(fs::read(dir.firmware_backup()).unwrap(), b"v1");
        assert!(!dir.firmware_staging().exists());
    }

    #[test]
    fn first_install_has_nothing_to_back_up() {
        let (_tmp, dir) = dir();
        fs::write(dir.firmware_staging(), b"v1").unwrap();

        backup_current(&dir).unwrap();
        install_staged(&dir).unwrap();

        assert_eq!(fs::read(dir.firmware()).unwrap(), b"v1");
        assert!(!dir.firmware_backup().exists());
    }

    #[test]
    fn rollback_restores_the_previous_image() {
        let (_tmp, dir) = dir();
        fs::write(dir.firmware(), b"v2").unwrap();
        fs::write(dir.firmware_backup(), b"v1").unwrap();

        assert!(rollback(&dir).unwrap());
        assert_eq!(fs::read(dir.firmware()).unwrap(), b"v1");
    }

    #[test]
    fn rollback_without_a_backup_reports_false() {
        let (_tmp, dir) = dir();
        assert!(!rollback(&dir).unwrap());
    }

    #[test]
    fn discard_tolerates_a_missing_staging_file() {
        let (_tmp, dir) = dir();
        discard_staged(&dir);
        fs::write(dir.firmware_staging(), b"partial").unwrap();
        discard_staged(&dir);
        assert!(!dir.firmware_staging().exists());
    }
}
