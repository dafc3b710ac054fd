//! Persistence actor for power-down snapshots
//!
//! The state engine must never wait on disk I/O while handling a change, so
//! snapshot writes are handed to this actor over a channel.
//!
//! # Debouncing
//!
//! With a debounce window of 0 (the default) every save request is written
//! immediately. With a non-zero window the actor keeps only the most recent
//! pending snapshot and writes it once no new request has arrived for the
//! whole window (last-write-wins).
//!
//! Write failures are logged and dropped; the next change or the final
//! shutdown flush writes a fresh snapshot anyway.

use super::persistence::SnapshotFile;
use super::types::PowerState;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

/// Default debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 0;

/// Commands sent to the persistence actor
#[derive(Debug)]
pub enum PersistenceCommand {
    /// Save a snapshot (possibly debounced)
    Save(PowerState),
    /// Force any pending snapshot to disk
    Flush(oneshot::Sender<()>),
    /// Flush and stop
    Shutdown,
}

/// Persistence actor that owns the snapshot file
pub struct PersistenceActor {
    file: SnapshotFile,
    command_rx: mpsc::UnboundedReceiver<PersistenceCommand>,
    /// Snapshot awaiting flush
    pending_snapshot: Option<PowerState>,
    /// Time of the last save request
    last_request: Instant,
    debounce_ms: u64,
    write_count: u64,
}

/// Handle to communicate with the persistence actor
///
/// Cheap to clone and safe to use from any task.
#[derive(Clone)]
pub struct PersistenceHandle {
    cmd_tx: mpsc::UnboundedSender<PersistenceCommand>,
}

impl PersistenceActor {
    /// Spawn the actor for `file` with the given debounce window
    pub fn spawn(file: SnapshotFile, debounce_ms: u64) -> PersistenceHandle {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();

        let actor = PersistenceActor {
            file,
            command_rx,
            pending_snapshot: None,
            last_request: Instant::now(),
            debounce_ms,
            write_count: 0,
        };

        tokio::spawn(actor.run());

        PersistenceHandle { cmd_tx }
    }

    async fn run(mut self) {
        info!(
            "Persistence actor started for {} (debounce: {}ms)",
            self.file.path().display(),
            self.debounce_ms
        );

        let tick_interval = if self.debounce_ms > 0 {
            self.debounce_ms
        } else {
            1000
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_interval));

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PersistenceCommand::Save(snapshot)) => {
                            trace!("Received save command, queuing snapshot");
                            self.pending_snapshot = Some(snapshot);
                            self.last_request = Instant::now();

                            if self.debounce_ms == 0 {
                                self.flush_pending_snapshot().await;
                            }
                        }
                        Some(PersistenceCommand::Flush(response_tx)) => {
                            trace!("Received flush command");
                            self.flush_pending_snapshot().await;
                            let _ = response_tx.send(());
                        }
                        Some(PersistenceCommand::Shutdown) | None => {
                            self.flush_pending_snapshot().await;
                            info!(
                                "Persistence actor stopped (total writes: {})",
                                self.write_count
                            );
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.pending_snapshot.is_some() && self.debounce_ms > 0 {
                        let elapsed = self.last_request.elapsed();
                        if elapsed >= Duration::from_millis(self.debounce_ms) {
                            trace!(?elapsed, "Debounce window expired, flushing snapshot");
                            self.flush_pending_snapshot().await;
                        }
                    }
                }
            }
        }
    }

    async fn flush_pending_snapshot(&mut self) {
        let Some(snapshot) = self.pending_snapshot.take() else {
            return;
        };

        match self.file.save(&snapshot).await {
            Ok(()) => {
                self.write_count += 1;
                debug!(
                    channels = snapshot.len(),
                    write = self.write_count,
                    "Power-down state written"
                );
            }
            Err(e) => {
                error!(
                    "Failed to write power-down state to {}: {}",
                    self.file.path().display(),
                    e
                );
            }
        }
    }
}

impl PersistenceHandle {
    /// Request a snapshot save
    ///
    /// Fire-and-forget: returns as soon as the request is queued.
    pub fn save(&self, snapshot: PowerState) {
        if self.cmd_tx.send(PersistenceCommand::Save(snapshot)).is_err() {
            error!("Persistence actor is gone, power-down state not saved");
        }
    }

    /// Wait until any pending snapshot has been written
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PersistenceCommand::Flush(tx))
            .context("Failed to send flush command: actor shut down")?;

        rx.await.context("Failed to receive flush response")
    }

    /// Signal the actor to flush and stop
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PersistenceCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::PowerValue;
    use tempfile::tempdir;

    fn make_state(index: u8, value: PowerValue) -> PowerState {
        let mut state = PowerState::new();
        state.insert(index, value);
        state
    }

    #[tokio::test]
    async fn test_save_writes_immediately_without_debounce() {
        let temp = tempdir().unwrap();
        let file = SnapshotFile::in_dir(temp.path());
        let handle = PersistenceActor::spawn(file.clone(), 0);

        handle.save(make_state(3, PowerValue::On));
        handle.flush().await.unwrap();

        assert_eq!(file.load().await, make_state(3, PowerValue::On));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_flush_overrides_debounce() {
        let temp = tempdir().unwrap();
        let file = SnapshotFile::in_dir(temp.path());
        let handle = PersistenceActor::spawn(file.clone(), 10_000);

        handle.save(make_state(1, PowerValue::On));
        assert!(file.load().await.is_empty());

        handle.flush().await.unwrap();
        assert_eq!(file.load().await, make_state(1, PowerValue::On));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_debounce_keeps_last_snapshot() {
        let temp = tempdir().unwrap();
        let file = SnapshotFile::in_dir(temp.path());
        let handle = PersistenceActor::spawn(file.clone(), 100);

        handle.save(make_state(1, PowerValue::On));
        handle.save(make_state(1, PowerValue::Off));
        handle.save(make_state(2, PowerValue::On));

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(file.load().await, make_state(2, PowerValue::On));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let temp = tempdir().unwrap();
        // A directory where the file should be makes every write fail
        let blocked = temp.path().join("blocked");
        std::fs::create_dir_all(blocked.join(super::super::persistence::SNAPSHOT_FILE_NAME)).unwrap();

        let handle = PersistenceActor::spawn(SnapshotFile::in_dir(&blocked), 0);
        handle.save(make_state(1, PowerValue::On));

        // Actor is still alive and answering
        handle.flush().await.unwrap();
        handle.shutdown();
    }
}
