//! Background thread draining the cleanup outbox.
//!
//! # Invariants
//! - The worker owns its connection; request handlers never share it.
//! - A failed pass is logged and retried on the next tick; the loop only
//!   ends through `stop()` or drop.

use super::cleanup::{now_epoch_ms, CleanupHandler};
use super::error::EngineResult;
use crate::config::CleanupConfig;
use crate::db::open_db;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

/// Handle to a running cleanup worker.
pub struct CleanupWorker {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CleanupWorker {
    /// Opens `db_path` and starts polling every `config.poll_interval_ms`.
    ///
    /// The database is opened (and migrated) before the thread starts, so
    /// open failures surface here.
    pub fn spawn(db_path: impl Into<PathBuf>, config: CleanupConfig) -> EngineResult<Self> {
        let db_path = db_path.into();
        let mut conn = open_db(&db_path)?;
        let handler = CleanupHandler::new(config);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        info!(
            "event=cleanup_worker module=cleanup status=start poll_interval_ms={}",
            handler.config().poll_interval_ms
        );
        let thread = thread::spawn(move || loop {
            match handler.process_due(&mut conn, now_epoch_ms()) {
                Ok(report) if !report.is_idle() => debug!(
                    "event=cleanup_pass module=cleanup status=ok attempted={} completed={} retried={} abandoned={} skipped={}",
                    report.attempted, report.completed, report.retried, report.abandoned, report.skipped
                ),
                Ok(_) => {}
                Err(err) => error!(
                    "event=cleanup_pass module=cleanup status=error error={}",
                    err
                ),
            }

            match stop_rx.recv_timeout(handler.config().poll_interval()) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Signals the loop and waits for the current pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("event=cleanup_worker module=cleanup status=error error_code=thread_panicked");
                return;
            }
            info!("event=cleanup_worker module=cleanup status=stopped");
        }
    }
}

impl Drop for CleanupWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
