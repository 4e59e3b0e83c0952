use std::fs::{OpenOptions, TryLockError};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::bot::gateway::TelegramGateway;
use crate::bot::handler::PaymentCallbackHandler;
use crate::database::DatabaseOperations;
use crate::error::{Result, SettleBotError};
use crate::utils::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
}

#[derive(Debug)]
pub enum PollOutcome {
    Ran(PollSummary),
    /// Another invocation holds the lock; nothing was fetched or processed.
    AlreadyRunning,
}

/// Drives one polling invocation: fetch a batch of updates, dispatch each
/// callback to the confirmation handler and advance the cursor per event.
///
/// Invocations are expected to come from an external scheduler; the file
/// lock makes an overlapping manual run exit immediately instead of racing
/// the scheduled one on the cursor.
pub struct PollRunner {
    gateway: Arc<dyn TelegramGateway>,
    handler: PaymentCallbackHandler,
    db: DatabaseOperations,
    lock_path: PathBuf,
}

impl PollRunner {
    pub fn new(
        gateway: Arc<dyn TelegramGateway>,
        handler: PaymentCallbackHandler,
        db: DatabaseOperations,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            handler,
            db,
            lock_path: lock_path.into(),
        }
    }

    pub async fn run_once(&self, timeout_secs: u32) -> Result<PollOutcome> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;

        match lock_file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                warn!("Another polling instance is already running. Skipping.");
                return Ok(PollOutcome::AlreadyRunning);
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        let result = self.poll_and_process(timeout_secs).await;

        if let Err(e) = lock_file.unlock() {
            warn!("Failed to release poll lock: {e}");
        }

        result.map(PollOutcome::Ran)
    }

    async fn poll_and_process(&self, timeout_secs: u32) -> Result<PollSummary> {
        let cursor = self.db.cursor().await?;
        debug!("Polling for updates after cursor {cursor}");

        let mut updates = self.gateway.fetch_updates(cursor, timeout_secs).await;
        if updates.is_empty() {
            debug!("No new updates");
            return Ok(PollSummary::default());
        }
        updates.sort_by_key(|u| u.id);

        info!("Processing {} update(s)...", updates.len());
        let mut summary = PollSummary {
            total: updates.len(),
            ..PollSummary::default()
        };

        for update in updates {
            if let Some(event) = &update.callback {
                debug!("Processing callback: {}", event.data);
                if self.handler.handle_callback(event).await {
                    summary.processed += 1;
                } else {
                    summary.errors += 1;
                    warn!("Callback dispatch failed for update {}", update.id);
                }
            }

            // The event is consumed exactly once whether dispatch succeeded
            // or not; only a failure to persist that progress is fatal,
            // since losing it would reprocess the batch forever.
            if let Err(e) = self.db.advance_cursor(update.id).await {
                error!("Failed to persist cursor at update {}: {}", update.id, e);
                return Err(SettleBotError::CursorPersist(Box::new(e)));
            }
        }

        Logger::log_poll_summary(summary.processed, summary.errors, summary.total);
        Ok(summary)
    }
}
