use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::errors::{AppError, AppResult, Rejection};
use crate::models::{ImageRecord, UploadFile};
use crate::security::InputValidator;

use super::backend_client::BackendClient;
use super::progress_tracker::{ProgressTracker, SessionState, UploadSession};

/// Drives one file at a time through ticket request, storage transfer and confirmation.
pub struct UploadOrchestrator {
    backend: BackendClient,
    clock: Arc<dyn Clock>,
    tracker: ProgressTracker,
}

impl UploadOrchestrator {
    pub fn new(backend: BackendClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            BackendClient::from_config(config)?,
            Arc::new(SystemClock),
        ))
    }

    /// Type and size check. Never touches the network.
    pub fn validate(file: &UploadFile) -> Result<(), Rejection> {
        InputValidator::validate_upload(&file.content_type, file.size())
    }

    pub fn session(&self) -> UploadSession {
        self.tracker.snapshot()
    }

    /// Receive every session transition, in order, from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UploadSession> {
        self.tracker.subscribe()
    }

    /// Return a finished or failed session to idle.
    pub fn reset(&self) -> AppResult<()> {
        self.tracker.reset()
    }

    /// Upload `file` as a brand-new attempt.
    ///
    /// Any phase failure is terminal for this attempt: the ticket is dropped and
    /// the caller must start again, which requests a fresh ticket.
    pub async fn start(&self, file: UploadFile) -> AppResult<ImageRecord> {
        Self::validate(&file).map_err(AppError::InvalidInput)?;

        let session_id = Uuid::new_v4();
        let started_at = self.clock.now();
        self.tracker.begin(session_id, file.clone(), started_at)?;
        let guard = CancelGuard {
            tracker: &self.tracker,
            session_id,
        };

        log::info!(
            "[{}] Starting upload of {} ({}, {} bytes)",
            session_id,
            file.name,
            file.content_type,
            file.size()
        );

        let outcome = self.run_phases(session_id, &file).await;
        std::mem::forget(guard);

        match outcome {
            Ok(image) => {
                let moved = self.tracker.mark_done(image.clone());
                debug_assert!(moved, "session left confirming before completion");
                let elapsed = self.clock.now() - started_at;
                log::info!(
                    "[{}] Upload of {} completed as image {} in {}ms",
                    session_id,
                    file.name,
                    image.id,
                    elapsed.num_milliseconds()
                );
                Ok(image)
            }
            Err(e) => {
                let phase = self.tracker.snapshot().phase();
                let moved = self.tracker.mark_failed(e.to_string());
                debug_assert!(moved, "failed session was no longer active");
                if e.is_completion_inconsistency() {
                    log::error!(
                        "[{}] {} was transferred but not confirmed; backend record stays pending: {}",
                        session_id,
                        file.name,
                        e
                    );
                } else {
                    log::error!("[{}] Upload failed during {}: {}", session_id, phase, e);
                }
                if !e.is_permanent() {
                    log::info!(
                        "[{}] Failure looks transient; retry() will request a new ticket",
                        session_id
                    );
                }
                Err(e)
            }
        }
    }

    /// Start a new attempt with the file kept by the last failed session.
    pub async fn retry(&self) -> AppResult<ImageRecord> {
        let session = self.tracker.snapshot();
        if session.is_active() {
            return Err(AppError::Busy);
        }
        match (session.state, session.file) {
            (SessionState::Failed { .. }, Some(file)) => {
                log::info!("Retrying upload of {} with a new ticket", file.name);
                self.start(file).await
            }
            _ => Err(AppError::validation("session", "No failed upload to retry")),
        }
    }

    async fn run_phases(&self, session_id: Uuid, file: &UploadFile) -> AppResult<ImageRecord> {
        let ticket = self.backend.request_upload_ticket(file).await?;
        log::info!(
            "[{}] Ticket issued for image {} ({} {}, expires in {}s)",
            session_id,
            ticket.image.id,
            ticket.transfer.method,
            ticket.image.object_key,
            ticket.transfer.expires_in_sec
        );
        let transfer = ticket.transfer.clone();
        let image = ticket.image.clone();
        let moved = self.tracker.mark_transferring(ticket);
        debug_assert!(moved, "ticket issued outside requesting_ticket");

        self.backend.transfer(&transfer, file.bytes.clone()).await?;
        log::info!("[{}] Transferred {} bytes to storage", session_id, file.size());
        let moved = self.tracker.mark_confirming();
        debug_assert!(moved, "transfer finished outside transferring");

        self.backend.complete_upload(&image).await?;
        Ok(image)
    }
}

/// Fails the session if `start` is dropped before reaching a terminal state.
struct CancelGuard<'a> {
    tracker: &'a ProgressTracker,
    session_id: Uuid,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.mark_cancelled(self.session_id) {
            log::warn!("[{}] Upload dropped before finishing", self.session_id);
        }
    }
}
