use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::{lock_or_recover, AppError, AppResult};
use crate::models::{ImageRecord, UploadFile, UploadTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Idle,
    RequestingTicket,
    Transferring,
    Confirming,
    Done,
    Failed,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPhase::Idle => "idle",
            UploadPhase::RequestingTicket => "requesting_ticket",
            UploadPhase::Transferring => "transferring",
            UploadPhase::Confirming => "confirming",
            UploadPhase::Done => "done",
            UploadPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the session is. A ticket only exists while it is being consumed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    RequestingTicket,
    Transferring { ticket: UploadTicket },
    Confirming { ticket: UploadTicket },
    Done { image: ImageRecord },
    Failed {
        failed_phase: UploadPhase,
        error_message: String,
    },
}

/// Snapshot of the current upload attempt.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: Option<Uuid>,
    pub file: Option<UploadFile>,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    fn idle() -> Self {
        Self {
            session_id: None,
            file: None,
            state: SessionState::Idle,
            started_at: None,
        }
    }

    pub fn phase(&self) -> UploadPhase {
        match self.state {
            SessionState::Idle => UploadPhase::Idle,
            SessionState::RequestingTicket => UploadPhase::RequestingTicket,
            SessionState::Transferring { .. } => UploadPhase::Transferring,
            SessionState::Confirming { .. } => UploadPhase::Confirming,
            SessionState::Done { .. } => UploadPhase::Done,
            SessionState::Failed { .. } => UploadPhase::Failed,
        }
    }

    /// Fixed checkpoints per phase; a failure drops back to zero.
    pub fn progress_percent(&self) -> u8 {
        match self.state {
            SessionState::Idle | SessionState::RequestingTicket | SessionState::Failed { .. } => 0,
            SessionState::Transferring { .. } => 25,
            SessionState::Confirming { .. } => 75,
            SessionState::Done { .. } => 100,
        }
    }

    pub fn ticket(&self) -> Option<&UploadTicket> {
        match &self.state {
            SessionState::Transferring { ticket } | SessionState::Confirming { ticket } => {
                Some(ticket)
            }
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    /// Failed after the bytes reached storage.
    pub fn is_completion_inconsistency(&self) -> bool {
        matches!(
            self.state,
            SessionState::Failed {
                failed_phase: UploadPhase::Confirming,
                ..
            }
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::RequestingTicket
                | SessionState::Transferring { .. }
                | SessionState::Confirming { .. }
        )
    }
}

struct TrackerState {
    session: UploadSession,
    subscribers: Vec<mpsc::UnboundedSender<UploadSession>>,
}

/// Owns the session state and delivers every transition to subscribers in order.
pub struct ProgressTracker {
    inner: Mutex<TrackerState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                session: UploadSession::idle(),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> UploadSession {
        lock_or_recover(&self.inner, "snapshot").session.clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UploadSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock_or_recover(&self.inner, "subscribe").subscribers.push(tx);
        rx
    }

    /// Open a new attempt. Fails with `Busy` while a phase is in flight.
    pub fn begin(
        &self,
        session_id: Uuid,
        file: UploadFile,
        started_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut inner = lock_or_recover(&self.inner, "begin");
        if inner.session.is_active() {
            return Err(AppError::Busy);
        }

        inner.session = UploadSession {
            session_id: Some(session_id),
            file: Some(file),
            state: SessionState::RequestingTicket,
            started_at: Some(started_at),
        };
        publish(&mut inner);
        Ok(())
    }

    pub fn mark_transferring(&self, ticket: UploadTicket) -> bool {
        self.transition("transferring", |session| match session.state {
            SessionState::RequestingTicket => {
                session.state = SessionState::Transferring { ticket };
                true
            }
            _ => false,
        })
    }

    pub fn mark_confirming(&self) -> bool {
        self.transition("confirming", |session| {
            match std::mem::replace(&mut session.state, SessionState::Idle) {
                SessionState::Transferring { ticket } => {
                    session.state = SessionState::Confirming { ticket };
                    true
                }
                other => {
                    session.state = other;
                    false
                }
            }
        })
    }

    /// Done releases the ticket and the file.
    pub fn mark_done(&self, image: ImageRecord) -> bool {
        self.transition("done", |session| match session.state {
            SessionState::Confirming { .. } => {
                session.state = SessionState::Done { image };
                session.file = None;
                true
            }
            _ => false,
        })
    }

    /// Failing from any active phase drops the ticket. The file is kept for a retry.
    pub fn mark_failed(&self, error_message: String) -> bool {
        self.transition("failed", |session| {
            if !session.is_active() {
                return false;
            }
            session.state = SessionState::Failed {
                failed_phase: session.phase(),
                error_message,
            };
            true
        })
    }

    /// Fail `session_id` if it is still in flight. Used when the driving future is dropped.
    pub fn mark_cancelled(&self, session_id: Uuid) -> bool {
        let mut inner = lock_or_recover(&self.inner, "cancel");
        if inner.session.session_id != Some(session_id) || !inner.session.is_active() {
            return false;
        }

        let failed_phase = inner.session.phase();
        inner.session.state = SessionState::Failed {
            failed_phase,
            error_message: "Upload cancelled".to_string(),
        };
        log::warn!("Session {} cancelled during {}", session_id, failed_phase);
        publish(&mut inner);
        true
    }

    pub fn reset(&self) -> AppResult<()> {
        let mut inner = lock_or_recover(&self.inner, "reset");
        if inner.session.is_active() {
            return Err(AppError::Busy);
        }
        if matches!(inner.session.state, SessionState::Idle) {
            return Ok(());
        }

        inner.session = UploadSession::idle();
        publish(&mut inner);
        Ok(())
    }

    fn transition<F>(&self, operation: &str, f: F) -> bool
    where
        F: FnOnce(&mut UploadSession) -> bool,
    {
        let mut inner = lock_or_recover(&self.inner, operation);
        let from = inner.session.phase();
        if !f(&mut inner.session) {
            log::error!(
                "Rejected transition to {} from {} for session {:?}",
                operation,
                from,
                inner.session.session_id
            );
            return false;
        }

        log::debug!(
            "Session {:?}: {} -> {} ({}%)",
            inner.session.session_id,
            from,
            inner.session.phase(),
            inner.session.progress_percent()
        );
        publish(&mut inner);
        true
    }
}

fn publish(inner: &mut TrackerState) {
    let snapshot = inner.session.clone();
    inner
        .subscribers
        .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransferInstructions;
    use std::collections::HashMap;

    fn ticket() -> UploadTicket {
        UploadTicket {
            image: ImageRecord {
                id: "img1".to_string(),
                object_key: "images/img1.png".to_string(),
                original_name: "a.png".to_string(),
                mime_type: "image/png".to_string(),
                byte_size: 3,
                uploaded_at: None,
                status: Some("requested".to_string()),
            },
            transfer: TransferInstructions {
                method: "PUT".to_string(),
                url: "https://s3/x".to_string(),
                headers: HashMap::new(),
                expires_in_sec: 300,
            },
        }
    }

    fn file() -> UploadFile {
        UploadFile::new("a.png", "image/png", vec![1u8, 2, 3])
    }

    #[test]
    fn confirming_is_unreachable_without_a_ticket() {
        let tracker = ProgressTracker::new();
        tracker.begin(Uuid::new_v4(), file(), Utc::now()).unwrap();

        assert!(!tracker.mark_confirming());
        assert_eq!(tracker.snapshot().phase(), UploadPhase::RequestingTicket);
        assert!(!tracker.mark_done(ticket().image));
    }

    #[test]
    fn begin_is_refused_while_active() {
        let tracker = ProgressTracker::new();
        tracker.begin(Uuid::new_v4(), file(), Utc::now()).unwrap();
        assert!(matches!(
            tracker.begin(Uuid::new_v4(), file(), Utc::now()),
            Err(AppError::Busy)
        ));
        assert!(matches!(tracker.reset(), Err(AppError::Busy)));
    }

    #[test]
    fn done_releases_file_and_ticket() {
        let tracker = ProgressTracker::new();
        tracker.begin(Uuid::new_v4(), file(), Utc::now()).unwrap();
        assert!(tracker.mark_transferring(ticket()));
        assert_eq!(tracker.snapshot().ticket(), Some(&ticket()));
        assert!(tracker.mark_confirming());
        assert!(tracker.mark_done(ticket().image));

        let session = tracker.snapshot();
        assert_eq!(session.progress_percent(), 100);
        assert!(session.ticket().is_none());
        assert!(session.file.is_none());
        assert!(session.error_message().is_none());
    }

    #[test]
    fn failure_clears_ticket_and_progress_but_keeps_file() {
        let tracker = ProgressTracker::new();
        tracker.begin(Uuid::new_v4(), file(), Utc::now()).unwrap();
        tracker.mark_transferring(ticket());
        tracker.mark_confirming();
        assert!(tracker.mark_failed("boom".to_string()));

        let session = tracker.snapshot();
        assert_eq!(session.phase(), UploadPhase::Failed);
        assert_eq!(session.progress_percent(), 0);
        assert!(session.ticket().is_none());
        assert_eq!(session.error_message(), Some("boom"));
        assert!(session.is_completion_inconsistency());
        assert!(session.file.is_some());

        assert!(!tracker.mark_failed("again".to_string()));
        tracker.reset().unwrap();
        assert_eq!(tracker.snapshot().phase(), UploadPhase::Idle);
        assert!(tracker.snapshot().file.is_none());
    }

    #[test]
    fn cancel_only_applies_to_the_active_session() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id, file(), Utc::now()).unwrap();
        tracker.mark_transferring(ticket());

        assert!(!tracker.mark_cancelled(Uuid::new_v4()));
        assert!(tracker.mark_cancelled(id));

        let session = tracker.snapshot();
        assert!(matches!(
            session.state,
            SessionState::Failed {
                failed_phase: UploadPhase::Transferring,
                ..
            }
        ));
        assert_eq!(session.error_message(), Some("Upload cancelled"));
        assert!(!tracker.mark_cancelled(id));
    }

    #[test]
    fn subscribers_see_every_transition_and_closed_ones_are_dropped() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        let dropped = tracker.subscribe();
        drop(dropped);

        tracker.begin(Uuid::new_v4(), file(), Utc::now()).unwrap();
        tracker.mark_failed("ticket refused".to_string());
        tracker.reset().unwrap();

        let phases: Vec<UploadPhase> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|session| session.phase())
            .collect();
        assert_eq!(
            phases,
            vec![UploadPhase::RequestingTicket, UploadPhase::Failed, UploadPhase::Idle]
        );
        assert_eq!(lock_or_recover(&tracker.inner, "test").subscribers.len(), 1);
    }
}
