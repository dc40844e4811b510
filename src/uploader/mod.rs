// Main uploader module - orchestrates presigned image uploads
//
// Ticket request, storage transfer and confirmation for one file at a time

pub mod backend_client;
pub mod orchestrator;
pub mod progress_tracker;

pub use orchestrator::UploadOrchestrator;
pub use progress_tracker::{SessionState, UploadPhase, UploadSession};
