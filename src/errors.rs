use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Why a file was refused before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("unsupported file type '{content_type}'. Please select a JPEG, PNG, WebP or HEIC image")]
    UnsupportedType { content_type: String },

    #[error("file is {size} bytes. Maximum size is {}MB", .max / (1024 * 1024))]
    TooLarge { size: u64, max: u64 },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(Rejection),

    #[error("Upload ticket request failed{}: {message}", status_suffix(.status))]
    TicketRequest { status: Option<u16>, message: String },

    #[error("Storage transfer failed{}: {message}", status_suffix(.status))]
    StorageTransfer { status: Option<u16>, message: String },

    #[error("Upload completion failed{}: {message}. The file may be stored but not marked complete", status_suffix(.status))]
    Completion { status: Option<u16>, message: String },

    #[error("An upload is already in progress")]
    Busy,

    #[error("Failed to fetch image URLs{}: {message}", status_suffix(.status))]
    ViewUrlFetch { status: Option<u16>, message: String },

    #[error("Failed to fetch images{}: {message}", status_suffix(.status))]
    ListImages { status: Option<u16>, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

/// Convert to string for UI bindings
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn ticket_request(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::TicketRequest {
            status,
            message: message.into(),
        }
    }

    pub fn storage_transfer(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::StorageTransfer {
            status,
            message: message.into(),
        }
    }

    pub fn completion(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Completion {
            status,
            message: message.into(),
        }
    }

    pub fn view_url_fetch(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ViewUrlFetch {
            status,
            message: message.into(),
        }
    }

    pub fn list_images(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ListImages {
            status,
            message: message.into(),
        }
    }

    /// HTTP status attached to a failed backend or storage call, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AppError::TicketRequest { status, .. }
            | AppError::StorageTransfer { status, .. }
            | AppError::Completion { status, .. }
            | AppError::ViewUrlFetch { status, .. }
            | AppError::ListImages { status, .. } => *status,
            _ => None,
        }
    }

    /// The bytes reached storage but the backend never recorded the upload as complete.
    pub fn is_completion_inconsistency(&self) -> bool {
        matches!(self, AppError::Completion { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_) | AppError::Validation { .. } | AppError::Config(_)
        )
    }
}

/// Lock a state mutex, recovering the data if a previous holder panicked.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, operation: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!(
                "State lock poisoned during {} (non-critical), recovering",
                operation
            );
            poisoned.into_inner()
        }
    }
}
