//! Client-side presigned image uploads and gallery preview URL caching.

pub mod clock;
pub mod config;
pub mod errors;
pub mod gallery;
pub mod http;
pub mod models;
pub mod security;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use gallery::{Gallery, GalleryPage, ViewUrlResolver};
pub use uploader::{UploadOrchestrator, UploadPhase, UploadSession};

/// Initialize logging. `RUST_LOG` still takes precedence over `level`.
pub fn init_logging(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();

    if result.is_ok() {
        log::info!("Logging initialized at {}", level);
    }
}
