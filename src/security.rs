use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult, Rejection};

/// MIME types the storage broker accepts.
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/heic"];

/// 50 MiB
pub const MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

pub struct InputValidator;

impl InputValidator {
    /// Classify an upload candidate. Pure: no I/O.
    ///
    /// The content type must match an allowed value exactly, since it is sent to the
    /// broker as given.
    pub fn validate_upload(content_type: &str, size: u64) -> Result<(), Rejection> {
        if !ALLOWED_MIME_TYPES.contains(&content_type) {
            return Err(Rejection::UnsupportedType {
                content_type: content_type.to_string(),
            });
        }

        if size > MAX_UPLOAD_SIZE {
            return Err(Rejection::TooLarge {
                size,
                max: MAX_UPLOAD_SIZE,
            });
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        // Remove or replace unsafe characters in filenames
        let trimmed = filename.trim();
        let sanitized = match unsafe_filename_chars() {
            Some(pattern) => pattern.replace_all(trimmed, "_").to_string(),
            None => trimmed.to_string(),
        };

        // Limit length
        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }

    pub fn validate_base_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("api_base_url", "Base URL cannot be empty"));
        }

        let pattern = base_url_pattern()
            .ok_or_else(|| AppError::Config("Base URL pattern failed to compile".to_string()))?;
        if !pattern.is_match(trimmed) {
            return Err(AppError::validation(
                "api_base_url",
                "Must be an http:// or https:// address without query or fragment",
            ));
        }

        Ok(())
    }
}

fn unsafe_filename_chars() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).ok())
        .as_ref()
}

fn base_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^https?://[^\s/?#]+(:\d+)?(/[^\s?#]*)?$").ok())
        .as_ref()
}

/// Detect MIME type based on file extension
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") | Some("heif") => "image/heic",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
