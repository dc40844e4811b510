// Gallery view state: one page of completed images plus their preview URLs.

pub mod view_urls;

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::ImageRecord;
use crate::uploader::backend_client::BackendClient;

pub use view_urls::{ResolvedUrls, ViewUrlResolver};

#[derive(Debug)]
pub struct GalleryPage {
    pub items: Vec<ImageRecord>,
    pub urls: HashMap<String, String>,
    pub next_cursor: Option<String>,
    /// Set when previews could not be refreshed; `urls` then only has cached entries.
    pub view_url_error: Option<AppError>,
}

impl GalleryPage {
    pub fn preview_url(&self, id: &str) -> Option<&str> {
        self.urls.get(id).map(String::as_str)
    }
}

pub struct Gallery {
    backend: BackendClient,
    resolver: ViewUrlResolver,
}

impl Gallery {
    pub fn new(backend: BackendClient, clock: Arc<dyn Clock>) -> Self {
        let resolver = ViewUrlResolver::new(backend.clone(), clock);
        Self { backend, resolver }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        let backend = BackendClient::from_config(config)?;
        let resolver = ViewUrlResolver::new(backend.clone(), Arc::new(SystemClock))
            .with_ttl(config.view_url_ttl_secs);
        Ok(Self { backend, resolver })
    }

    pub fn resolver(&self) -> &ViewUrlResolver {
        &self.resolver
    }

    /// Load one page of images and resolve their preview URLs in a single batch.
    pub async fn load_page(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> AppResult<GalleryPage> {
        let page = self.backend.list_images(cursor, limit).await?;
        log::info!(
            "Loaded {} images (more: {})",
            page.items.len(),
            page.next_cursor.is_some()
        );

        let ResolvedUrls { urls, error } = if page.items.is_empty() {
            ResolvedUrls::default()
        } else {
            self.resolver
                .resolve(page.items.iter().map(|image| image.id.as_str()))
                .await
        };

        Ok(GalleryPage {
            items: page.items,
            urls,
            next_cursor: page.next_cursor,
            view_url_error: error,
        })
    }

    pub async fn get_image(&self, id: &str) -> AppResult<ImageRecord> {
        self.backend.get_image(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::fake::ScriptedTransport;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn image(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "objectKey": format!("images/{}.jpg", id),
            "originalName": format!("{}.jpg", id),
            "mimeType": "image/jpeg",
            "byteSize": 2048,
            "uploadedAt": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn page_items_are_resolved_in_one_batch() {
        let now = Utc::now();
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(200, json!({"items": [image("a"), image("b")], "nextCursor": "next"}))
            .respond(
                200,
                json!({"results": [{
                    "id": "a",
                    "url": "https://s3/a",
                    "expiresAt": (now + Duration::minutes(5)).to_rfc3339()
                }]}),
            );
        let gallery = Gallery::new(
            BackendClient::new(transport.clone(), "http://api.test"),
            Arc::new(ManualClock::new(now)),
        );

        let page = gallery.load_page(None, Some(20)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].uploaded_at.is_some());
        assert_eq!(page.next_cursor.as_deref(), Some("next"));
        assert_eq!(page.preview_url("a"), Some("https://s3/a"));
        assert_eq!(page.preview_url("b"), None);
        assert!(page.view_url_error.is_none());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn empty_page_skips_url_resolution() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, json!({"items": []}));
        let gallery = Gallery::new(
            BackendClient::new(transport.clone(), "http://api.test"),
            Arc::new(ManualClock::new(Utc::now())),
        );

        let page = gallery.load_page(None, None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_is_a_hard_error_but_url_failure_is_not() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(
                500,
                json!({"error": {"code": "INTERNAL_ERROR", "message": "Failed to fetch images"}}),
            )
            .respond(200, json!({"items": [image("a")]}))
            .respond(500, json!("oops"));
        let gallery = Gallery::new(
            BackendClient::new(transport.clone(), "http://api.test"),
            Arc::new(ManualClock::new(Utc::now())),
        );

        let err = gallery.load_page(None, None).await.unwrap_err();
        assert!(matches!(err, AppError::ListImages { status: Some(500), .. }));

        let page = gallery.load_page(None, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.urls.is_empty());
        assert!(page.view_url_error.is_some());
    }
}
