use bytes::Bytes;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::models::{
    BackendErrorBody, ImagePage, ImageRecord, TransferInstructions, UploadCompleteRequest,
    UploadFile, UploadTicket, UploadTicketRequest, ViewUrlEntry, ViewUrlRequest, ViewUrlsRequest,
    ViewUrlsResponse,
};

/// Page size bounds enforced by the listing endpoint.
const MAX_PAGE_LIMIT: u32 = 100;

type ErrorMapper = fn(Option<u16>, String) -> AppError;

/// Typed client for the image broker API and the presigned storage endpoint.
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl BackendClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(Arc::new(transport), config.api_base_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /images/upload-request`
    pub async fn request_upload_ticket(&self, file: &UploadFile) -> AppResult<UploadTicket> {
        let payload = UploadTicketRequest {
            file_name: file.name.clone(),
            content_type: file.content_type.clone(),
            file_size: file.size(),
        };
        let url = self.endpoint(&["images", "upload-request"], AppError::ticket_request)?;
        let request = HttpRequest::post_json(url, &payload)?;

        let response = self.call(request, AppError::ticket_request).await?;
        let ticket: UploadTicket = decode(&response, AppError::ticket_request)?;
        if ticket.transfer.expires_in_sec == 0 {
            return Err(AppError::ticket_request(
                Some(response.status),
                format!("Ticket for image {} has already expired", ticket.image.id),
            ));
        }
        Ok(ticket)
    }

    /// Replay the presigned request verbatim with the file bytes as body.
    pub async fn transfer(&self, transfer: &TransferInstructions, body: Bytes) -> AppResult<()> {
        let request = HttpRequest {
            method: transfer.method.clone(),
            url: transfer.url.clone(),
            headers: transfer
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body: Some(body),
        };

        self.call(request, AppError::storage_transfer).await?;
        Ok(())
    }

    /// `POST /images/upload-complete`
    pub async fn complete_upload(&self, image: &ImageRecord) -> AppResult<()> {
        let payload = UploadCompleteRequest {
            id: image.id.clone(),
            object_key: image.object_key.clone(),
        };
        let url = self.endpoint(&["images", "upload-complete"], AppError::completion)?;
        let request = HttpRequest::post_json(url, &payload)?;

        self.call(request, AppError::completion).await?;
        Ok(())
    }

    /// `POST /images/view-urls` for the whole batch in one request.
    pub async fn fetch_view_urls(
        &self,
        ids: &[String],
        ttl_sec: Option<u32>,
    ) -> AppResult<Vec<ViewUrlEntry>> {
        let payload = ViewUrlsRequest {
            requests: ids
                .iter()
                .map(|id| ViewUrlRequest { id: id.clone() })
                .collect(),
            ttl_sec,
        };
        let url = self.endpoint(&["images", "view-urls"], AppError::view_url_fetch)?;
        let request = HttpRequest::post_json(url, &payload)?;

        let response = self.call(request, AppError::view_url_fetch).await?;
        let body: ViewUrlsResponse = decode(&response, AppError::view_url_fetch)?;
        Ok(body.results)
    }

    /// `GET /images` for a single page.
    pub async fn list_images(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> AppResult<ImagePage> {
        let mut url = self.endpoint_url(&["images"], AppError::list_images)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.clamp(1, MAX_PAGE_LIMIT).to_string());
            }
        }
        // An empty query_pairs_mut still leaves a trailing '?'
        if url.query() == Some("") {
            url.set_query(None);
        }

        let response = self
            .call(HttpRequest::get(url.to_string()), AppError::list_images)
            .await?;
        decode(&response, AppError::list_images)
    }

    /// `GET /images/{id}`
    pub async fn get_image(&self, id: &str) -> AppResult<ImageRecord> {
        let url = self.endpoint(&["images", id], AppError::list_images)?;
        let response = self
            .call(HttpRequest::get(url), AppError::list_images)
            .await?;
        decode(&response, AppError::list_images)
    }

    async fn call(&self, request: HttpRequest, map_err: ErrorMapper) -> AppResult<HttpResponse> {
        let method = request.method.clone();
        let url = redact_query(&request.url).to_string();

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| map_err(None, e.to_string()))?;

        if response.is_success() {
            log::debug!("{} {} -> {}", method, url, response.status);
            return Ok(response);
        }

        let message = describe_error_body(&response);
        log::warn!(
            "{} {} failed with {}: {}",
            method,
            url,
            response.status,
            message
        );
        Err(map_err(Some(response.status), message))
    }

    fn endpoint(&self, segments: &[&str], map_err: ErrorMapper) -> AppResult<String> {
        Ok(self.endpoint_url(segments, map_err)?.to_string())
    }

    fn endpoint_url(&self, segments: &[&str], map_err: ErrorMapper) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| map_err(None, format!("Invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| map_err(None, format!("Base URL {} cannot have a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Presigned URLs carry their signature in the query string; keep it out of logs.
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn decode<T: DeserializeOwned>(response: &HttpResponse, map_err: ErrorMapper) -> AppResult<T> {
    response
        .json()
        .map_err(|e| map_err(Some(response.status), format!("Invalid response body: {}", e)))
}

/// Build a readable message from a failed response.
fn describe_error_body(response: &HttpResponse) -> String {
    if let Ok(body) = serde_json::from_slice::<BackendErrorBody>(&response.body) {
        let detail = body.error;
        if !detail.code.is_empty() || !detail.message.is_empty() {
            let mut message = match (detail.code.is_empty(), detail.message.is_empty()) {
                (false, false) => format!("{}: {}", detail.code, detail.message),
                (true, _) => detail.message,
                (_, true) => detail.code,
            };
            if let Some(request_id) = detail.request_id.filter(|id| !id.is_empty()) {
                message.push_str(&format!(" (request {})", request_id));
            }
            return message;
        }
    }

    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        "Unknown error".to_string()
    } else {
        text.chars().take(300).collect()
    }
}
