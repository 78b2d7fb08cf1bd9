//! USAspending API endpoints

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use spendline_core::{ApiClient, ApiSettings, CancelToken, HttpError, RateLimiter};

pub const DEFAULT_API_ROOT: &str = "https://api.usaspending.gov";

/// Sustained request rate the public API tolerates (~1000 requests per 5 minutes)
pub const DEFAULT_MAX_RPS: f64 = 3.0;

pub const BULK_AWARDS_PATH: &str = "/api/v2/bulk_download/awards/";
pub const DOWNLOAD_STATUS_PATH: &str = "/api/v2/download/status";
pub const SEARCH_AWARDS_PATH: &str = "/api/v2/search/spending_by_award/";

/// Thin endpoint layer over the rate-limited [`ApiClient`]
#[derive(Debug)]
pub struct UsaClient {
    http: ApiClient,
}

impl UsaClient {
    pub fn new(
        api_root: &str,
        settings: ApiSettings,
        limiter: Arc<RateLimiter>,
        cancel: CancelToken,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            http: ApiClient::new(api_root, settings, limiter, cancel)?,
        })
    }

    pub fn start_bulk_awards<B: Serialize + ?Sized>(
        &self,
        payload: &B,
    ) -> Result<Value, HttpError> {
        self.http.post_json(BULK_AWARDS_PATH, payload)
    }

    pub fn download_status(&self, file_name: &str) -> Result<Value, HttpError> {
        self.http
            .get_json(DOWNLOAD_STATUS_PATH, &[("file_name", file_name)])
    }

    pub fn search_spending_by_award<B: Serialize + ?Sized>(
        &self,
        payload: &B,
    ) -> Result<Value, HttpError> {
        self.http.post_json(SEARCH_AWARDS_PATH, payload)
    }
}
