//! Rate-limited JSON API client with transient-error retry.
//!
//! Uses async reqwest internally on a shared tokio runtime, but presents a
//! blocking interface: the pipeline has a single thread of control and every
//! request goes through the shared [`RateLimiter`].

use std::io::Read;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::error::HttpError;
use crate::rate_limit::RateLimiter;
use crate::retry::Backoff;
use crate::shutdown::CancelToken;

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Default identification string sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("spendline/", env!("CARGO_PKG_VERSION"));

/// Transport settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub user_agent: String,
    /// Per-request timeout (connect + response + body)
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Total time spent retrying transport errors before giving up
    pub retry_budget: Duration,
    /// First transport-retry delay (doubles on each retry)
    pub retry_initial: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            retry_budget: Duration::from_secs(180),
            retry_initial: Duration::from_secs(1),
        }
    }
}

/// Blocking JSON client bound to one API root.
///
/// Every request waits on the shared rate limiter, sends the fixed
/// identification and content-negotiation headers, fails on non-2xx, and
/// decodes JSON bodies. Non-JSON bodies yield an empty object.
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    cancel: CancelToken,
    settings: ApiSettings,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        settings: ApiSettings,
        limiter: Arc<RateLimiter>,
        cancel: CancelToken,
    ) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| HttpError::from_reqwest(&e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            limiter,
            cancel,
            settings,
        })
    }

    pub fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, HttpError> {
        self.request(Method::GET, path, query, None)
    }

    pub fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, HttpError> {
        let body = serde_json::to_vec(body).map_err(|e| HttpError::Decode {
            message: format!("cannot encode request body: {e}"),
        })?;
        self.request(Method::POST, path, &[], Some(body))
    }

    /// Issue a request, retrying transport errors with exponential backoff
    /// until `retry_budget` is spent. HTTP status errors are never retried here.
    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Value, HttpError> {
        let url = self.url_for(path);
        let start = Instant::now();
        let mut backoff = Backoff::exponential(self.settings.retry_initial, self.settings.retry_budget);
        let mut attempt = 0u32;
        loop {
            self.cancel.check()?;
            attempt += 1;
            match self.attempt(&method, &url, query, body.as_deref()) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    if start.elapsed() + delay > self.settings.retry_budget {
                        log::warn!(
                            "{method} {url}: giving up after {attempt} attempts ({:.0}s): {e}",
                            start.elapsed().as_secs_f64()
                        );
                        return Err(e);
                    }
                    log::info!("{method} {url}: {e}; retrying in {delay:?} (attempt {attempt})");
                    self.cancel.sleep(delay)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<Value, HttpError> {
        self.limiter.wait();

        let (status, headers, bytes) = SHARED_RUNTIME.handle().block_on(async {
            let mut req = self
                .client
                .request(method.clone(), url)
                .timeout(self.settings.request_timeout);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.to_vec());
            }
            let resp = req.send().await.map_err(|e| HttpError::from_reqwest(&e))?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let bytes = resp.bytes().await.map_err(|e| HttpError::from_reqwest(&e))?;
            Ok::<_, HttpError>((status, headers, bytes))
        })?;
        log::debug!("HTTP {method} {url} -> {}", status.as_u16());

        let body = decode_body(&headers, &bytes)?;
        if !status.is_success() {
            return Err(HttpError::status(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }
        parse_json_body(status, &headers, &body)
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Gunzip the body when the server honoured `Accept-Encoding: gzip`
fn decode_body(headers: &HeaderMap, bytes: &[u8]) -> Result<Vec<u8>, HttpError> {
    let gzipped = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| HttpError::Decode {
            message: format!("gzip body: {e}"),
        })?;
    Ok(out)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

fn parse_json_body(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Result<Value, HttpError> {
    if !is_json(headers) || body.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| HttpError::Decode {
        message: format!("HTTP {}: {e}", status.as_u16()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn headers(pairs: &[(reqwest::header::HeaderName, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(k.clone(), HeaderValue::from_static(v));
        }
        h
    }

    #[test]
    fn plain_body_passes_through() {
        let h = headers(&[]);
        assert_eq!(decode_body(&h, b"abc").unwrap(), b"abc");
    }

    #[test]
    fn gzip_body_is_decoded() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"ok":true}"#).unwrap();
        let gz = enc.finish().unwrap();
        let h = headers(&[(CONTENT_ENCODING, "gzip")]);
        assert_eq!(decode_body(&h, &gz).unwrap(), br#"{"ok":true}"#);
    }

    #[test]
    fn corrupt_gzip_is_decode_error() {
        let h = headers(&[(CONTENT_ENCODING, "gzip")]);
        assert!(matches!(
            decode_body(&h, b"not gzip"),
            Err(HttpError::Decode { .. })
        ));
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json(&headers(&[(CONTENT_TYPE, "application/json")])));
        assert!(is_json(&headers(&[(
            CONTENT_TYPE,
            "application/json; charset=utf-8"
        )])));
        assert!(!is_json(&headers(&[(CONTENT_TYPE, "text/html")])));
        assert!(!is_json(&headers(&[])));
    }

    #[test]
    fn non_json_yields_empty_object() {
        let v = parse_json_body(StatusCode::OK, &headers(&[(CONTENT_TYPE, "text/plain")]), b"hi")
            .unwrap();
        assert_eq!(v, serde_json::json!({}));
    }

    #[test]
    fn url_for_joins_paths() {
        let client = ApiClient::new(
            "https://api.example.gov/",
            ApiSettings::default(),
            Arc::new(RateLimiter::new(10.0)),
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(
            client.url_for("/api/v2/download/status"),
            "https://api.example.gov/api/v2/download/status"
        );
        assert_eq!(
            client.url_for("https://files.example.gov/x.zip"),
            "https://files.example.gov/x.zip"
        );
    }
}
