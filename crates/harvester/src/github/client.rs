//! GitHub API client: request building, rate-limit handling and link parsing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::GitHubError;
use super::pagination::{PageRequest, Paginator};
use super::types::GitHubRateLimitResponse;
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::RateLimiter;
use crate::sync::{HarvestProgress, ProgressCallback, emit};

/// Public GitHub REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "harvester";

/// Relations extracted from a `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRelations {
    /// URL of the next page (from rel="next").
    pub next: Option<String>,
    /// URL of the last page (from rel="last").
    pub last: Option<String>,
}

/// Parse an RFC 5988 `Link` header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/repositories/1/commits?page=2>; rel="next", <...&page=9>; rel="last"`
pub fn parse_link_header(link_header: &str) -> LinkRelations {
    let mut links = LinkRelations::default();

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if let (Some(url), Some(rels)) = (url, rel) {
            for rel_type in rels.split_whitespace() {
                match rel_type {
                    "next" => links.next = Some(url.to_string()),
                    "last" => links.last = Some(url.to_string()),
                    _ => {}
                }
            }
        }
    }

    links
}

/// Extract the remaining budget and reset time from GitHub response headers.
pub fn parse_rate_limit_headers(response: &HttpResponse) -> Option<(u64, DateTime<Utc>)> {
    let remaining = response
        .header("x-ratelimit-remaining")
        .and_then(|v| v.trim().parse::<u64>().ok())?;
    let reset_epoch = response
        .header("x-ratelimit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0).unwrap_or_else(Utc::now);
    Some((remaining, reset_at))
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Whether a response is a rate-limit rejection rather than a real failure.
///
/// GitHub answers exhausted primary limits with 403 and secondary limits
/// with 403 or 429; the body mentions the rate limit in both cases.
pub fn is_rate_limit_rejection(response: &HttpResponse) -> bool {
    if response.status != 403 && response.status != 429 {
        return false;
    }
    if response.status == 429 || response.header("retry-after").is_some() {
        return true;
    }
    if response.header("x-ratelimit-remaining").map(str::trim) == Some("0") {
        return true;
    }
    response.body_text().to_ascii_lowercase().contains("rate limit")
}

/// A decoded 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// JSON body.
    pub body: Value,
    /// URL of the next page, if the response advertised one.
    pub next_url: Option<String>,
}

/// GitHub REST client.
///
/// Every request goes through the owned [`RateLimiter`]: the limiter is
/// consulted before the call and updated from the response headers after it,
/// whatever the status.
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    token: Option<String>,
    api_url: String,
    rate_limiter: RateLimiter,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl GitHubClient {
    /// Create a client for api.github.com backed by reqwest.
    pub fn new(token: Option<String>) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::default()), token)
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, token: Option<String>) -> Self {
        Self {
            transport,
            token: token.filter(|t| !t.trim().is_empty()),
            api_url: DEFAULT_API_URL.to_string(),
            rate_limiter: RateLimiter::new(),
            on_progress: None,
        }
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Report rate-limit waits through a progress callback.
    #[must_use]
    pub fn with_progress(mut self, on_progress: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Absolute URL for an API path such as `/repos/o/r/commits`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn build_request(&self, url: &str) -> HttpRequest {
        let mut headers = vec![
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("X-GitHub-Api-Version".to_string(), "2022-11-28".to_string()),
        ];
        if let Some(token) = &self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            url: url.to_string(),
            headers,
        }
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_deref()
    }

    /// Issue a GET for one page.
    ///
    /// Rate-limit rejections are retried after waiting; each retry goes back
    /// through the limiter. Any other non-2xx status is returned as
    /// [`GitHubError::Http`] without retrying.
    pub async fn get(&self, request: &PageRequest) -> Result<ApiResponse, GitHubError> {
        let url = request.to_url()?;
        let mut attempt: u32 = 0;

        loop {
            if let Some(wait) = self.rate_limiter.state().wait_needed(Utc::now()) {
                emit(
                    self.progress(),
                    HarvestProgress::RateLimitWait {
                        wait_secs: wait.as_secs(),
                    },
                );
            }
            self.rate_limiter.before_call().await;

            tracing::debug!(url = %url, attempt, "GET");
            let response = self.transport.get(self.build_request(&url)).await?;

            if let Some((remaining, reset_at)) = parse_rate_limit_headers(&response) {
                self.rate_limiter.record_response(remaining, reset_at);
            }

            if response.is_success() {
                let body: Value = serde_json::from_slice(&response.body)
                    .map_err(|e| GitHubError::malformed(&url, format!("invalid JSON: {e}")))?;
                let next_url = response
                    .header("link")
                    .and_then(|h| parse_link_header(h).next);
                return Ok(ApiResponse { body, next_url });
            }

            if is_rate_limit_rejection(&response) {
                attempt += 1;
                emit(
                    self.progress(),
                    HarvestProgress::RateLimitRetry {
                        url: url.clone(),
                        attempt,
                    },
                );
                self.rate_limiter
                    .wait_after_rejection(parse_retry_after(&response))
                    .await;
                continue;
            }

            return Err(GitHubError::Http {
                status: response.status,
                body: response.body_text(),
            });
        }
    }

    /// GET a single API path and return its JSON body.
    pub async fn get_json(&self, path: &str) -> Result<Value, GitHubError> {
        let request = PageRequest::new(self.endpoint(path));
        Ok(self.get(&request).await?.body)
    }

    /// GET a single API path and deserialize the body.
    pub async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitHubError> {
        let body = self.get_json(path).await?;
        serde_json::from_value(body)
            .map_err(|e| GitHubError::malformed(self.endpoint(path), e.to_string()))
    }

    /// Current rate limit status for all resources.
    pub async fn get_rate_limits(&self) -> Result<GitHubRateLimitResponse, GitHubError> {
        self.get_typed("/rate_limit").await
    }

    /// Lazily page through a list endpoint.
    pub fn paginate(&self, request: PageRequest, max_items: Option<usize>) -> Paginator<'_> {
        Paginator::new(self, request, max_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_link_header_next_and_last() {
        let header = "<https://api.github.com/repositories/1/commits?page=2>; rel=\"next\", \
                      <https://api.github.com/repositories/1/commits?page=9>; rel=\"last\"";
        let links = parse_link_header(header);
        assert_eq!(
            links.next.as_deref(),
            Some("https://api.github.com/repositories/1/commits?page=2")
        );
        assert_eq!(
            links.last.as_deref(),
            Some("https://api.github.com/repositories/1/commits?page=9")
        );
    }

    #[test]
    fn test_parse_link_header_without_next() {
        let header = "<https://api.github.com/x?page=1>; rel=\"prev\", \
                      <https://api.github.com/x?page=1>; rel=\"first\"";
        assert_eq!(parse_link_header(header), LinkRelations::default());
    }

    #[test]
    fn test_parse_rate_limit_headers() {
        let resp = response(
            200,
            &[
                ("X-RateLimit-Remaining", "42"),
                ("X-RateLimit-Reset", "2000000000"),
            ],
            "[]",
        );
        let (remaining, reset_at) = parse_rate_limit_headers(&resp).expect("headers");
        assert_eq!(remaining, 42);
        assert_eq!(reset_at.timestamp(), 2000000000);

        let missing = response(200, &[], "[]");
        assert!(parse_rate_limit_headers(&missing).is_none());
    }

    #[test]
    fn test_rate_limit_rejection_detection() {
        let primary = response(
            403,
            &[("x-ratelimit-remaining", "0")],
            "{\"message\":\"API rate limit exceeded\"}",
        );
        assert!(is_rate_limit_rejection(&primary));

        let secondary = response(
            403,
            &[],
            "{\"message\":\"You have exceeded a secondary rate limit\"}",
        );
        assert!(is_rate_limit_rejection(&secondary));

        let too_many = response(429, &[], "");
        assert!(is_rate_limit_rejection(&too_many));

        let forbidden = response(403, &[], "{\"message\":\"Resource not accessible\"}");
        assert!(!is_rate_limit_rejection(&forbidden));

        let server_error = response(500, &[], "rate limit");
        assert!(!is_rate_limit_rejection(&server_error));
    }

    #[tokio::test]
    async fn get_sends_bearer_token_and_records_rate_limit() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(
            Arc::new(transport.clone()),
            Some("secret".to_string()),
        );
        let url = client.endpoint("/users/octocat");
        transport.push_json(
            url.clone(),
            serde_json::json!({"login": "octocat"}),
            &[
                ("x-ratelimit-remaining", "99"),
                ("x-ratelimit-reset", "2000000000"),
            ],
        );

        let body = client.get_json("/users/octocat").await.expect("profile");
        assert_eq!(body["login"], "octocat");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(
            requests[0]
                .headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer secret")
        );
        assert_eq!(client.rate_limiter().state().remaining, Some(99));
    }

    #[tokio::test]
    async fn get_without_token_sends_no_authorization() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None);
        transport.push_json(client.endpoint("/x"), serde_json::json!([]), &[]);

        client.get_json("/x").await.expect("ok");
        assert!(
            !transport.requests()[0]
                .headers
                .iter()
                .any(|(k, _)| k == "Authorization")
        );
    }

    #[tokio::test]
    async fn get_returns_http_error_without_retry() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None);
        let url = client.endpoint("/repos/o/r/commits");
        transport.push_response(url.clone(), response(500, &[], "boom"));

        let err = client.get_json("/repos/o/r/commits").await.expect_err("500");
        match err {
            GitHubError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn get_retries_rate_limit_rejection_after_waiting() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None);
        let url = client.endpoint("/repos/o/r/pulls");
        transport.push_response(
            url.clone(),
            response(
                403,
                &[("retry-after", "30")],
                "{\"message\":\"secondary rate limit\"}",
            ),
        );
        transport.push_json(url.clone(), serde_json::json!([{"number": 1}]), &[]);

        let start = tokio::time::Instant::now();
        let body = client.get_json("/repos/o/r/pulls").await.expect("retried");

        assert_eq!(body[0]["number"], 1);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(transport.requested_urls(), vec![url.clone(), url]);
    }

    #[tokio::test(start_paused = true)]
    async fn get_waits_for_reset_after_exhausted_rejection() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None);
        let url = client.endpoint("/repos/o/r/commits");

        let reset = (Utc::now() + chrono::Duration::seconds(10)).timestamp();
        let reset_header = reset.to_string();
        transport.push_response(
            url.clone(),
            response(
                403,
                &[
                    ("x-ratelimit-remaining", "0"),
                    ("x-ratelimit-reset", reset_header.as_str()),
                ],
                "{\"message\":\"API rate limit exceeded\"}",
            ),
        );
        transport.push_json(url.clone(), serde_json::json!([{"sha": "c1"}]), &[]);

        let reset_at = DateTime::from_timestamp(reset, 0).expect("valid reset");
        let reset_delta = (reset_at - Utc::now()).to_std().expect("reset in the future");
        let start = tokio::time::Instant::now();
        let body = client.get_json("/repos/o/r/commits").await.expect("retried");

        assert_eq!(body[0]["sha"], "c1");
        assert_eq!(transport.requested_urls(), vec![url.clone(), url]);
        let elapsed = start.elapsed();
        assert!(elapsed >= reset_delta, "waited {elapsed:?}, reset in {reset_delta:?}");
        // Timer deadlines round up to the next millisecond.
        let ceiling =
            reset_delta + crate::rate_limit::DEFAULT_SAFETY_MARGIN + Duration::from_millis(1);
        assert!(elapsed <= ceiling, "waited {elapsed:?}, reset in {reset_delta:?}");
    }

    #[tokio::test]
    async fn get_reports_invalid_json_as_malformed() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None);
        transport.push_response(client.endpoint("/x"), response(200, &[], "not json"));

        let err = client.get_json("/x").await.expect_err("malformed");
        assert!(matches!(err, GitHubError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn get_rate_limits_decodes_resources() {
        let transport = MockTransport::new();
        let client = GitHubClient::with_transport(Arc::new(transport.clone()), None)
            .with_api_url("https://ghe.example.com/api/v3/");
        assert_eq!(client.api_url(), "https://ghe.example.com/api/v3");
        transport.push_json(
            "https://ghe.example.com/api/v3/rate_limit",
            serde_json::json!({
                "resources": {
                    "core": {"limit": 5000, "used": 10, "remaining": 4990, "reset": 2000000000},
                    "search": {"limit": 30, "used": 0, "remaining": 30, "reset": 2000000000}
                }
            }),
            &[],
        );

        let limits = client.get_rate_limits().await.expect("limits");
        assert_eq!(limits.resources.core.remaining, 4990);
    }
}
