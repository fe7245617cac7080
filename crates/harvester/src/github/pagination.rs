//! Lazy link-following pagination.
//!
//! A [`Paginator`] walks a list endpoint one page at a time, following the
//! `rel="next"` link of each response. Pages are only requested when the
//! caller asks for more items, so a consumer that stops early never pays for
//! pages it does not read.

use std::collections::VecDeque;

use serde_json::Value;
use url::Url;

use super::client::GitHubClient;
use super::error::GitHubError;

/// One fetchable page: a base URL plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Value of a query parameter, if set.
    #[must_use]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The full URL with query parameters encoded.
    ///
    /// Without query parameters the URL is returned untouched, so `next`
    /// links are requested exactly as the server sent them.
    pub fn to_url(&self) -> Result<String, GitHubError> {
        if self.query.is_empty() {
            return Ok(self.url.clone());
        }
        let mut url = Url::parse(&self.url).map_err(|e| GitHubError::InvalidUrl {
            url: self.url.clone(),
            message: e.to_string(),
        })?;
        url.query_pairs_mut().extend_pairs(
            self.query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        Ok(url.into())
    }
}

/// A lazy, finite, non-restartable sequence of list items.
///
/// Once an error is returned or the sequence ends, no further requests are
/// made and [`Paginator::next_item`] keeps returning `Ok(None)`.
pub struct Paginator<'a> {
    client: &'a GitHubClient,
    next_request: Option<PageRequest>,
    buffer: VecDeque<Value>,
    max_items: Option<usize>,
    accepted: usize,
    pages_fetched: u32,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a GitHubClient, request: PageRequest, max_items: Option<usize>) -> Self {
        let next_request = if max_items == Some(0) {
            None
        } else {
            Some(request)
        };
        Self {
            client,
            next_request,
            buffer: VecDeque::new(),
            max_items,
            accepted: 0,
            pages_fetched: 0,
        }
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Next item, fetching the next page when the current one is drained.
    pub async fn next_item(&mut self) -> Result<Option<Value>, GitHubError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            let Some(request) = self.next_request.take() else {
                return Ok(None);
            };
            self.fetch_page(request).await?;
        }
    }

    /// Drain the remaining items into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<Value>, GitHubError> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    async fn fetch_page(&mut self, request: PageRequest) -> Result<(), GitHubError> {
        let response = self.client.get(&request).await?;
        self.pages_fetched += 1;

        let Value::Array(mut items) = response.body else {
            return Err(GitHubError::malformed(
                request.to_url().unwrap_or(request.url),
                "expected a JSON array",
            ));
        };

        if let Some(max) = self.max_items {
            items.truncate(max.saturating_sub(self.accepted));
        }
        self.accepted += items.len();

        let cap_reached = self.max_items.is_some_and(|max| self.accepted >= max);
        self.next_request = match response.next_url {
            Some(next) if !cap_reached => Some(PageRequest::new(next)),
            _ => None,
        };

        tracing::debug!(
            page = self.pages_fetched,
            count = items.len(),
            total_so_far = self.accepted,
            has_next = self.next_request.is_some(),
            "Fetched page"
        );

        self.buffer.extend(items);
        Ok(())
    }
}
