//! GitHub API client.
//!
//! # Module Structure
//!
//! - [`error`] - Error types for GitHub API operations
//! - [`types`] - Repository identifiers and rate limit payloads
//! - [`client`] - Request building, rate limit handling, link parsing
//! - [`pagination`] - Lazy link-following pagination

mod client;
mod error;
mod pagination;
mod types;

pub use client::{
    ApiResponse, DEFAULT_API_URL, GitHubClient, LinkRelations, is_rate_limit_rejection,
    parse_link_header, parse_rate_limit_headers, parse_retry_after,
};
pub use error::GitHubError;
pub use pagination::{PageRequest, Paginator};
pub use types::{
    GitHubRateLimitResponse, GitHubRateLimits, InvalidRepoSlug, RateLimitResource, RepoSlug,
};
