use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CollectionJob, ItemOutcome, JobContext, field_at, iso8601, str_at, time_at};
use crate::error::HarvestError;
use crate::github::{GitHubError, PageRequest};
use crate::sink::{FieldValue, OutputRecord, Table};
use crate::sync::types::Stream;

/// Commits on the default branch, newest first.
///
/// Resumes by listing from the last committed sha, which GitHub returns as
/// the first item; that item is recognized through the cursor and skipped.
/// Commits without a linked GitHub account are filtered out.
pub struct CommitsJob;

#[async_trait]
impl CollectionJob for CommitsJob {
    fn stream(&self) -> Stream {
        Stream::Commits
    }

    fn tables(&self) -> &'static [Table] {
        &[Table::Commits, Table::FileChanges]
    }

    fn initial_request(&self, cx: &JobContext<'_>) -> PageRequest {
        let path = format!("{}/commits", cx.options.repository.api_path());
        let mut request = PageRequest::new(cx.client.endpoint(&path))
            .query("per_page", cx.options.per_page)
            .query("since", iso8601(cx.since));
        if let Some(sha) = cx.last_cursor(Stream::Commits) {
            request = request.query("sha", sha);
        }
        request
    }

    fn item_key(&self, item: &Value) -> Option<String> {
        str_at(item, "/author/login")?;
        str_at(item, "/sha").map(str::to_string)
    }

    fn is_past_cutoff(&self, item: &Value, since: DateTime<Utc>) -> bool {
        time_at(item, "/commit/committer/date")
            .or_else(|| time_at(item, "/commit/author/date"))
            .is_some_and(|t| t < since)
    }

    async fn process(
        &self,
        cx: &mut JobContext<'_>,
        key: &str,
        item: &Value,
    ) -> Result<ItemOutcome, HarvestError> {
        let path = format!("{}/commits/{key}", cx.options.repository.api_path());
        let detail = match cx.client.get_json(&path).await {
            Ok(detail) => detail,
            Err(e @ GitHubError::MalformedResponse { .. }) => {
                tracing::warn!(sha = key, error = %e, "Skipping commit, malformed detail");
                return Ok(ItemOutcome::Skipped("malformed commit detail".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let files = detail
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        cx.batch.push(
            Table::Commits,
            OutputRecord::new()
                .with("sha", key)
                .with("author_login", field_at(item, "/author/login"))
                .with("author_name", field_at(item, "/commit/author/name"))
                .with("author_email", field_at(item, "/commit/author/email"))
                .with("authored_at", field_at(item, "/commit/author/date"))
                .with("committed_at", field_at(item, "/commit/committer/date"))
                .with("message", field_at(item, "/commit/message"))
                .with("additions", field_at(&detail, "/stats/additions"))
                .with("deletions", field_at(&detail, "/stats/deletions"))
                .with("total_changes", field_at(&detail, "/stats/total"))
                .with("files_changed", FieldValue::Int(files.len() as i64)),
        );

        for file in files {
            cx.batch.push(
                Table::FileChanges,
                OutputRecord::new()
                    .with("sha", key)
                    .with("filename", field_at(file, "/filename"))
                    .with("status", field_at(file, "/status"))
                    .with("additions", field_at(file, "/additions"))
                    .with("deletions", field_at(file, "/deletions"))
                    .with("changes", field_at(file, "/changes")),
            );
        }

        Ok(ItemOutcome::Collected)
    }
}
