use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CollectionJob, ItemOutcome, JobContext, field_at, str_at, time_at};
use crate::error::HarvestError;
use crate::github::PageRequest;
use crate::sink::{OutputRecord, Table};
use crate::sync::types::Stream;

/// Processed-set holding committed pull request numbers.
pub const PROCESSED_PULL_REQUESTS: &str = "pull_requests";

/// Pull requests in any state, most recently updated first.
///
/// The listing has no stable resume position, so every run starts from the
/// top and skips numbers already in the processed set. The job ends at the
/// first pull request last updated before the lookback window.
pub struct PullRequestsJob;

#[async_trait]
impl CollectionJob for PullRequestsJob {
    fn stream(&self) -> Stream {
        Stream::PullRequests
    }

    fn tables(&self) -> &'static [Table] {
        &[Table::PullRequests, Table::ReviewRelationships]
    }

    fn initial_request(&self, cx: &JobContext<'_>) -> PageRequest {
        let path = format!("{}/pulls", cx.options.repository.api_path());
        PageRequest::new(cx.client.endpoint(&path))
            .query("state", "all")
            .query("sort", "updated")
            .query("direction", "desc")
            .query("per_page", cx.options.per_page)
    }

    fn item_key(&self, item: &Value) -> Option<String> {
        str_at(item, "/user/login")?;
        item.get("number").and_then(Value::as_u64).map(|n| n.to_string())
    }

    fn is_collected(&self, key: &str, cx: &JobContext<'_>) -> bool {
        cx.checkpoint
            .is_processed(self.stream().as_str(), PROCESSED_PULL_REQUESTS, key)
    }

    fn committed_set(&self) -> Option<&'static str> {
        Some(PROCESSED_PULL_REQUESTS)
    }

    fn is_past_cutoff(&self, item: &Value, since: DateTime<Utc>) -> bool {
        time_at(item, "/updated_at").is_some_and(|t| t < since)
    }

    async fn process(
        &self,
        cx: &mut JobContext<'_>,
        _key: &str,
        item: &Value,
    ) -> Result<ItemOutcome, HarvestError> {
        let author = field_at(item, "/user/login");

        cx.batch.push(
            Table::PullRequests,
            OutputRecord::new()
                .with("number", field_at(item, "/number"))
                .with("title", field_at(item, "/title"))
                .with("state", field_at(item, "/state"))
                .with("author_login", author.clone())
                .with("created_at", field_at(item, "/created_at"))
                .with("updated_at", field_at(item, "/updated_at"))
                .with("closed_at", field_at(item, "/closed_at"))
                .with("merged_at", field_at(item, "/merged_at"))
                .with("draft", field_at(item, "/draft"))
                .with("head_ref", field_at(item, "/head/ref"))
                .with("base_ref", field_at(item, "/base/ref")),
        );

        let reviewers = item
            .get("requested_reviewers")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for reviewer in reviewers.iter().filter_map(|r| str_at(r, "/login")) {
            cx.batch.push(
                Table::ReviewRelationships,
                OutputRecord::new()
                    .with("pull_number", field_at(item, "/number"))
                    .with("author_login", author.clone())
                    .with("reviewer_login", reviewer)
                    .with("relationship", "requested"),
            );
        }

        Ok(ItemOutcome::Collected)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::{OWNER, REPO, checkpoint, client, fixed_now, options};
    use super::*;
    use crate::github::GitHubClient;
    use crate::http::MockTransport;
    use crate::sink::{FieldValue, MemorySink};
    use crate::sync::engine::Harvester;
    use crate::sync::types::{CompletionReason, JobOutcome};

    fn pull(number: u64, updated_at: &str, reviewers: &[&str]) -> Value {
        json!({
            "number": number,
            "title": format!("PR #{number}"),
            "state": "open",
            "user": {"login": "author"},
            "created_at": "2026-08-01T00:00:00Z",
            "updated_at": updated_at,
            "closed_at": null,
            "merged_at": null,
            "draft": false,
            "head": {"ref": "feature"},
            "base": {"ref": "main"},
            "requested_reviewers": reviewers.iter().map(|r| json!({"login": r})).collect::<Vec<_>>()
        })
    }

    fn list_url(client: &GitHubClient) -> String {
        PageRequest::new(client.endpoint(&format!("/repos/{OWNER}/{REPO}/pulls")))
            .query("state", "all")
            .query("sort", "updated")
            .query("direction", "desc")
            .query("per_page", 100)
            .to_url()
            .unwrap()
    }

    fn numbers(sink: &MemorySink) -> Vec<String> {
        sink.rows(Table::PullRequests)
            .iter()
            .filter_map(|r| r.get("number").map(FieldValue::render))
            .collect()
    }

    #[tokio::test]
    async fn stops_at_first_pull_request_before_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let client = client(&transport);

        // Lookback is 90 days from 2026-10-01, so the cutoff is 2026-07-03.
        let page = json!([
            pull(9, "2026-09-30T00:00:00Z", &["rev1", "rev2"]),
            pull(8, "2026-09-01T00:00:00Z", &[]),
            pull(7, "2026-06-01T00:00:00Z", &[]),
            pull(6, "2026-09-15T00:00:00Z", &[])
        ]);
        let next = client.endpoint("/repositories/1/pulls?page=2");
        let link = format!("<{next}>; rel=\"next\"");
        transport.push_json(list_url(&client), page, &[("link", link.as_str())]);

        let mut harvester =
            Harvester::new(client, options(), checkpoint(&dir), MemorySink::default());
        let summary = harvester
            .run_at(&[Stream::PullRequests], fixed_now())
            .await
            .expect("run");

        assert_eq!(numbers(harvester.sink()), vec!["9", "8"]);
        assert_eq!(
            summary.jobs[0].outcome,
            JobOutcome::Completed(CompletionReason::CutoffReached)
        );

        let reviews = harvester.sink().rows(Table::ReviewRelationships);
        assert_eq!(reviews.len(), 2);
        assert_eq!(
            reviews[1].get("reviewer_login"),
            Some(&FieldValue::from("rev2"))
        );
        assert_eq!(
            reviews[0].get("author_login"),
            Some(&FieldValue::from("author"))
        );

        assert_eq!(harvester.checkpoint().items_collected("pull_requests"), 2);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn rerun_skips_processed_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = checkpoint(&dir);
        store
            .advance_with("pull_requests", "9", Some(PROCESSED_PULL_REQUESTS))
            .unwrap();

        let transport = MockTransport::new();
        let client = client(&transport);
        let page = json!([
            pull(10, "2026-09-30T12:00:00Z", &[]),
            pull(9, "2026-09-30T00:00:00Z", &[]),
            pull(8, "2026-09-01T00:00:00Z", &[])
        ]);
        transport.push_json(list_url(&client), page, &[]);

        let mut harvester = Harvester::new(client, options(), store, MemorySink::default());
        let summary = harvester
            .run_at(&[Stream::PullRequests], fixed_now())
            .await
            .expect("run");

        assert_eq!(numbers(harvester.sink()), vec!["10", "8"]);
        assert_eq!(summary.jobs[0].collected, 2);
        assert_eq!(summary.jobs[0].total, 3);
        assert_eq!(
            summary.jobs[0].outcome,
            JobOutcome::Completed(CompletionReason::Exhausted)
        );
        let checkpoint = harvester.checkpoint();
        assert_eq!(checkpoint.items_collected("pull_requests"), 3);
        for number in ["10", "9", "8"] {
            assert!(checkpoint.is_processed("pull_requests", PROCESSED_PULL_REQUESTS, number));
        }
    }

    #[test]
    fn item_key_requires_number_and_author() {
        let mut item = pull(3, "2026-09-30T00:00:00Z", &[]);
        assert_eq!(PullRequestsJob.item_key(&item), Some("3".to_string()));

        item["user"] = Value::Null;
        assert_eq!(PullRequestsJob.item_key(&item), None);
    }
}
