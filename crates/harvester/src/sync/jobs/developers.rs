use async_trait::async_trait;
use serde_json::Value;

use super::{CollectionJob, ItemOutcome, JobContext, field_at, str_at};
use crate::error::HarvestError;
use crate::github::{GitHubError, PageRequest};
use crate::sink::{OutputRecord, Table};
use crate::sync::progress::{HarvestProgress, emit};
use crate::sync::types::Stream;

/// Processed-set of logins whose profile has been collected.
pub const PROCESSED_DEVELOPERS: &str = "developers";
/// Processed-set of logins whose follow relationships have been collected.
pub const PROCESSED_FOLLOWING: &str = "following";

/// Repository contributors with their profiles and who they follow.
///
/// Profile and follow collection are tracked in separate processed sets so
/// either half can resume without redoing the other. A developer counts
/// toward the target once both halves are done.
pub struct DevelopersJob;

impl DevelopersJob {
    fn profile_record(profile: &Value, contributor: &Value) -> OutputRecord {
        OutputRecord::new()
            .with("login", field_at(profile, "/login"))
            .with("name", field_at(profile, "/name"))
            .with("company", field_at(profile, "/company"))
            .with("location", field_at(profile, "/location"))
            .with("email", field_at(profile, "/email"))
            .with("bio", field_at(profile, "/bio"))
            .with("public_repos", field_at(profile, "/public_repos"))
            .with("followers", field_at(profile, "/followers"))
            .with("following", field_at(profile, "/following"))
            .with("created_at", field_at(profile, "/created_at"))
            .with("contributions", field_at(contributor, "/contributions"))
    }
}

#[async_trait]
impl CollectionJob for DevelopersJob {
    fn stream(&self) -> Stream {
        Stream::Developers
    }

    fn tables(&self) -> &'static [Table] {
        &[Table::Developers, Table::FollowRelationships]
    }

    fn initial_request(&self, cx: &JobContext<'_>) -> PageRequest {
        let path = format!("{}/contributors", cx.options.repository.api_path());
        PageRequest::new(cx.client.endpoint(&path)).query("per_page", cx.options.per_page)
    }

    fn item_key(&self, item: &Value) -> Option<String> {
        str_at(item, "/login").map(str::to_string)
    }

    fn is_collected(&self, key: &str, cx: &JobContext<'_>) -> bool {
        let stream = self.stream().as_str();
        cx.checkpoint.is_processed(stream, PROCESSED_DEVELOPERS, key)
            && cx.checkpoint.is_processed(stream, PROCESSED_FOLLOWING, key)
    }

    fn committed_set(&self) -> Option<&'static str> {
        Some(PROCESSED_FOLLOWING)
    }

    async fn process(
        &self,
        cx: &mut JobContext<'_>,
        key: &str,
        item: &Value,
    ) -> Result<ItemOutcome, HarvestError> {
        let stream = self.stream();

        if !cx
            .checkpoint
            .is_processed(stream.as_str(), PROCESSED_DEVELOPERS, key)
        {
            let profile = match cx.client.get_json(&format!("/users/{key}")).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(login = key, error = %e, "Skipping developer, profile fetch failed");
                    emit(
                        cx.on_progress,
                        HarvestProgress::EntityError {
                            stream,
                            key: key.to_string(),
                            error: e.to_string(),
                        },
                    );
                    return Ok(ItemOutcome::Skipped("profile unavailable".to_string()));
                }
            };
            cx.batch
                .push(Table::Developers, Self::profile_record(&profile, item));
            cx.checkpoint
                .mark_processed(stream.as_str(), PROCESSED_DEVELOPERS, key)?;
        }

        if !cx
            .checkpoint
            .is_processed(stream.as_str(), PROCESSED_FOLLOWING, key)
        {
            let request = PageRequest::new(cx.client.endpoint(&format!("/users/{key}/following")))
                .query("per_page", cx.options.per_page);
            let followed = match cx
                .client
                .paginate(request, Some(cx.options.max_following))
                .collect_all()
                .await
            {
                Ok(followed) => followed,
                Err(e @ GitHubError::MalformedResponse { .. }) => {
                    tracing::warn!(login = key, error = %e, "Skipping developer, malformed following list");
                    return Ok(ItemOutcome::Skipped("malformed following list".to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            for user in &followed {
                if let Some(login) = str_at(user, "/login") {
                    cx.batch.push(
                        Table::FollowRelationships,
                        OutputRecord::new()
                            .with("follower_login", key)
                            .with("followed_login", login),
                    );
                }
            }
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
    use crate::http::{HttpResponse, MockTransport};
    use crate::sink::{FieldValue, MemorySink};
    use crate::sync::engine::Harvester;

    fn contributors_url(client: &GitHubClient) -> String {
        PageRequest::new(client.endpoint(&format!("/repos/{OWNER}/{REPO}/contributors")))
            .query("per_page", 100)
            .to_url()
            .unwrap()
    }

    fn following_url(client: &GitHubClient, login: &str) -> String {
        PageRequest::new(client.endpoint(&format!("/users/{login}/following")))
            .query("per_page", 100)
            .to_url()
            .unwrap()
    }

    fn profile_url(client: &GitHubClient, login: &str) -> String {
        client.endpoint(&format!("/users/{login}"))
    }

    fn logins(values: &[&str]) -> Value {
        Value::Array(
            values
                .iter()
                .map(|l| json!({"login": l, "contributions": 7}))
                .collect(),
        )
    }

    #[tokio::test]
    async fn rerun_skips_profile_but_fetches_missing_follows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = checkpoint(&dir);
        store
            .mark_processed("developers", PROCESSED_DEVELOPERS, "mona")
            .unwrap();

        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(contributors_url(&client), logins(&["mona"]), &[]);
        transport.push_json(
            following_url(&client, "mona"),
            logins(&["hubot", "octocat"]),
            &[],
        );

        let mut harvester = Harvester::new(client, options(), store, MemorySink::default());
        harvester
            .run_at(&[Stream::Developers], fixed_now())
            .await
            .expect("run");

        let requested = transport.requested_urls();
        assert!(!requested.contains(&profile_url(harvester.client(), "mona")));
        assert!(requested.contains(&following_url(harvester.client(), "mona")));

        assert!(harvester.sink().rows(Table::Developers).is_empty());
        let follows = harvester.sink().rows(Table::FollowRelationships);
        assert_eq!(follows.len(), 2);
        assert_eq!(
            follows[1].get("followed_login"),
            Some(&FieldValue::from("octocat"))
        );
        assert!(
            harvester
                .checkpoint()
                .is_processed("developers", PROCESSED_FOLLOWING, "mona")
        );
        assert_eq!(harvester.checkpoint().items_collected("developers"), 1);
    }

    #[tokio::test]
    async fn fully_processed_developer_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = checkpoint(&dir);
        store
            .mark_processed("developers", PROCESSED_DEVELOPERS, "mona")
            .unwrap();
        store
            .advance_with("developers", "mona", Some(PROCESSED_FOLLOWING))
            .unwrap();

        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(contributors_url(&client), logins(&["mona"]), &[]);

        let mut harvester = Harvester::new(client, options(), store, MemorySink::default());
        let summary = harvester
            .run_at(&[Stream::Developers], fixed_now())
            .await
            .expect("run");

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(summary.jobs[0].collected, 0);
        assert_eq!(summary.jobs[0].total, 1);
        assert_eq!(harvester.sink().write_count(Table::Developers), 0);
    }

    #[tokio::test]
    async fn profile_failure_skips_only_that_developer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(contributors_url(&client), logins(&["ghost", "mona"]), &[]);
        transport.push_response(
            profile_url(&client, "ghost"),
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: b"{\"message\":\"Not Found\"}".to_vec(),
            },
        );
        transport.push_json(
            profile_url(&client, "mona"),
            json!({"login": "mona", "name": "Mona Lisa", "followers": 3}),
            &[],
        );
        transport.push_json(following_url(&client, "mona"), json!([]), &[]);

        let mut harvester =
            Harvester::new(client, options(), checkpoint(&dir), MemorySink::default());
        let summary = harvester
            .run_at(&[Stream::Developers], fixed_now())
            .await
            .expect("run");

        assert!(!summary.jobs[0].is_failed());
        let developers = harvester.sink().rows(Table::Developers);
        assert_eq!(developers.len(), 1);
        assert_eq!(developers[0].get("name"), Some(&FieldValue::from("Mona Lisa")));
        assert_eq!(developers[0].get("contributions"), Some(&FieldValue::Int(7)));
        assert_eq!(harvester.checkpoint().items_collected("developers"), 1);
        assert!(
            !harvester
                .checkpoint()
                .is_processed("developers", PROCESSED_DEVELOPERS, "ghost")
        );
    }

    #[tokio::test]
    async fn following_is_capped_per_developer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(contributors_url(&client), logins(&["mona"]), &[]);
        transport.push_json(profile_url(&client, "mona"), json!({"login": "mona"}), &[]);
        transport.push_json(
            following_url(&client, "mona"),
            logins(&["a", "b", "c", "d"]),
            &[],
        );

        let mut opts = options();
        opts.max_following = 2;
        let mut harvester = Harvester::new(client, opts, checkpoint(&dir), MemorySink::default());
        harvester
            .run_at(&[Stream::Developers], fixed_now())
            .await
            .expect("run");

        assert_eq!(
            harvester.sink().rows(Table::FollowRelationships).len(),
            2
        );
    }

    #[tokio::test]
    async fn malformed_following_skips_developer_but_keeps_profile() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(contributors_url(&client), logins(&["mona", "hubot"]), &[]);
        transport.push_json(profile_url(&client, "mona"), json!({"login": "mona"}), &[]);
        transport.push_response(
            following_url(&client, "mona"),
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"{\"login\": \"not-a-list\"}".to_vec(),
            },
        );
        transport.push_json(profile_url(&client, "hubot"), json!({"login": "hubot"}), &[]);
        transport.push_json(following_url(&client, "hubot"), logins(&["mona"]), &[]);

        let mut harvester =
            Harvester::new(client, options(), checkpoint(&dir), MemorySink::default());
        let summary = harvester
            .run_at(&[Stream::Developers], fixed_now())
            .await
            .expect("run");

        assert!(!summary.jobs[0].is_failed());
        assert_eq!(summary.jobs[0].collected, 1);
        assert_eq!(harvester.sink().rows(Table::Developers).len(), 2);
        assert_eq!(harvester.sink().rows(Table::FollowRelationships).len(), 1);

        let checkpoint = harvester.checkpoint();
        assert!(checkpoint.is_processed("developers", PROCESSED_DEVELOPERS, "mona"));
        assert!(!checkpoint.is_processed("developers", PROCESSED_FOLLOWING, "mona"));
        assert!(checkpoint.is_processed("developers", PROCESSED_FOLLOWING, "hubot"));
    }
}
