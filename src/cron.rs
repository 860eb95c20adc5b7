use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CronsConfig;
use crate::db::NewChannelActivity;
use crate::feed::{FeedItemKind, NewFeedItem};
use crate::tenancy::TenantRouter;

const FALLBACK_JOKE: &str = "Why do programmers prefer dark mode? Because light attracts bugs.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronReport {
    pub job: String,
    pub success: bool,
    pub results: Vec<ChannelResult>,
}

impl CronReport {
    fn new(job: &str, results: Vec<ChannelResult>) -> Self {
        Self {
            job: job.to_string(),
            success: results.iter().all(|r| r.success),
            results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JokeResponse {
    #[serde(default)]
    setup: String,
    #[serde(default)]
    punchline: String,
}

pub struct CronRunner {
    router: Arc<TenantRouter>,
    config: CronsConfig,
    http: reqwest::Client,
}

impl CronRunner {
    pub fn new(router: Arc<TenantRouter>, config: CronsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            router,
            config,
            http,
        }
    }

    /// Joke-of-the-day into every target channel of the global store.
    pub async fn run_global(&self) -> CronReport {
        let channels = self.fetch_target_channels().await;
        let joke = self.fetch_joke().await;

        let mut results = Vec::with_capacity(channels.len());
        for channel in &channels {
            results.push(self.insert_into_global(channel, &joke).await);
        }

        info!(
            "global cron finished: {}/{} channels ok",
            results.iter().filter(|r| r.success).count(),
            results.len()
        );
        CronReport::new("global", results)
    }

    /// Same content, but into each owner-db channel's own tenant database.
    /// An empty tenant channel list is a successful no-op run.
    pub async fn run_tenant(&self) -> CronReport {
        let channels = match self
            .router
            .global()
            .channel_store()
            .list_owner_db_usernames()
            .await
        {
            Ok(channels) => channels,
            Err(e) => {
                warn!("tenant cron could not list owner-db channels: {}", e);
                return CronReport {
                    job: "tenant".to_string(),
                    success: false,
                    results: Vec::new(),
                };
            }
        };

        if channels.is_empty() {
            return CronReport::new("tenant", Vec::new());
        }

        let joke = self.fetch_joke().await;
        let mut results = Vec::with_capacity(channels.len());
        for channel in &channels {
            results.push(self.insert_into_tenant(channel, &joke).await);
        }

        CronReport::new("tenant", results)
    }

    /// One synthetic tweet-style feed item into the showcase channel.
    pub async fn run_showcase(&self) -> CronReport {
        let channel = self.config.showcase_channel.clone();
        let content = format!(
            "Mars needs memes. Launch window opens {}.",
            Utc::now().format("%Y-%m-%d")
        );

        let item = NewFeedItem::text(&channel, FeedItemKind::Tweet, &content);
        let result = match self.router.global().feed_store().create_feed_item(&item).await {
            Ok(_) => ChannelResult {
                channel,
                success: true,
                error: None,
            },
            Err(e) => ChannelResult {
                channel,
                success: false,
                error: Some(e.to_string()),
            },
        };

        CronReport::new("showcase", vec![result])
    }

    async fn insert_into_global(&self, channel: &str, text: &str) -> ChannelResult {
        let global = self.router.global();
        let outcome = async {
            global.message_store().insert_message(channel, text).await?;
            let count = global.message_store().count_messages(channel).await?;
            global
                .activity_store()
                .upsert_activity(&NewChannelActivity {
                    channel_username: channel.to_string(),
                    last_message: Some(serde_json::json!({ "text": text })),
                    message_count: count,
                    last_updated: Utc::now(),
                })
                .await?;
            Ok::<(), crate::db::DatabaseError>(())
        }
        .await;

        match outcome {
            Ok(()) => ChannelResult {
                channel: channel.to_string(),
                success: true,
                error: None,
            },
            Err(e) => ChannelResult {
                channel: channel.to_string(),
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    async fn insert_into_tenant(&self, channel: &str, text: &str) -> ChannelResult {
        let outcome = async {
            let resolved = self.router.resolve(channel).await?;
            resolved
                .store
                .message_store()
                .insert_message(channel, text)
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match outcome {
            Ok(()) => ChannelResult {
                channel: channel.to_string(),
                success: true,
                error: None,
            },
            Err(e) => ChannelResult {
                channel: channel.to_string(),
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Target channels come from the live channels API when configured; any
    /// failure falls back to the static list from config.
    async fn fetch_target_channels(&self) -> Vec<String> {
        let Some(ref url) = self.config.channels_api_url else {
            return self.config.fallback_channels.clone();
        };

        let fetched = async {
            let response = self.http.get(url).send().await?;
            let value: serde_json::Value = response.json().await?;
            Ok::<serde_json::Value, reqwest::Error>(value)
        }
        .await;

        match fetched {
            Ok(value) => match parse_channel_list(&value) {
                Some(channels) if !channels.is_empty() => channels,
                _ => {
                    warn!("channels API returned no usable channel list, using fallback");
                    self.config.fallback_channels.clone()
                }
            },
            Err(e) => {
                warn!("channels API fetch failed ({}), using fallback", e);
                self.config.fallback_channels.clone()
            }
        }
    }

    async fn fetch_joke(&self) -> String {
        let fetched = async {
            let response = self.http.get(&self.config.joke_api_url).send().await?;
            let joke: JokeResponse = response.json().await?;
            Ok::<JokeResponse, reqwest::Error>(joke)
        }
        .await;

        match fetched {
            Ok(joke) if !joke.setup.is_empty() => format!("{} {}", joke.setup, joke.punchline),
            Ok(_) => FALLBACK_JOKE.to_string(),
            Err(e) => {
                warn!("joke API fetch failed ({}), using fallback", e);
                FALLBACK_JOKE.to_string()
            }
        }
    }
}

// Accepts either a bare array of usernames or {"channels": [...]}.
fn parse_channel_list(value: &serde_json::Value) -> Option<Vec<String>> {
    let array = value
        .as_array()
        .or_else(|| value.get("channels").and_then(|v| v.as_array()))?;

    Some(
        array
            .iter()
            .filter_map(|entry| {
                entry
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| entry.get("username")?.as_str().map(|s| s.to_string()))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::DatabaseManager;
    use crate::tenancy::TenantRegistry;

    async fn test_router(dir: &TempDir) -> Arc<TenantRouter> {
        let config = DatabaseConfig {
            filename: Some(dir.path().join("global.db").to_string_lossy().to_string()),
            ..DatabaseConfig::default()
        };
        let manager = Arc::new(DatabaseManager::new(&config).await.unwrap());
        manager.migrate().await.unwrap();
        Arc::new(TenantRouter::new(manager, TenantRegistry::default()))
    }

    fn offline_crons(fallback: Vec<String>) -> CronsConfig {
        CronsConfig {
            channels_api_url: None,
            fallback_channels: fallback,
            // closed port: forces the static fallback without waiting
            joke_api_url: "http://127.0.0.1:9/random_joke".to_string(),
            showcase_channel: "elonmusk".to_string(),
        }
    }

    #[test]
    fn channel_list_parses_both_shapes() {
        let bare = serde_json::json!(["a", "b"]);
        assert_eq!(parse_channel_list(&bare).unwrap(), vec!["a", "b"]);

        let wrapped = serde_json::json!({ "channels": [{ "username": "c" }, "d"] });
        assert_eq!(parse_channel_list(&wrapped).unwrap(), vec!["c", "d"]);

        assert!(parse_channel_list(&serde_json::json!({ "nope": 1 })).is_none());
    }

    #[tokio::test]
    async fn global_cron_inserts_one_message_per_channel() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;
        let runner = CronRunner::new(
            router.clone(),
            offline_crons(vec!["janedoe".to_string(), "johndoe".to_string()]),
        );

        let report = runner.run_global().await;
        assert!(report.success);
        assert_eq!(report.results.len(), 2);

        let global = router.global();
        assert_eq!(global.message_store().count_messages("janedoe").await.unwrap(), 1);
        assert_eq!(global.message_store().count_messages("johndoe").await.unwrap(), 1);

        let activity = global
            .activity_store()
            .get_activity("janedoe")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(activity.message_count, 1);
    }

    #[tokio::test]
    async fn tenant_cron_with_no_tenant_channels_is_empty_success() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;
        let runner = CronRunner::new(router, offline_crons(Vec::new()));

        let report = runner.run_tenant().await;
        assert!(report.success);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn showcase_cron_inserts_a_tweet() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;
        let runner = CronRunner::new(router.clone(), offline_crons(Vec::new()));

        let report = runner.run_showcase().await;
        assert!(report.success);

        let items = router
            .global()
            .feed_store()
            .list_feed_items("elonmusk", 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, FeedItemKind::Tweet);
    }
}
