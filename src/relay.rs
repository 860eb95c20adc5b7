use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{TenantRequest, TenantRequestRecord};
use crate::config::RelayConfig;
use crate::db::{
    ChannelActivity, DatabaseError, DatabaseManager, NewChannelActivity, OutboxEntry,
};
use crate::web::metrics::Metrics;

/// One tenant-to-global relay event, serialized into the outbox payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum RelayEvent {
    TenantRequest(TenantRequestRecord),
    ChannelActivity(NewChannelActivity),
}

impl RelayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::TenantRequest(_) => "tenant_request",
            RelayEvent::ChannelActivity(_) => "channel_activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayOutcome {
    Request {
        request: TenantRequest,
        activity: Vec<ChannelActivity>,
    },
    Activity(ChannelActivity),
}

/// Applies relay events to the global store. Delivery is idempotent: both
/// event kinds are upserts, so a redelivery after a crash between the write
/// and the outbox bookkeeping is harmless.
pub struct RelayEngine {
    global: Arc<DatabaseManager>,
}

impl RelayEngine {
    pub fn new(global: Arc<DatabaseManager>) -> Self {
        Self { global }
    }

    /// Persist the event before the first delivery attempt. Whatever happens
    /// afterwards, the event is not lost.
    pub async fn enqueue(&self, event: &RelayEvent) -> Result<OutboxEntry, DatabaseError> {
        let payload = serde_json::to_value(event).map_err(DatabaseError::serialization)?;
        let entry = self
            .global
            .outbox_store()
            .enqueue(&Uuid::new_v4().to_string(), event.kind(), &payload)
            .await?;
        debug!("enqueued relay event {} ({})", entry.event_id, entry.event_kind);
        Ok(entry)
    }

    /// Outbox-first webhook path: persist the event, then try to deliver it
    /// right away. `None` means the event stayed pending for the worker.
    pub async fn enqueue_and_deliver(
        &self,
        event: &RelayEvent,
    ) -> Result<Option<RelayOutcome>, DatabaseError> {
        let entry = self.enqueue(event).await?;
        match self.deliver(event).await {
            Ok(outcome) => {
                self.global.outbox_store().mark_resolved(entry.id).await?;
                Metrics::relay_resolved();
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!(
                    "immediate delivery of {} failed, leaving queued: {}",
                    entry.event_id, e
                );
                Ok(None)
            }
        }
    }

    pub async fn deliver(&self, event: &RelayEvent) -> Result<RelayOutcome, DatabaseError> {
        match event {
            RelayEvent::TenantRequest(record) => {
                let request = self
                    .global
                    .request_store()
                    .upsert_request_record(record)
                    .await?;
                // getchannelactivitysigneduser: the user's visible activity
                // list changes with the request status, recompute it.
                let activity = self
                    .global
                    .activity_store()
                    .list_activity_for_user(&record.uid)
                    .await?;
                Ok(RelayOutcome::Request { request, activity })
            }
            RelayEvent::ChannelActivity(activity) => {
                let updated = self.global.activity_store().upsert_activity(activity).await?;
                Ok(RelayOutcome::Activity(updated))
            }
        }
    }

    /// Deliver one outbox entry and update its bookkeeping. Returns true when
    /// the entry was resolved.
    pub async fn process_entry(
        &self,
        entry: &OutboxEntry,
        config: &RelayConfig,
    ) -> Result<bool, DatabaseError> {
        let outbox = self.global.outbox_store();

        let event: RelayEvent = match serde_json::from_value(entry.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                // Unparseable payloads never become deliverable; fail them
                // immediately instead of retrying forever.
                warn!("poisoned outbox entry {}: {}", entry.event_id, e);
                outbox
                    .record_failure(entry.id, &e.to_string(), Utc::now(), true)
                    .await?;
                Metrics::relay_failed();
                return Ok(false);
            }
        };

        match self.deliver(&event).await {
            Ok(_) => {
                outbox.mark_resolved(entry.id).await?;
                Metrics::relay_resolved();
                debug!("relay event {} resolved", entry.event_id);
                Ok(true)
            }
            Err(e) => {
                let attempts = entry.attempts + 1;
                let failed = attempts >= config.max_attempts;
                let next = Utc::now() + backoff_delay(config.base_backoff_secs, attempts);
                if failed {
                    error!(
                        "relay event {} failed permanently after {} attempts: {}",
                        entry.event_id, attempts, e
                    );
                } else {
                    warn!(
                        "relay event {} attempt {} failed, retrying: {}",
                        entry.event_id, attempts, e
                    );
                }
                outbox
                    .record_failure(entry.id, &e.to_string(), next, failed)
                    .await?;
                if failed {
                    Metrics::relay_failed();
                }
                Ok(false)
            }
        }
    }
}

/// Exponential backoff: base * 2^(attempts-1), capped at one hour.
pub fn backoff_delay(base_secs: u64, attempts: i32) -> ChronoDuration {
    let exponent = attempts.saturating_sub(1).clamp(0, 12) as u32;
    let secs = base_secs.saturating_mul(1u64 << exponent).min(3600);
    ChronoDuration::seconds(secs as i64)
}

/// Background task draining the relay outbox on an interval.
pub struct OutboxWorker {
    engine: Arc<RelayEngine>,
    config: RelayConfig,
    shutdown: watch::Receiver<bool>,
}

impl OutboxWorker {
    pub fn new(
        engine: Arc<RelayEngine>,
        config: RelayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let interval = std::time::Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!(
            "relay outbox worker started (poll every {}s, max {} attempts)",
            interval.as_secs(),
            self.config.max_attempts
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.drain_due().await {
                        error!("outbox drain failed: {}", e);
                    }
                }
                _ = self.shutdown.changed() => {
                    info!("relay outbox worker shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over due entries. Sequential on purpose: relayed writes for
    /// the same request must not race each other.
    pub async fn drain_due(&self) -> Result<usize, DatabaseError> {
        let due = self
            .engine
            .global
            .outbox_store()
            .due_entries(Utc::now(), self.config.batch_size)
            .await?;

        let mut resolved = 0;
        for entry in &due {
            if self.engine.process_entry(entry, &self.config).await? {
                resolved += 1;
            }
        }

        if !due.is_empty() {
            debug!("outbox pass: {} due, {} resolved", due.len(), resolved);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::access::RequestStatus;
    use crate::config::DatabaseConfig;

    async fn test_manager(dir: &TempDir) -> Arc<DatabaseManager> {
        let config = DatabaseConfig {
            filename: Some(dir.path().join("global.db").to_string_lossy().to_string()),
            ..DatabaseConfig::default()
        };
        let manager = Arc::new(DatabaseManager::new(&config).await.unwrap());
        manager.migrate().await.unwrap();
        manager
    }

    fn request_event(id: &str, status: RequestStatus) -> RelayEvent {
        RelayEvent::TenantRequest(TenantRequestRecord {
            id: id.to_string(),
            request_type: "channel_access".to_string(),
            uid: "u1".to_string(),
            username: "janedoe".to_string(),
            status,
        })
    }

    #[test_case(30, 1, 30)]
    #[test_case(30, 2, 60)]
    #[test_case(30, 3, 120)]
    #[test_case(30, 8, 3600 ; "capped at one hour")]
    #[test_case(30, 0, 30 ; "attempt zero clamps to base")]
    fn backoff_schedule(base: u64, attempts: i32, expected_secs: i64) {
        assert_eq!(backoff_delay(base, attempts).num_seconds(), expected_secs);
    }

    #[tokio::test]
    async fn enqueue_then_drain_resolves_and_upserts() {
        let dir = TempDir::new().unwrap();
        let global = test_manager(&dir).await;
        let engine = Arc::new(RelayEngine::new(global.clone()));

        engine
            .enqueue(&request_event("r-1", RequestStatus::Pending))
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        let worker = OutboxWorker::new(engine, RelayConfig::default(), rx);
        let resolved = worker.drain_due().await.unwrap();
        assert_eq!(resolved, 1);

        assert_eq!(global.outbox_store().count_pending().await.unwrap(), 0);
        let request = global
            .request_store()
            .get_request_by_request_id("r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn delivery_failure_backs_off_then_fails_permanently() {
        let dir = TempDir::new().unwrap();
        let global = test_manager(&dir).await;
        let engine = Arc::new(RelayEngine::new(global.clone()));

        // granted -> pending is an invalid transition, so delivery of the
        // second event keeps failing
        engine
            .deliver(&request_event("r-1", RequestStatus::Granted))
            .await
            .unwrap();
        engine
            .enqueue(&request_event("r-1", RequestStatus::Pending))
            .await
            .unwrap();

        let config = RelayConfig {
            max_attempts: 2,
            base_backoff_secs: 0,
            ..RelayConfig::default()
        };

        let due = global
            .outbox_store()
            .due_entries(Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert!(!engine.process_entry(&due[0], &config).await.unwrap());

        // still pending after the first failure
        assert_eq!(global.outbox_store().count_pending().await.unwrap(), 1);

        let due = global
            .outbox_store()
            .due_entries(Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert!(!engine.process_entry(&due[0], &config).await.unwrap());

        // second failure hits max_attempts and the entry is parked as failed
        assert_eq!(global.outbox_store().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn poisoned_payload_is_failed_immediately() {
        let dir = TempDir::new().unwrap();
        let global = test_manager(&dir).await;
        let engine = RelayEngine::new(global.clone());

        let entry = global
            .outbox_store()
            .enqueue("e-bad", "tenant_request", &serde_json::json!({ "bogus": true }))
            .await
            .unwrap();

        let resolved = engine
            .process_entry(&entry, &RelayConfig::default())
            .await
            .unwrap();
        assert!(!resolved);
        assert_eq!(global.outbox_store().count_pending().await.unwrap(), 0);

        let due = global
            .outbox_store()
            .due_entries(Utc::now() + ChronoDuration::hours(2), 10)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn activity_event_upserts_rollup() {
        let dir = TempDir::new().unwrap();
        let global = test_manager(&dir).await;
        let engine = RelayEngine::new(global.clone());

        let event = RelayEvent::ChannelActivity(NewChannelActivity {
            channel_username: "janedoe".to_string(),
            last_message: Some(serde_json::json!({ "text": "hello" })),
            message_count: 7,
            last_updated: Utc::now(),
        });

        match engine.deliver(&event).await.unwrap() {
            RelayOutcome::Activity(activity) => {
                assert_eq!(activity.message_count, 7);
            }
            other => panic!("expected activity outcome, got {other:?}"),
        }

        let stored = global
            .activity_store()
            .get_activity("janedoe")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.message_count, 7);
    }
}
