use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseError;
use super::models::{
    Channel, ChannelActivity, ChannelMessage, Language, LastViewed, LocationPreference,
    NewChannelActivity, NotificationPreference, OutboxEntry, UserLanguage, UserRecord,
};
use crate::access::{TenantRequest, TenantRequestRecord};
use crate::feed::{FeedItem, InteractiveResponse, NewFeedItem};

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel(&self, username: &str) -> Result<Option<Channel>, DatabaseError>;
    async fn upsert_channel(&self, channel: &Channel) -> Result<(), DatabaseError>;
    async fn list_channel_usernames(&self) -> Result<Vec<String>, DatabaseError>;
    async fn list_owner_db_usernames(&self) -> Result<Vec<String>, DatabaseError>;
    async fn count_channels(&self) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError>;
    async fn create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord, DatabaseError>;
    async fn get_language(&self, user_id: &str) -> Result<Option<UserLanguage>, DatabaseError>;
    async fn set_language(
        &self,
        user_id: &str,
        language: Language,
    ) -> Result<UserLanguage, DatabaseError>;
    async fn get_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, DatabaseError>;
    async fn set_notifications(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<NotificationPreference, DatabaseError>;
    async fn get_location(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationPreference>, DatabaseError>;
    async fn set_location(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        place_name: Option<&str>,
    ) -> Result<LocationPreference, DatabaseError>;
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn list_feed_items(
        &self,
        channel_username: &str,
        limit: i64,
    ) -> Result<Vec<FeedItem>, DatabaseError>;
    async fn get_feed_item(&self, id: i64) -> Result<Option<FeedItem>, DatabaseError>;
    async fn create_feed_item(&self, item: &NewFeedItem) -> Result<FeedItem, DatabaseError>;
    async fn count_feed_items(&self, channel_username: &str) -> Result<i64, DatabaseError>;
    async fn upsert_response(&self, response: &InteractiveResponse) -> Result<(), DatabaseError>;
    async fn get_response(
        &self,
        user_id: &str,
        feed_item_id: i64,
    ) -> Result<Option<InteractiveResponse>, DatabaseError>;
    async fn bump_response_count(&self, feed_item_id: i64) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(
        &self,
        channel_username: &str,
        message_text: &str,
    ) -> Result<ChannelMessage, DatabaseError>;
    async fn count_messages(&self, channel_username: &str) -> Result<i64, DatabaseError>;
    async fn latest_message(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelMessage>, DatabaseError>;
    async fn upsert_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
        message_count: i64,
    ) -> Result<LastViewed, DatabaseError>;
    async fn get_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
    ) -> Result<Option<LastViewed>, DatabaseError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn upsert_activity(
        &self,
        activity: &NewChannelActivity,
    ) -> Result<ChannelActivity, DatabaseError>;
    async fn get_activity(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelActivity>, DatabaseError>;
    /// Activity rows visible to a signed-in user: public channels plus
    /// channels with a granted access request for that user.
    async fn list_activity_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChannelActivity>, DatabaseError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(&self, request: &TenantRequest) -> Result<TenantRequest, DatabaseError>;
    /// Relay upsert keyed by the caller-supplied request id. Rejects status
    /// changes the workflow forbids (anything leaving granted/rejected).
    async fn upsert_request_record(
        &self,
        record: &TenantRequestRecord,
    ) -> Result<TenantRequest, DatabaseError>;
    async fn get_request_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<TenantRequest>, DatabaseError>;
    async fn list_requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TenantRequest>, DatabaseError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(
        &self,
        event_id: &str,
        event_kind: &str,
        payload: &serde_json::Value,
    ) -> Result<OutboxEntry, DatabaseError>;
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DatabaseError>;
    async fn mark_resolved(&self, id: i64) -> Result<(), DatabaseError>;
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        failed: bool,
    ) -> Result<(), DatabaseError>;
    async fn count_pending(&self) -> Result<i64, DatabaseError>;
}
