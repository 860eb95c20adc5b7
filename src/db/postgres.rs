use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use super::DatabaseError;
use super::models::{
    Channel, ChannelActivity, ChannelMessage, Language, LastViewed, LocationPreference,
    NewChannelActivity, NotificationPreference, OutboxEntry, OutboxStatus, UserLanguage,
    UserRecord,
};
use crate::access::{RequestStatus, TenantRequest, TenantRequestRecord};
use crate::db::manager::Pool;
use crate::db::schema::{
    channels, channels_activity, channels_messages, interactive_responses, relay_outbox,
    superfeed, tenant_requests, user_channel_last_viewed, user_language, user_location,
    user_notifications, users,
};
use crate::feed::{FeedItem, FeedStats, InteractiveResponse, NewFeedItem};

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, DatabaseError> {
    serde_json::from_value(value).map_err(DatabaseError::serialization)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DatabaseError> {
    serde_json::to_value(value).map_err(DatabaseError::serialization)
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channels)]
struct DbChannel {
    id: i64,
    username: String,
    display_name: String,
    description: Option<String>,
    avatar_url: Option<String>,
    category: Option<String>,
    is_public: bool,
    premium: bool,
    is_realtime: bool,
    is_owner_db: bool,
    owner_user_id: Option<String>,
    tenant_id: Option<String>,
    related_channels: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbChannel {
    fn to_channel(self) -> Result<Channel, DatabaseError> {
        Ok(Channel {
            id: self.id,
            username: self.username,
            display_name: self.display_name,
            description: self.description,
            avatar_url: self.avatar_url,
            category: self.category,
            is_public: self.is_public,
            premium: self.premium,
            is_realtime: self.is_realtime,
            is_owner_db: self.is_owner_db,
            owner_user_id: self.owner_user_id,
            tenant_id: self.tenant_id,
            related_channels: from_value(self.related_channels)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = channels)]
struct NewDbChannel<'a> {
    username: &'a str,
    display_name: &'a str,
    description: Option<&'a str>,
    avatar_url: Option<&'a str>,
    category: Option<&'a str>,
    is_public: bool,
    premium: bool,
    is_realtime: bool,
    is_owner_db: bool,
    owner_user_id: Option<&'a str>,
    tenant_id: Option<&'a str>,
    related_channels: serde_json::Value,
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = channels)]
struct UpdateDbChannel<'a> {
    display_name: &'a str,
    description: Option<&'a str>,
    avatar_url: Option<&'a str>,
    category: Option<&'a str>,
    is_public: bool,
    premium: bool,
    is_realtime: bool,
    is_owner_db: bool,
    owner_user_id: Option<&'a str>,
    tenant_id: Option<&'a str>,
    related_channels: serde_json::Value,
    updated_at: &'a DateTime<Utc>,
}

pub struct PostgresChannelStore {
    pool: Pool,
}

impl PostgresChannelStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::ChannelStore for PostgresChannelStore {
    async fn get_channel(&self, username: &str) -> Result<Option<Channel>, DatabaseError> {
        let pool = self.pool.clone();
        let username = username.to_string();
        with_connection(pool, move |conn| {
            channels::table
                .filter(channels::username.eq(username))
                .select(DbChannel::as_select())
                .first::<DbChannel>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|c| c.to_channel())
                .transpose()
        })
        .await
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let channel = channel.clone();
        with_connection(pool, move |conn| {
            let related = to_value(&channel.related_channels)?;
            let now = Utc::now();

            let existing = channels::table
                .filter(channels::username.eq(&channel.username))
                .select(channels::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                let changes = UpdateDbChannel {
                    display_name: &channel.display_name,
                    description: channel.description.as_deref(),
                    avatar_url: channel.avatar_url.as_deref(),
                    category: channel.category.as_deref(),
                    is_public: channel.is_public,
                    premium: channel.premium,
                    is_realtime: channel.is_realtime,
                    is_owner_db: channel.is_owner_db,
                    owner_user_id: channel.owner_user_id.as_deref(),
                    tenant_id: channel.tenant_id.as_deref(),
                    related_channels: related,
                    updated_at: &now,
                };
                diesel::update(channels::table.filter(channels::id.eq(id)))
                    .set(changes)
                    .execute(conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                let new_channel = NewDbChannel {
                    username: &channel.username,
                    display_name: &channel.display_name,
                    description: channel.description.as_deref(),
                    avatar_url: channel.avatar_url.as_deref(),
                    category: channel.category.as_deref(),
                    is_public: channel.is_public,
                    premium: channel.premium,
                    is_realtime: channel.is_realtime,
                    is_owner_db: channel.is_owner_db,
                    owner_user_id: channel.owner_user_id.as_deref(),
                    tenant_id: channel.tenant_id.as_deref(),
                    related_channels: related,
                    created_at: &channel.created_at,
                    updated_at: &now,
                };
                diesel::insert_into(channels::table)
                    .values(&new_channel)
                    .execute(conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
    }

    async fn list_channel_usernames(&self) -> Result<Vec<String>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            channels::table
                .order(channels::username.asc())
                .select(channels::username)
                .load::<String>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_owner_db_usernames(&self) -> Result<Vec<String>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            channels::table
                .filter(channels::is_owner_db.eq(true))
                .order(channels::username.asc())
                .select(channels::username)
                .load::<String>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn count_channels(&self) -> Result<i64, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            channels::table
                .count()
                .get_result(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
struct DbUser {
    id: i64,
    user_id: String,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DbUser> for UserRecord {
    fn from(value: DbUser) -> Self {
        Self {
            id: value.id,
            user_id: value.user_id,
            display_name: value.display_name,
            created_at: value.created_at,
        }
    }
}

pub struct PostgresUserStore {
    pool: Pool,
}

impl PostgresUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::UserStore for PostgresUserStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            users::table
                .filter(users::user_id.eq(user_id))
                .select(DbUser::as_select())
                .first::<DbUser>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let display_name = display_name.map(|s| s.to_string());
        with_connection(pool, move |conn| {
            diesel::insert_into(users::table)
                .values((
                    users::user_id.eq(&user_id),
                    users::display_name.eq(display_name.as_deref()),
                    users::created_at.eq(Utc::now()),
                ))
                .returning(DbUser::as_returning())
                .get_result::<DbUser>(conn)
                .map(Into::into)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn get_language(&self, user_id: &str) -> Result<Option<UserLanguage>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let row = user_language::table
                .filter(user_language::user_id.eq(&user_id))
                .select((user_language::language, user_language::updated_at))
                .first::<(String, DateTime<Utc>)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(language, updated_at)| {
                Ok(UserLanguage {
                    user_id: user_id.clone(),
                    language: language
                        .parse::<Language>()
                        .map_err(DatabaseError::Serialization)?,
                    updated_at,
                })
            })
            .transpose()
        })
        .await
    }

    async fn set_language(
        &self,
        user_id: &str,
        language: Language,
    ) -> Result<UserLanguage, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = user_language::table
                .filter(user_language::user_id.eq(&user_id))
                .select(user_language::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_language::table.filter(user_language::id.eq(id)))
                    .set((
                        user_language::language.eq(language.as_str()),
                        user_language::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_language::table)
                    .values((
                        user_language::user_id.eq(&user_id),
                        user_language::language.eq(language.as_str()),
                        user_language::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }

            Ok(UserLanguage {
                user_id,
                language,
                updated_at: now,
            })
        })
        .await
    }

    async fn get_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let row = user_notifications::table
                .filter(user_notifications::user_id.eq(&user_id))
                .select((
                    user_notifications::notifications_enabled,
                    user_notifications::updated_at,
                ))
                .first::<(bool, DateTime<Utc>)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(row.map(|(notifications_enabled, updated_at)| NotificationPreference {
                user_id: user_id.clone(),
                notifications_enabled,
                updated_at,
            }))
        })
        .await
    }

    async fn set_notifications(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<NotificationPreference, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = user_notifications::table
                .filter(user_notifications::user_id.eq(&user_id))
                .select(user_notifications::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_notifications::table.filter(user_notifications::id.eq(id)))
                    .set((
                        user_notifications::notifications_enabled.eq(enabled),
                        user_notifications::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_notifications::table)
                    .values((
                        user_notifications::user_id.eq(&user_id),
                        user_notifications::notifications_enabled.eq(enabled),
                        user_notifications::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }

            Ok(NotificationPreference {
                user_id,
                notifications_enabled: enabled,
                updated_at: now,
            })
        })
        .await
    }

    async fn get_location(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationPreference>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let row = user_location::table
                .filter(user_location::user_id.eq(&user_id))
                .select((
                    user_location::latitude,
                    user_location::longitude,
                    user_location::place_name,
                    user_location::updated_at,
                ))
                .first::<(f64, f64, Option<String>, DateTime<Utc>)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(
                row.map(|(latitude, longitude, place_name, updated_at)| LocationPreference {
                    user_id: user_id.clone(),
                    latitude,
                    longitude,
                    place_name,
                    updated_at,
                }),
            )
        })
        .await
    }

    async fn set_location(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        place_name: Option<&str>,
    ) -> Result<LocationPreference, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let place_name = place_name.map(|s| s.to_string());
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = user_location::table
                .filter(user_location::user_id.eq(&user_id))
                .select(user_location::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_location::table.filter(user_location::id.eq(id)))
                    .set((
                        user_location::latitude.eq(latitude),
                        user_location::longitude.eq(longitude),
                        user_location::place_name.eq(place_name.as_deref()),
                        user_location::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_location::table)
                    .values((
                        user_location::user_id.eq(&user_id),
                        user_location::latitude.eq(latitude),
                        user_location::longitude.eq(longitude),
                        user_location::place_name.eq(place_name.as_deref()),
                        user_location::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }

            Ok(LocationPreference {
                user_id,
                latitude,
                longitude,
                place_name,
                updated_at: now,
            })
        })
        .await
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = superfeed)]
struct DbFeedItem {
    id: i64,
    channel_username: String,
    item_type: String,
    content: String,
    caption: Option<String>,
    message: Option<String>,
    media: serde_json::Value,
    metadata: serde_json::Value,
    stats: serde_json::Value,
    interactive_content: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbFeedItem {
    fn to_feed_item(self) -> Result<FeedItem, DatabaseError> {
        Ok(FeedItem {
            id: self.id,
            channel_username: self.channel_username,
            item_type: self
                .item_type
                .parse()
                .map_err(|e: crate::feed::FeedError| DatabaseError::Serialization(e.to_string()))?,
            content: self.content,
            caption: self.caption,
            message: self.message,
            media: from_value(self.media)?,
            metadata: from_value(self.metadata)?,
            stats: from_value(self.stats)?,
            interactive_content: self.interactive_content.map(from_value).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresFeedStore {
    pool: Pool,
}

impl PostgresFeedStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::FeedStore for PostgresFeedStore {
    async fn list_feed_items(
        &self,
        channel_username: &str,
        limit: i64,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            superfeed::table
                .filter(superfeed::channel_username.eq(channel_username))
                .order(superfeed::id.desc())
                .limit(limit)
                .select(DbFeedItem::as_select())
                .load::<DbFeedItem>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|row| row.to_feed_item())
                .collect()
        })
        .await
    }

    async fn get_feed_item(&self, item_id: i64) -> Result<Option<FeedItem>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            superfeed::table
                .filter(superfeed::id.eq(item_id))
                .select(DbFeedItem::as_select())
                .first::<DbFeedItem>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_feed_item())
                .transpose()
        })
        .await
    }

    async fn create_feed_item(&self, item: &NewFeedItem) -> Result<FeedItem, DatabaseError> {
        item.validate()
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let pool = self.pool.clone();
        let item = item.clone();
        with_connection(pool, move |conn| {
            let now = Utc::now();
            let metadata = item.metadata_or_default();
            let stats = FeedStats::default();
            let interactive = item
                .interactive_content
                .as_ref()
                .map(to_value)
                .transpose()?;

            diesel::insert_into(superfeed::table)
                .values((
                    superfeed::channel_username.eq(&item.channel_username),
                    superfeed::item_type.eq(item.item_type.as_str()),
                    superfeed::content.eq(&item.content),
                    superfeed::caption.eq(item.caption.as_deref()),
                    superfeed::message.eq(item.message.as_deref()),
                    superfeed::media.eq(to_value(&item.media)?),
                    superfeed::metadata.eq(to_value(&metadata)?),
                    superfeed::stats.eq(to_value(&stats)?),
                    superfeed::interactive_content.eq(interactive),
                    superfeed::created_at.eq(now),
                    superfeed::updated_at.eq(now),
                ))
                .returning(DbFeedItem::as_returning())
                .get_result::<DbFeedItem>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .to_feed_item()
        })
        .await
    }

    async fn count_feed_items(&self, channel_username: &str) -> Result<i64, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            superfeed::table
                .filter(superfeed::channel_username.eq(channel_username))
                .count()
                .get_result(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn upsert_response(&self, response: &InteractiveResponse) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let response = response.clone();
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = interactive_responses::table
                .filter(interactive_responses::user_id.eq(&response.user_id))
                .filter(interactive_responses::feed_item_id.eq(response.feed_item_id))
                .select(interactive_responses::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(
                    interactive_responses::table.filter(interactive_responses::id.eq(id)),
                )
                .set((
                    interactive_responses::response_type.eq(response.response_type.as_str()),
                    interactive_responses::payload.eq(response.payload.clone()),
                    interactive_responses::updated_at.eq(now),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                diesel::insert_into(interactive_responses::table)
                    .values((
                        interactive_responses::user_id.eq(&response.user_id),
                        interactive_responses::feed_item_id.eq(response.feed_item_id),
                        interactive_responses::response_type.eq(response.response_type.as_str()),
                        interactive_responses::payload.eq(response.payload.clone()),
                        interactive_responses::created_at.eq(now),
                        interactive_responses::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
    }

    async fn get_response(
        &self,
        user_id: &str,
        feed_item_id: i64,
    ) -> Result<Option<InteractiveResponse>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let row = interactive_responses::table
                .filter(interactive_responses::user_id.eq(&user_id))
                .filter(interactive_responses::feed_item_id.eq(feed_item_id))
                .select((
                    interactive_responses::response_type,
                    interactive_responses::payload,
                ))
                .first::<(String, serde_json::Value)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(response_type, payload)| {
                Ok(InteractiveResponse {
                    user_id: user_id.clone(),
                    feed_item_id,
                    response_type: response_type.parse().map_err(
                        |e: crate::feed::FeedError| DatabaseError::Serialization(e.to_string()),
                    )?,
                    payload,
                })
            })
            .transpose()
        })
        .await
    }

    async fn bump_response_count(&self, feed_item_id: i64) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            let raw: serde_json::Value = superfeed::table
                .filter(superfeed::id.eq(feed_item_id))
                .select(superfeed::stats)
                .first(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut stats: FeedStats = from_value(raw)?;
            stats.record_response();

            diesel::update(superfeed::table.filter(superfeed::id.eq(feed_item_id)))
                .set((
                    superfeed::stats.eq(to_value(&stats)?),
                    superfeed::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

pub struct PostgresMessageStore {
    pool: Pool,
}

impl PostgresMessageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MessageStore for PostgresMessageStore {
    async fn insert_message(
        &self,
        channel_username: &str,
        message_text: &str,
    ) -> Result<ChannelMessage, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        let message_text = message_text.to_string();
        with_connection(pool, move |conn| {
            let now = Utc::now();
            let id = diesel::insert_into(channels_messages::table)
                .values((
                    channels_messages::channel_username.eq(&channel_username),
                    channels_messages::message_text.eq(&message_text),
                    channels_messages::created_at.eq(now),
                ))
                .returning(channels_messages::id)
                .get_result::<i64>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(ChannelMessage {
                id,
                channel_username,
                message_text,
                created_at: now,
            })
        })
        .await
    }

    async fn count_messages(&self, channel_username: &str) -> Result<i64, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            channels_messages::table
                .filter(channels_messages::channel_username.eq(channel_username))
                .count()
                .get_result(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn latest_message(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelMessage>, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            let row = channels_messages::table
                .filter(channels_messages::channel_username.eq(&channel_username))
                .order(channels_messages::id.desc())
                .select((
                    channels_messages::id,
                    channels_messages::message_text,
                    channels_messages::created_at,
                ))
                .first::<(i64, String, DateTime<Utc>)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(row.map(|(id, message_text, created_at)| ChannelMessage {
                id,
                channel_username: channel_username.clone(),
                message_text,
                created_at,
            }))
        })
        .await
    }

    async fn upsert_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
        message_count: i64,
    ) -> Result<LastViewed, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = user_channel_last_viewed::table
                .filter(user_channel_last_viewed::user_id.eq(&user_id))
                .filter(user_channel_last_viewed::channel_username.eq(&channel_username))
                .select(user_channel_last_viewed::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id = if let Some(id) = existing {
                diesel::update(
                    user_channel_last_viewed::table.filter(user_channel_last_viewed::id.eq(id)),
                )
                .set((
                    user_channel_last_viewed::last_viewed.eq(now),
                    user_channel_last_viewed::message_count.eq(message_count),
                ))
                .execute(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
                id
            } else {
                diesel::insert_into(user_channel_last_viewed::table)
                    .values((
                        user_channel_last_viewed::user_id.eq(&user_id),
                        user_channel_last_viewed::channel_username.eq(&channel_username),
                        user_channel_last_viewed::last_viewed.eq(now),
                        user_channel_last_viewed::message_count.eq(message_count),
                    ))
                    .returning(user_channel_last_viewed::id)
                    .get_result::<i64>(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?
            };

            Ok(LastViewed {
                id,
                user_id,
                channel_username,
                last_viewed: now,
                message_count,
            })
        })
        .await
    }

    async fn get_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
    ) -> Result<Option<LastViewed>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            let row = user_channel_last_viewed::table
                .filter(user_channel_last_viewed::user_id.eq(&user_id))
                .filter(user_channel_last_viewed::channel_username.eq(&channel_username))
                .select((
                    user_channel_last_viewed::id,
                    user_channel_last_viewed::last_viewed,
                    user_channel_last_viewed::message_count,
                ))
                .first::<(i64, DateTime<Utc>, i64)>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(row.map(|(id, last_viewed, message_count)| LastViewed {
                id,
                user_id: user_id.clone(),
                channel_username: channel_username.clone(),
                last_viewed,
                message_count,
            }))
        })
        .await
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channels_activity)]
struct DbChannelActivity {
    id: i64,
    channel_username: String,
    last_message: Option<serde_json::Value>,
    message_count: i64,
    last_updated: DateTime<Utc>,
}

impl From<DbChannelActivity> for ChannelActivity {
    fn from(value: DbChannelActivity) -> Self {
        Self {
            id: value.id,
            channel_username: value.channel_username,
            last_message: value.last_message,
            message_count: value.message_count,
            last_updated: value.last_updated,
        }
    }
}

pub struct PostgresActivityStore {
    pool: Pool,
}

impl PostgresActivityStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::ActivityStore for PostgresActivityStore {
    async fn upsert_activity(
        &self,
        activity: &NewChannelActivity,
    ) -> Result<ChannelActivity, DatabaseError> {
        let pool = self.pool.clone();
        let activity = activity.clone();
        with_connection(pool, move |conn| {
            let existing = channels_activity::table
                .filter(channels_activity::channel_username.eq(&activity.channel_username))
                .select(channels_activity::id)
                .first::<i64>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id = if let Some(id) = existing {
                diesel::update(channels_activity::table.filter(channels_activity::id.eq(id)))
                    .set((
                        channels_activity::last_message.eq(activity.last_message.clone()),
                        channels_activity::message_count.eq(activity.message_count),
                        channels_activity::last_updated.eq(activity.last_updated),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
                id
            } else {
                diesel::insert_into(channels_activity::table)
                    .values((
                        channels_activity::channel_username.eq(&activity.channel_username),
                        channels_activity::last_message.eq(activity.last_message.clone()),
                        channels_activity::message_count.eq(activity.message_count),
                        channels_activity::last_updated.eq(activity.last_updated),
                    ))
                    .returning(channels_activity::id)
                    .get_result::<i64>(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?
            };

            Ok(ChannelActivity {
                id,
                channel_username: activity.channel_username,
                last_message: activity.last_message,
                message_count: activity.message_count,
                last_updated: activity.last_updated,
            })
        })
        .await
    }

    async fn get_activity(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelActivity>, DatabaseError> {
        let pool = self.pool.clone();
        let channel_username = channel_username.to_string();
        with_connection(pool, move |conn| {
            channels_activity::table
                .filter(channels_activity::channel_username.eq(channel_username))
                .select(DbChannelActivity::as_select())
                .first::<DbChannelActivity>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_activity_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChannelActivity>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            let mut visible: Vec<String> = channels::table
                .filter(channels::is_public.eq(true))
                .select(channels::username)
                .load::<String>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let granted: Vec<String> = tenant_requests::table
                .filter(tenant_requests::user_id.eq(&user_id))
                .filter(tenant_requests::status.eq(RequestStatus::Granted.as_str()))
                .select(tenant_requests::channel_username)
                .load::<String>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            visible.extend(granted);
            visible.sort();
            visible.dedup();

            channels_activity::table
                .filter(channels_activity::channel_username.eq_any(visible))
                .order(channels_activity::last_updated.desc())
                .select(DbChannelActivity::as_select())
                .load::<DbChannelActivity>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tenant_requests)]
struct DbTenantRequest {
    id: i64,
    request_id: String,
    request_type: String,
    user_id: String,
    channel_username: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbTenantRequest {
    fn to_request(self) -> Result<TenantRequest, DatabaseError> {
        Ok(TenantRequest {
            id: self.id,
            request_id: self.request_id,
            request_type: self.request_type,
            user_id: self.user_id,
            channel_username: self.channel_username,
            status: self
                .status
                .parse::<RequestStatus>()
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresRequestStore {
    pool: Pool,
}

impl PostgresRequestStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::RequestStore for PostgresRequestStore {
    async fn create_request(
        &self,
        request: &TenantRequest,
    ) -> Result<TenantRequest, DatabaseError> {
        let pool = self.pool.clone();
        let request = request.clone();
        with_connection(pool, move |conn| {
            let id = diesel::insert_into(tenant_requests::table)
                .values((
                    tenant_requests::request_id.eq(&request.request_id),
                    tenant_requests::request_type.eq(&request.request_type),
                    tenant_requests::user_id.eq(&request.user_id),
                    tenant_requests::channel_username.eq(&request.channel_username),
                    tenant_requests::status.eq(request.status.as_str()),
                    tenant_requests::created_at.eq(request.created_at),
                    tenant_requests::updated_at.eq(request.updated_at),
                ))
                .returning(tenant_requests::id)
                .get_result::<i64>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(TenantRequest { id, ..request })
        })
        .await
    }

    async fn upsert_request_record(
        &self,
        record: &TenantRequestRecord,
    ) -> Result<TenantRequest, DatabaseError> {
        let pool = self.pool.clone();
        let record = record.clone();
        with_connection(pool, move |conn| {
            let now = Utc::now();

            let existing = tenant_requests::table
                .filter(tenant_requests::request_id.eq(&record.id))
                .select(DbTenantRequest::as_select())
                .first::<DbTenantRequest>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(existing) = existing {
                let current = existing.to_request()?;
                let next = current
                    .status
                    .transition_to(record.status)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                diesel::update(tenant_requests::table.filter(tenant_requests::id.eq(current.id)))
                    .set((
                        tenant_requests::status.eq(next.as_str()),
                        tenant_requests::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                Ok(TenantRequest {
                    status: next,
                    updated_at: now,
                    ..current
                })
            } else {
                let id = diesel::insert_into(tenant_requests::table)
                    .values((
                        tenant_requests::request_id.eq(&record.id),
                        tenant_requests::request_type.eq(&record.request_type),
                        tenant_requests::user_id.eq(&record.uid),
                        tenant_requests::channel_username.eq(&record.username),
                        tenant_requests::status.eq(record.status.as_str()),
                        tenant_requests::created_at.eq(now),
                        tenant_requests::updated_at.eq(now),
                    ))
                    .returning(tenant_requests::id)
                    .get_result::<i64>(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                Ok(TenantRequest {
                    id,
                    request_id: record.id,
                    request_type: record.request_type,
                    user_id: record.uid,
                    channel_username: record.username,
                    status: record.status,
                    created_at: now,
                    updated_at: now,
                })
            }
        })
        .await
    }

    async fn get_request_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<TenantRequest>, DatabaseError> {
        let pool = self.pool.clone();
        let request_id = request_id.to_string();
        with_connection(pool, move |conn| {
            tenant_requests::table
                .filter(tenant_requests::request_id.eq(request_id))
                .select(DbTenantRequest::as_select())
                .first::<DbTenantRequest>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_request())
                .transpose()
        })
        .await
    }

    async fn list_requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TenantRequest>, DatabaseError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        with_connection(pool, move |conn| {
            tenant_requests::table
                .filter(tenant_requests::user_id.eq(user_id))
                .order(tenant_requests::id.desc())
                .select(DbTenantRequest::as_select())
                .load::<DbTenantRequest>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|row| row.to_request())
                .collect()
        })
        .await
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = relay_outbox)]
struct DbOutboxEntry {
    id: i64,
    event_id: String,
    event_kind: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbOutboxEntry {
    fn to_entry(self) -> Result<OutboxEntry, DatabaseError> {
        Ok(OutboxEntry {
            id: self.id,
            event_id: self.event_id,
            event_kind: self.event_kind,
            payload: self.payload,
            status: self
                .status
                .parse::<OutboxStatus>()
                .map_err(DatabaseError::Serialization)?,
            attempts: self.attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresOutboxStore {
    pool: Pool,
}

impl PostgresOutboxStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::OutboxStore for PostgresOutboxStore {
    async fn enqueue(
        &self,
        event_id: &str,
        event_kind: &str,
        payload: &serde_json::Value,
    ) -> Result<OutboxEntry, DatabaseError> {
        let pool = self.pool.clone();
        let event_id = event_id.to_string();
        let event_kind = event_kind.to_string();
        let payload = payload.clone();
        with_connection(pool, move |conn| {
            let now = Utc::now();
            diesel::insert_into(relay_outbox::table)
                .values((
                    relay_outbox::event_id.eq(&event_id),
                    relay_outbox::event_kind.eq(&event_kind),
                    relay_outbox::payload.eq(&payload),
                    relay_outbox::status.eq(OutboxStatus::Pending.as_str()),
                    relay_outbox::attempts.eq(0),
                    relay_outbox::next_attempt_at.eq(now),
                    relay_outbox::created_at.eq(now),
                    relay_outbox::updated_at.eq(now),
                ))
                .returning(DbOutboxEntry::as_returning())
                .get_result::<DbOutboxEntry>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .to_entry()
        })
        .await
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            relay_outbox::table
                .filter(relay_outbox::status.eq(OutboxStatus::Pending.as_str()))
                .filter(relay_outbox::next_attempt_at.le(now))
                .order(relay_outbox::id.asc())
                .limit(limit)
                .select(DbOutboxEntry::as_select())
                .load::<DbOutboxEntry>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|row| row.to_entry())
                .collect()
        })
        .await
    }

    async fn mark_resolved(&self, entry_id: i64) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            diesel::update(relay_outbox::table.filter(relay_outbox::id.eq(entry_id)))
                .set((
                    relay_outbox::status.eq(OutboxStatus::Resolved.as_str()),
                    relay_outbox::last_error.eq(None::<String>),
                    relay_outbox::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn record_failure(
        &self,
        entry_id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        failed: bool,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let error = error.to_string();
        with_connection(pool, move |conn| {
            let status = if failed {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            diesel::update(relay_outbox::table.filter(relay_outbox::id.eq(entry_id)))
                .set((
                    relay_outbox::status.eq(status.as_str()),
                    relay_outbox::attempts.eq(relay_outbox::attempts + 1),
                    relay_outbox::next_attempt_at.eq(next_attempt_at),
                    relay_outbox::last_error.eq(Some(error)),
                    relay_outbox::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn count_pending(&self) -> Result<i64, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            relay_outbox::table
                .filter(relay_outbox::status.eq(OutboxStatus::Pending.as_str()))
                .count()
                .get_result(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
