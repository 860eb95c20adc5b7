use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::sqlite::SqliteConnection;

use super::DatabaseError;
use super::models::{
    Channel, ChannelActivity, ChannelMessage, Language, LastViewed, LocationPreference,
    NewChannelActivity, NotificationPreference, OutboxEntry, OutboxStatus, UserLanguage,
    UserRecord,
};
use crate::access::{RequestStatus, TenantRequest, TenantRequestRecord};
use crate::db::schema_sqlite::{
    channels, channels_activity, channels_messages, interactive_responses, relay_outbox,
    superfeed, tenant_requests, user_channel_last_viewed, user_language, user_location,
    user_notifications, users,
};
use crate::feed::{FeedItem, FeedStats, InteractiveResponse, NewFeedItem};

diesel::define_sql_function! {
    fn last_insert_rowid() -> Integer;
}

// Helper to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Helper to parse ISO string back to DateTime
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

// JSON columns are TEXT in SQLite; serialize through serde_json.
fn json_to_string<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(DatabaseError::serialization)
}

fn string_to_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(DatabaseError::serialization)
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channels)]
struct DbChannel {
    id: i32,
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
    related_channels: String,
    created_at: String,
    updated_at: String,
}

impl DbChannel {
    fn to_channel(&self) -> Result<Channel, DatabaseError> {
        Ok(Channel {
            id: self.id as i64,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            avatar_url: self.avatar_url.clone(),
            category: self.category.clone(),
            is_public: self.is_public,
            premium: self.premium,
            is_realtime: self.is_realtime,
            is_owner_db: self.is_owner_db,
            owner_user_id: self.owner_user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            related_channels: string_to_json(&self.related_channels)?,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
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
    related_channels: String,
    created_at: String,
    updated_at: String,
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
    related_channels: String,
    updated_at: String,
}

pub struct SqliteChannelStore {
    db_path: Arc<String>,
}

impl SqliteChannelStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::ChannelStore for SqliteChannelStore {
    async fn get_channel(&self, username: &str) -> Result<Option<Channel>, DatabaseError> {
        let username = username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels::table
                .filter(channels::username.eq(username))
                .select(DbChannel::as_select())
                .first::<DbChannel>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|c| c.to_channel())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<(), DatabaseError> {
        let channel = channel.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let related = json_to_string(&channel.related_channels)?;
            let now = datetime_to_string(&Utc::now());

            let existing = channels::table
                .filter(channels::username.eq(&channel.username))
                .select(DbChannel::as_select())
                .first::<DbChannel>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(existing) = existing {
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
                    updated_at: now,
                };
                diesel::update(channels::table.filter(channels::id.eq(existing.id)))
                    .set(changes)
                    .execute(&mut conn)
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
                    created_at: datetime_to_string(&channel.created_at),
                    updated_at: now,
                };
                diesel::insert_into(channels::table)
                    .values(&new_channel)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_channel_usernames(&self) -> Result<Vec<String>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels::table
                .order(channels::username.asc())
                .select(channels::username)
                .load::<String>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_owner_db_usernames(&self) -> Result<Vec<String>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels::table
                .filter(channels::is_owner_db.eq(true))
                .order(channels::username.asc())
                .select(channels::username)
                .load::<String>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn count_channels(&self) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels::table
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
struct DbUser {
    id: i32,
    user_id: String,
    display_name: Option<String>,
    created_at: String,
}

impl DbUser {
    fn to_user(&self) -> Result<UserRecord, DatabaseError> {
        Ok(UserRecord {
            id: self.id as i64,
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

pub struct SqliteUserStore {
    db_path: Arc<String>,
}

impl SqliteUserStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::UserStore for SqliteUserStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            users::table
                .filter(users::user_id.eq(user_id))
                .select(DbUser::as_select())
                .first::<DbUser>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|u| u.to_user())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord, DatabaseError> {
        let user_id = user_id.to_string();
        let display_name = display_name.map(|s| s.to_string());
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();
            diesel::insert_into(users::table)
                .values((
                    users::user_id.eq(&user_id),
                    users::display_name.eq(display_name.as_deref()),
                    users::created_at.eq(datetime_to_string(&now)),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id: i32 = diesel::select(last_insert_rowid())
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(UserRecord {
                id: id as i64,
                user_id,
                display_name,
                created_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_language(&self, user_id: &str) -> Result<Option<UserLanguage>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = user_language::table
                .filter(user_language::user_id.eq(&user_id))
                .select((user_language::language, user_language::updated_at))
                .first::<(String, String)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(language, updated_at)| {
                Ok(UserLanguage {
                    user_id: user_id.clone(),
                    language: language
                        .parse::<Language>()
                        .map_err(DatabaseError::Serialization)?,
                    updated_at: string_to_datetime(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_language(
        &self,
        user_id: &str,
        language: Language,
    ) -> Result<UserLanguage, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();

            let existing = user_language::table
                .filter(user_language::user_id.eq(&user_id))
                .select(user_language::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_language::table.filter(user_language::id.eq(id)))
                    .set((
                        user_language::language.eq(language.as_str()),
                        user_language::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_language::table)
                    .values((
                        user_language::user_id.eq(&user_id),
                        user_language::language.eq(language.as_str()),
                        user_language::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }

            Ok(UserLanguage {
                user_id,
                language,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = user_notifications::table
                .filter(user_notifications::user_id.eq(&user_id))
                .select((
                    user_notifications::notifications_enabled,
                    user_notifications::updated_at,
                ))
                .first::<(bool, String)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(notifications_enabled, updated_at)| {
                Ok(NotificationPreference {
                    user_id: user_id.clone(),
                    notifications_enabled,
                    updated_at: string_to_datetime(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_notifications(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<NotificationPreference, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();

            let existing = user_notifications::table
                .filter(user_notifications::user_id.eq(&user_id))
                .select(user_notifications::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_notifications::table.filter(user_notifications::id.eq(id)))
                    .set((
                        user_notifications::notifications_enabled.eq(enabled),
                        user_notifications::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_notifications::table)
                    .values((
                        user_notifications::user_id.eq(&user_id),
                        user_notifications::notifications_enabled.eq(enabled),
                        user_notifications::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }

            Ok(NotificationPreference {
                user_id,
                notifications_enabled: enabled,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_location(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationPreference>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = user_location::table
                .filter(user_location::user_id.eq(&user_id))
                .select((
                    user_location::latitude,
                    user_location::longitude,
                    user_location::place_name,
                    user_location::updated_at,
                ))
                .first::<(f64, f64, Option<String>, String)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(latitude, longitude, place_name, updated_at)| {
                Ok(LocationPreference {
                    user_id: user_id.clone(),
                    latitude,
                    longitude,
                    place_name,
                    updated_at: string_to_datetime(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_location(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        place_name: Option<&str>,
    ) -> Result<LocationPreference, DatabaseError> {
        let user_id = user_id.to_string();
        let place_name = place_name.map(|s| s.to_string());
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();

            let existing = user_location::table
                .filter(user_location::user_id.eq(&user_id))
                .select(user_location::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(user_location::table.filter(user_location::id.eq(id)))
                    .set((
                        user_location::latitude.eq(latitude),
                        user_location::longitude.eq(longitude),
                        user_location::place_name.eq(place_name.as_deref()),
                        user_location::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            } else {
                diesel::insert_into(user_location::table)
                    .values((
                        user_location::user_id.eq(&user_id),
                        user_location::latitude.eq(latitude),
                        user_location::longitude.eq(longitude),
                        user_location::place_name.eq(place_name.as_deref()),
                        user_location::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
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
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = superfeed)]
struct DbFeedItem {
    id: i32,
    channel_username: String,
    item_type: String,
    content: String,
    caption: Option<String>,
    message: Option<String>,
    media: String,
    metadata: String,
    stats: String,
    interactive_content: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DbFeedItem {
    fn to_feed_item(&self) -> Result<FeedItem, DatabaseError> {
        Ok(FeedItem {
            id: self.id as i64,
            channel_username: self.channel_username.clone(),
            item_type: self
                .item_type
                .parse()
                .map_err(|e: crate::feed::FeedError| DatabaseError::Serialization(e.to_string()))?,
            content: self.content.clone(),
            caption: self.caption.clone(),
            message: self.message.clone(),
            media: string_to_json(&self.media)?,
            metadata: string_to_json(&self.metadata)?,
            stats: string_to_json(&self.stats)?,
            interactive_content: self
                .interactive_content
                .as_deref()
                .map(string_to_json)
                .transpose()?,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

pub struct SqliteFeedStore {
    db_path: Arc<String>,
}

impl SqliteFeedStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::FeedStore for SqliteFeedStore {
    async fn list_feed_items(
        &self,
        channel_username: &str,
        limit: i64,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            superfeed::table
                .filter(superfeed::channel_username.eq(channel_username))
                .order(superfeed::id.desc())
                .limit(limit)
                .select(DbFeedItem::as_select())
                .load::<DbFeedItem>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .iter()
                .map(|row| row.to_feed_item())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_feed_item(&self, item_id: i64) -> Result<Option<FeedItem>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            superfeed::table
                .filter(superfeed::id.eq(item_id as i32))
                .select(DbFeedItem::as_select())
                .first::<DbFeedItem>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_feed_item())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create_feed_item(&self, item: &NewFeedItem) -> Result<FeedItem, DatabaseError> {
        item.validate()
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let item = item.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();
            let metadata = item.metadata_or_default();
            let stats = FeedStats::default();
            let interactive = item
                .interactive_content
                .as_ref()
                .map(json_to_string)
                .transpose()?;

            diesel::insert_into(superfeed::table)
                .values((
                    superfeed::channel_username.eq(&item.channel_username),
                    superfeed::item_type.eq(item.item_type.as_str()),
                    superfeed::content.eq(&item.content),
                    superfeed::caption.eq(item.caption.as_deref()),
                    superfeed::message.eq(item.message.as_deref()),
                    superfeed::media.eq(json_to_string(&item.media)?),
                    superfeed::metadata.eq(json_to_string(&metadata)?),
                    superfeed::stats.eq(json_to_string(&stats)?),
                    superfeed::interactive_content.eq(interactive.as_deref()),
                    superfeed::created_at.eq(datetime_to_string(&now)),
                    superfeed::updated_at.eq(datetime_to_string(&now)),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id: i32 = diesel::select(last_insert_rowid())
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(FeedItem {
                id: id as i64,
                channel_username: item.channel_username,
                item_type: item.item_type,
                content: item.content,
                caption: item.caption,
                message: item.message,
                media: item.media,
                metadata,
                stats,
                interactive_content: item.interactive_content,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn count_feed_items(&self, channel_username: &str) -> Result<i64, DatabaseError> {
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            superfeed::table
                .filter(superfeed::channel_username.eq(channel_username))
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_response(&self, response: &InteractiveResponse) -> Result<(), DatabaseError> {
        let response = response.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = datetime_to_string(&Utc::now());
            let payload = json_to_string(&response.payload)?;

            let existing = interactive_responses::table
                .filter(interactive_responses::user_id.eq(&response.user_id))
                .filter(interactive_responses::feed_item_id.eq(response.feed_item_id))
                .select(interactive_responses::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(id) = existing {
                diesel::update(
                    interactive_responses::table.filter(interactive_responses::id.eq(id)),
                )
                .set((
                    interactive_responses::response_type.eq(response.response_type.as_str()),
                    interactive_responses::payload.eq(&payload),
                    interactive_responses::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                diesel::insert_into(interactive_responses::table)
                    .values((
                        interactive_responses::user_id.eq(&response.user_id),
                        interactive_responses::feed_item_id.eq(response.feed_item_id),
                        interactive_responses::response_type.eq(response.response_type.as_str()),
                        interactive_responses::payload.eq(&payload),
                        interactive_responses::created_at.eq(&now),
                        interactive_responses::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_response(
        &self,
        user_id: &str,
        feed_item_id: i64,
    ) -> Result<Option<InteractiveResponse>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = interactive_responses::table
                .filter(interactive_responses::user_id.eq(&user_id))
                .filter(interactive_responses::feed_item_id.eq(feed_item_id))
                .select((
                    interactive_responses::response_type,
                    interactive_responses::payload,
                ))
                .first::<(String, String)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(response_type, payload)| {
                Ok(InteractiveResponse {
                    user_id: user_id.clone(),
                    feed_item_id,
                    response_type: response_type.parse().map_err(
                        |e: crate::feed::FeedError| DatabaseError::Serialization(e.to_string()),
                    )?,
                    payload: string_to_json(&payload)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn bump_response_count(&self, feed_item_id: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let raw: String = superfeed::table
                .filter(superfeed::id.eq(feed_item_id as i32))
                .select(superfeed::stats)
                .first(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut stats: FeedStats = string_to_json(&raw)?;
            stats.record_response();

            diesel::update(superfeed::table.filter(superfeed::id.eq(feed_item_id as i32)))
                .set((
                    superfeed::stats.eq(json_to_string(&stats)?),
                    superfeed::updated_at.eq(datetime_to_string(&Utc::now())),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteMessageStore {
    db_path: Arc<String>,
}

impl SqliteMessageStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::MessageStore for SqliteMessageStore {
    async fn insert_message(
        &self,
        channel_username: &str,
        message_text: &str,
    ) -> Result<ChannelMessage, DatabaseError> {
        let channel_username = channel_username.to_string();
        let message_text = message_text.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();
            diesel::insert_into(channels_messages::table)
                .values((
                    channels_messages::channel_username.eq(&channel_username),
                    channels_messages::message_text.eq(&message_text),
                    channels_messages::created_at.eq(datetime_to_string(&now)),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id: i32 = diesel::select(last_insert_rowid())
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(ChannelMessage {
                id: id as i64,
                channel_username,
                message_text,
                created_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn count_messages(&self, channel_username: &str) -> Result<i64, DatabaseError> {
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels_messages::table
                .filter(channels_messages::channel_username.eq(channel_username))
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn latest_message(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelMessage>, DatabaseError> {
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = channels_messages::table
                .filter(channels_messages::channel_username.eq(&channel_username))
                .order(channels_messages::id.desc())
                .select((
                    channels_messages::id,
                    channels_messages::message_text,
                    channels_messages::created_at,
                ))
                .first::<(i32, String, String)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(id, message_text, created_at)| {
                Ok(ChannelMessage {
                    id: id as i64,
                    channel_username: channel_username.clone(),
                    message_text,
                    created_at: string_to_datetime(&created_at)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
        message_count: i64,
    ) -> Result<LastViewed, DatabaseError> {
        let user_id = user_id.to_string();
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();

            let existing = user_channel_last_viewed::table
                .filter(user_channel_last_viewed::user_id.eq(&user_id))
                .filter(user_channel_last_viewed::channel_username.eq(&channel_username))
                .select(user_channel_last_viewed::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id = if let Some(id) = existing {
                diesel::update(
                    user_channel_last_viewed::table.filter(user_channel_last_viewed::id.eq(id)),
                )
                .set((
                    user_channel_last_viewed::last_viewed.eq(datetime_to_string(&now)),
                    user_channel_last_viewed::message_count.eq(message_count),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
                id
            } else {
                diesel::insert_into(user_channel_last_viewed::table)
                    .values((
                        user_channel_last_viewed::user_id.eq(&user_id),
                        user_channel_last_viewed::channel_username.eq(&channel_username),
                        user_channel_last_viewed::last_viewed.eq(datetime_to_string(&now)),
                        user_channel_last_viewed::message_count.eq(message_count),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                diesel::select(last_insert_rowid())
                    .get_result::<i32>(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?
            };

            Ok(LastViewed {
                id: id as i64,
                user_id,
                channel_username,
                last_viewed: now,
                message_count,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_last_viewed(
        &self,
        user_id: &str,
        channel_username: &str,
    ) -> Result<Option<LastViewed>, DatabaseError> {
        let user_id = user_id.to_string();
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = user_channel_last_viewed::table
                .filter(user_channel_last_viewed::user_id.eq(&user_id))
                .filter(user_channel_last_viewed::channel_username.eq(&channel_username))
                .select((
                    user_channel_last_viewed::id,
                    user_channel_last_viewed::last_viewed,
                    user_channel_last_viewed::message_count,
                ))
                .first::<(i32, String, i64)>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            row.map(|(id, last_viewed, message_count)| {
                Ok(LastViewed {
                    id: id as i64,
                    user_id: user_id.clone(),
                    channel_username: channel_username.clone(),
                    last_viewed: string_to_datetime(&last_viewed)?,
                    message_count,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channels_activity)]
struct DbChannelActivity {
    id: i32,
    channel_username: String,
    last_message: Option<String>,
    message_count: i64,
    last_updated: String,
}

impl DbChannelActivity {
    fn to_activity(&self) -> Result<ChannelActivity, DatabaseError> {
        Ok(ChannelActivity {
            id: self.id as i64,
            channel_username: self.channel_username.clone(),
            last_message: self
                .last_message
                .as_deref()
                .map(string_to_json)
                .transpose()?,
            message_count: self.message_count,
            last_updated: string_to_datetime(&self.last_updated)?,
        })
    }
}

pub struct SqliteActivityStore {
    db_path: Arc<String>,
}

impl SqliteActivityStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::ActivityStore for SqliteActivityStore {
    async fn upsert_activity(
        &self,
        activity: &NewChannelActivity,
    ) -> Result<ChannelActivity, DatabaseError> {
        let activity = activity.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let last_message = activity
                .last_message
                .as_ref()
                .map(json_to_string)
                .transpose()?;

            let existing = channels_activity::table
                .filter(channels_activity::channel_username.eq(&activity.channel_username))
                .select(channels_activity::id)
                .first::<i32>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id = if let Some(id) = existing {
                diesel::update(channels_activity::table.filter(channels_activity::id.eq(id)))
                    .set((
                        channels_activity::last_message.eq(last_message.as_deref()),
                        channels_activity::message_count.eq(activity.message_count),
                        channels_activity::last_updated
                            .eq(datetime_to_string(&activity.last_updated)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
                id
            } else {
                diesel::insert_into(channels_activity::table)
                    .values((
                        channels_activity::channel_username.eq(&activity.channel_username),
                        channels_activity::last_message.eq(last_message.as_deref()),
                        channels_activity::message_count.eq(activity.message_count),
                        channels_activity::last_updated
                            .eq(datetime_to_string(&activity.last_updated)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                diesel::select(last_insert_rowid())
                    .get_result::<i32>(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?
            };

            Ok(ChannelActivity {
                id: id as i64,
                channel_username: activity.channel_username,
                last_message: activity.last_message,
                message_count: activity.message_count,
                last_updated: activity.last_updated,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_activity(
        &self,
        channel_username: &str,
    ) -> Result<Option<ChannelActivity>, DatabaseError> {
        let channel_username = channel_username.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            channels_activity::table
                .filter(channels_activity::channel_username.eq(channel_username))
                .select(DbChannelActivity::as_select())
                .first::<DbChannelActivity>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_activity())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_activity_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChannelActivity>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

            let mut visible: Vec<String> = channels::table
                .filter(channels::is_public.eq(true))
                .select(channels::username)
                .load::<String>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let granted: Vec<String> = tenant_requests::table
                .filter(tenant_requests::user_id.eq(&user_id))
                .filter(tenant_requests::status.eq(RequestStatus::Granted.as_str()))
                .select(tenant_requests::channel_username)
                .load::<String>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            visible.extend(granted);
            visible.sort();
            visible.dedup();

            channels_activity::table
                .filter(channels_activity::channel_username.eq_any(visible))
                .order(channels_activity::last_updated.desc())
                .select(DbChannelActivity::as_select())
                .load::<DbChannelActivity>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .iter()
                .map(|row| row.to_activity())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tenant_requests)]
struct DbTenantRequest {
    id: i32,
    request_id: String,
    request_type: String,
    user_id: String,
    channel_username: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl DbTenantRequest {
    fn to_request(&self) -> Result<TenantRequest, DatabaseError> {
        Ok(TenantRequest {
            id: self.id as i64,
            request_id: self.request_id.clone(),
            request_type: self.request_type.clone(),
            user_id: self.user_id.clone(),
            channel_username: self.channel_username.clone(),
            status: self
                .status
                .parse::<RequestStatus>()
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

pub struct SqliteRequestStore {
    db_path: Arc<String>,
}

impl SqliteRequestStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::RequestStore for SqliteRequestStore {
    async fn create_request(
        &self,
        request: &TenantRequest,
    ) -> Result<TenantRequest, DatabaseError> {
        let request = request.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::insert_into(tenant_requests::table)
                .values((
                    tenant_requests::request_id.eq(&request.request_id),
                    tenant_requests::request_type.eq(&request.request_type),
                    tenant_requests::user_id.eq(&request.user_id),
                    tenant_requests::channel_username.eq(&request.channel_username),
                    tenant_requests::status.eq(request.status.as_str()),
                    tenant_requests::created_at.eq(datetime_to_string(&request.created_at)),
                    tenant_requests::updated_at.eq(datetime_to_string(&request.updated_at)),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id: i32 = diesel::select(last_insert_rowid())
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(TenantRequest {
                id: id as i64,
                ..request
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_request_record(
        &self,
        record: &TenantRequestRecord,
    ) -> Result<TenantRequest, DatabaseError> {
        let record = record.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();

            let existing = tenant_requests::table
                .filter(tenant_requests::request_id.eq(&record.id))
                .select(DbTenantRequest::as_select())
                .first::<DbTenantRequest>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(existing) = existing {
                let current = existing.to_request()?;
                let next = current
                    .status
                    .transition_to(record.status)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                diesel::update(tenant_requests::table.filter(tenant_requests::id.eq(existing.id)))
                    .set((
                        tenant_requests::status.eq(next.as_str()),
                        tenant_requests::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                Ok(TenantRequest {
                    status: next,
                    updated_at: now,
                    ..current
                })
            } else {
                diesel::insert_into(tenant_requests::table)
                    .values((
                        tenant_requests::request_id.eq(&record.id),
                        tenant_requests::request_type.eq(&record.request_type),
                        tenant_requests::user_id.eq(&record.uid),
                        tenant_requests::channel_username.eq(&record.username),
                        tenant_requests::status.eq(record.status.as_str()),
                        tenant_requests::created_at.eq(datetime_to_string(&now)),
                        tenant_requests::updated_at.eq(datetime_to_string(&now)),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                let id: i32 = diesel::select(last_insert_rowid())
                    .get_result(&mut conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;

                Ok(TenantRequest {
                    id: id as i64,
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
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_request_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<TenantRequest>, DatabaseError> {
        let request_id = request_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            tenant_requests::table
                .filter(tenant_requests::request_id.eq(request_id))
                .select(DbTenantRequest::as_select())
                .first::<DbTenantRequest>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_request())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TenantRequest>, DatabaseError> {
        let user_id = user_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            tenant_requests::table
                .filter(tenant_requests::user_id.eq(user_id))
                .order(tenant_requests::id.desc())
                .select(DbTenantRequest::as_select())
                .load::<DbTenantRequest>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .iter()
                .map(|row| row.to_request())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = relay_outbox)]
struct DbOutboxEntry {
    id: i32,
    event_id: String,
    event_kind: String,
    payload: String,
    status: String,
    attempts: i32,
    next_attempt_at: String,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DbOutboxEntry {
    fn to_entry(&self) -> Result<OutboxEntry, DatabaseError> {
        Ok(OutboxEntry {
            id: self.id as i64,
            event_id: self.event_id.clone(),
            event_kind: self.event_kind.clone(),
            payload: string_to_json(&self.payload)?,
            status: self
                .status
                .parse::<OutboxStatus>()
                .map_err(DatabaseError::Serialization)?,
            attempts: self.attempts,
            next_attempt_at: string_to_datetime(&self.next_attempt_at)?,
            last_error: self.last_error.clone(),
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

pub struct SqliteOutboxStore {
    db_path: Arc<String>,
}

impl SqliteOutboxStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::OutboxStore for SqliteOutboxStore {
    async fn enqueue(
        &self,
        event_id: &str,
        event_kind: &str,
        payload: &serde_json::Value,
    ) -> Result<OutboxEntry, DatabaseError> {
        let event_id = event_id.to_string();
        let event_kind = event_kind.to_string();
        let payload = payload.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = Utc::now();
            diesel::insert_into(relay_outbox::table)
                .values((
                    relay_outbox::event_id.eq(&event_id),
                    relay_outbox::event_kind.eq(&event_kind),
                    relay_outbox::payload.eq(json_to_string(&payload)?),
                    relay_outbox::status.eq(OutboxStatus::Pending.as_str()),
                    relay_outbox::attempts.eq(0),
                    relay_outbox::next_attempt_at.eq(datetime_to_string(&now)),
                    relay_outbox::created_at.eq(datetime_to_string(&now)),
                    relay_outbox::updated_at.eq(datetime_to_string(&now)),
                ))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let id: i32 = diesel::select(last_insert_rowid())
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(OutboxEntry {
                id: id as i64,
                event_id,
                event_kind,
                payload,
                status: OutboxStatus::Pending,
                attempts: 0,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            // RFC3339 strings with variable precision do not compare reliably
            // as text, so filter due-ness after parsing.
            let rows = relay_outbox::table
                .filter(relay_outbox::status.eq(OutboxStatus::Pending.as_str()))
                .order(relay_outbox::id.asc())
                .select(DbOutboxEntry::as_select())
                .load::<DbOutboxEntry>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut due = Vec::new();
            for row in rows {
                let entry = row.to_entry()?;
                if entry.next_attempt_at <= now {
                    due.push(entry);
                    if due.len() as i64 >= limit {
                        break;
                    }
                }
            }
            Ok(due)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn mark_resolved(&self, entry_id: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::update(relay_outbox::table.filter(relay_outbox::id.eq(entry_id as i32)))
                .set((
                    relay_outbox::status.eq(OutboxStatus::Resolved.as_str()),
                    relay_outbox::last_error.eq(None::<String>),
                    relay_outbox::updated_at.eq(datetime_to_string(&Utc::now())),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn record_failure(
        &self,
        entry_id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        failed: bool,
    ) -> Result<(), DatabaseError> {
        let error = error.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let status = if failed {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            diesel::update(relay_outbox::table.filter(relay_outbox::id.eq(entry_id as i32)))
                .set((
                    relay_outbox::status.eq(status.as_str()),
                    relay_outbox::attempts.eq(relay_outbox::attempts + 1),
                    relay_outbox::next_attempt_at.eq(datetime_to_string(&next_attempt_at)),
                    relay_outbox::last_error.eq(Some(error)),
                    relay_outbox::updated_at.eq(datetime_to_string(&Utc::now())),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn count_pending(&self) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            relay_outbox::table
                .filter(relay_outbox::status.eq(OutboxStatus::Pending.as_str()))
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::DatabaseManager;
    use crate::feed::{FeedItemKind, InteractiveContent, PollContent};

    async fn test_manager(dir: &TempDir) -> DatabaseManager {
        let path = dir.path().join("test.db");
        let config = DatabaseConfig {
            url: None,
            conn_string: None,
            filename: Some(path.to_string_lossy().to_string()),
            max_connections: None,
            min_connections: None,
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn channel_upsert_and_lookup_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.channel_store();

        let mut channel = Channel::new("janedoe".to_string(), "Jane Doe".to_string());
        channel.related_channels = vec!["johndoe".to_string()];
        store.upsert_channel(&channel).await.unwrap();

        let loaded = store.get_channel("janedoe").await.unwrap().unwrap();
        assert_eq!(loaded.username, "janedoe");
        assert_eq!(loaded.related_channels, vec!["johndoe".to_string()]);
        assert!(!loaded.is_owner_db);

        channel.display_name = "Jane".to_string();
        store.upsert_channel(&channel).await.unwrap();
        assert_eq!(store.count_channels().await.unwrap(), 1);
        let loaded = store.get_channel("janedoe").await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "Jane");
    }

    #[tokio::test]
    async fn feed_items_come_back_newest_first() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        store
            .create_feed_item(&NewFeedItem::text("janedoe", FeedItemKind::Tweet, "first"))
            .await
            .unwrap();
        store
            .create_feed_item(&NewFeedItem::text("janedoe", FeedItemKind::Tweet, "second"))
            .await
            .unwrap();

        let items = store.list_feed_items("janedoe", 100).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "second");
        assert_eq!(items[1].content, "first");
    }

    #[tokio::test]
    async fn duplicate_create_produces_two_rows() {
        // Pins the no-idempotency behavior: a client retry after timeout
        // really does insert a second row.
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        let item = NewFeedItem::text("janedoe", FeedItemKind::Tweet, "same payload");
        let first = store.create_feed_item(&item).await.unwrap();
        let second = store.create_feed_item(&item).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.count_feed_items("janedoe").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn create_rejects_mismatched_interactive_content() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Tweet, "hello");
        item.interactive_content = Some(InteractiveContent::Poll(PollContent {
            question: "q".to_string(),
            options: vec!["a".to_string()],
        }));

        assert!(store.create_feed_item(&item).await.is_err());
        assert_eq!(store.count_feed_items("janedoe").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn poll_item_roundtrips_interactive_payload() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Poll, "vote!");
        item.interactive_content = Some(InteractiveContent::Poll(PollContent {
            question: "favorite color?".to_string(),
            options: vec!["red".to_string(), "blue".to_string()],
        }));

        let created = store.create_feed_item(&item).await.unwrap();
        let loaded = store.get_feed_item(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.item_type, FeedItemKind::Poll);
        match loaded.interactive_content {
            Some(InteractiveContent::Poll(poll)) => {
                assert_eq!(poll.options.len(), 2);
            }
            other => panic!("expected poll content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_upsert_keeps_one_row_per_user_and_item() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Poll, "vote!");
        item.interactive_content = Some(InteractiveContent::Poll(PollContent {
            question: "q".to_string(),
            options: vec!["a".to_string(), "b".to_string()],
        }));
        let created = store.create_feed_item(&item).await.unwrap();

        let mut response = InteractiveResponse {
            user_id: "u1".to_string(),
            feed_item_id: created.id,
            response_type: FeedItemKind::Poll,
            payload: serde_json::json!({ "selected": 0 }),
        };
        store.upsert_response(&response).await.unwrap();

        response.payload = serde_json::json!({ "selected": 1 });
        store.upsert_response(&response).await.unwrap();

        let stored = store.get_response("u1", created.id).await.unwrap().unwrap();
        assert_eq!(stored.payload, serde_json::json!({ "selected": 1 }));
    }

    #[tokio::test]
    async fn bump_response_count_increments_stats() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.feed_store();

        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Poll, "vote!");
        item.interactive_content = Some(InteractiveContent::Poll(PollContent {
            question: "q".to_string(),
            options: vec!["a".to_string()],
        }));
        let created = store.create_feed_item(&item).await.unwrap();

        store.bump_response_count(created.id).await.unwrap();
        store.bump_response_count(created.id).await.unwrap();

        let loaded = store.get_feed_item(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.stats.responses, 2);
    }

    #[tokio::test]
    async fn message_count_reflects_inserts() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.message_store();

        for n in 0..5 {
            store
                .insert_message("janedoe", &format!("message {n}"))
                .await
                .unwrap();
        }

        assert_eq!(store.count_messages("janedoe").await.unwrap(), 5);
        assert_eq!(store.count_messages("nobody").await.unwrap(), 0);
        let latest = store.latest_message("janedoe").await.unwrap().unwrap();
        assert_eq!(latest.message_text, "message 4");
    }

    #[tokio::test]
    async fn last_viewed_upsert_overwrites_previous_row() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.message_store();

        let first = store.upsert_last_viewed("u1", "janedoe", 3).await.unwrap();
        let second = store.upsert_last_viewed("u1", "janedoe", 5).await.unwrap();
        assert_eq!(first.id, second.id);

        let loaded = store.get_last_viewed("u1", "janedoe").await.unwrap().unwrap();
        assert_eq!(loaded.message_count, 5);
    }

    #[tokio::test]
    async fn language_and_notifications_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.user_store();

        assert!(store.get_language("u1").await.unwrap().is_none());
        store.set_language("u1", Language::Telugu).await.unwrap();
        store.set_language("u1", Language::Tamil).await.unwrap();
        let loaded = store.get_language("u1").await.unwrap().unwrap();
        assert_eq!(loaded.language, Language::Tamil);

        store.set_notifications("u1", true).await.unwrap();
        let prefs = store.get_notifications("u1").await.unwrap().unwrap();
        assert!(prefs.notifications_enabled);
    }

    #[tokio::test]
    async fn request_upsert_enforces_transition_rules() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.request_store();

        let record = TenantRequestRecord {
            id: "r-1".to_string(),
            request_type: "channel_access".to_string(),
            uid: "u1".to_string(),
            username: "janedoe".to_string(),
            status: RequestStatus::Pending,
        };
        store.upsert_request_record(&record).await.unwrap();

        let granted = TenantRequestRecord {
            status: RequestStatus::Granted,
            ..record.clone()
        };
        let updated = store.upsert_request_record(&granted).await.unwrap();
        assert_eq!(updated.status, RequestStatus::Granted);

        // granted -> pending is forbidden
        let reverted = TenantRequestRecord {
            status: RequestStatus::Pending,
            ..record
        };
        assert!(store.upsert_request_record(&reverted).await.is_err());
        let loaded = store
            .get_request_by_request_id("r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, RequestStatus::Granted);
    }

    #[tokio::test]
    async fn activity_list_respects_granted_requests() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;

        let channel_store = manager.channel_store();
        let mut public = Channel::new("public".to_string(), "Public".to_string());
        public.is_public = true;
        channel_store.upsert_channel(&public).await.unwrap();

        let mut private = Channel::new("private".to_string(), "Private".to_string());
        private.is_public = false;
        channel_store.upsert_channel(&private).await.unwrap();

        let activity_store = manager.activity_store();
        for username in ["public", "private"] {
            activity_store
                .upsert_activity(&NewChannelActivity {
                    channel_username: username.to_string(),
                    last_message: None,
                    message_count: 1,
                    last_updated: Utc::now(),
                })
                .await
                .unwrap();
        }

        let visible = activity_store.list_activity_for_user("u1").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].channel_username, "public");

        manager
            .request_store()
            .upsert_request_record(&TenantRequestRecord {
                id: "r-1".to_string(),
                request_type: "channel_access".to_string(),
                uid: "u1".to_string(),
                username: "private".to_string(),
                status: RequestStatus::Granted,
            })
            .await
            .unwrap();

        let visible = activity_store.list_activity_for_user("u1").await.unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test]
    async fn outbox_failure_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir).await;
        let store = manager.outbox_store();

        let entry = store
            .enqueue("e-1", "tenant_request", &serde_json::json!({ "id": "r-1" }))
            .await
            .unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 1);

        let due = store.due_entries(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);

        // retry in the future: still pending, but no longer due
        let next = Utc::now() + chrono::Duration::seconds(60);
        store
            .record_failure(entry.id, "boom", next, false)
            .await
            .unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 1);
        assert!(store.due_entries(Utc::now(), 10).await.unwrap().is_empty());

        store.mark_resolved(entry.id).await.unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }
}
