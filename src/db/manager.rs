use std::sync::Arc;

#[cfg(any(feature = "postgres", feature = "sqlite"))]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};

use crate::config::{DatabaseConfig, DbType as ConfigDbType};
#[cfg(feature = "postgres")]
use crate::db::postgres::{
    PostgresActivityStore, PostgresChannelStore, PostgresFeedStore, PostgresMessageStore,
    PostgresOutboxStore, PostgresRequestStore, PostgresUserStore,
};
use crate::db::{
    ActivityStore, ChannelStore, DatabaseError, FeedStore, MessageStore, OutboxStore, RequestStore,
    UserStore,
};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{
    SqliteActivityStore, SqliteChannelStore, SqliteFeedStore, SqliteMessageStore,
    SqliteOutboxStore, SqliteRequestStore, SqliteUserStore,
};

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    channel_store: Arc<dyn ChannelStore>,
    user_store: Arc<dyn UserStore>,
    feed_store: Arc<dyn FeedStore>,
    message_store: Arc<dyn MessageStore>,
    activity_store: Arc<dyn ActivityStore>,
    request_store: Arc<dyn RequestStore>,
    outbox_store: Arc<dyn OutboxStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();
                let max_connections = config.max_connections();
                let min_connections = config.min_connections();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);

                let builder = r2d2::Pool::builder()
                    .max_size(max_connections.unwrap_or(10))
                    .min_idle(Some(min_connections.unwrap_or(1)));

                let pool = builder
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let channel_store = Arc::new(PostgresChannelStore::new(pool.clone()));
                let user_store = Arc::new(PostgresUserStore::new(pool.clone()));
                let feed_store = Arc::new(PostgresFeedStore::new(pool.clone()));
                let message_store = Arc::new(PostgresMessageStore::new(pool.clone()));
                let activity_store = Arc::new(PostgresActivityStore::new(pool.clone()));
                let request_store = Arc::new(PostgresRequestStore::new(pool.clone()));
                let outbox_store = Arc::new(PostgresOutboxStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    channel_store,
                    user_store,
                    feed_store,
                    message_store,
                    activity_store,
                    request_store,
                    outbox_store,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config
                    .sqlite_path()
                    .ok_or_else(|| DatabaseError::Connection("missing sqlite path".to_string()))?;
                let path_arc = Arc::new(path.clone());

                let channel_store = Arc::new(SqliteChannelStore::new(path_arc.clone()));
                let user_store = Arc::new(SqliteUserStore::new(path_arc.clone()));
                let feed_store = Arc::new(SqliteFeedStore::new(path_arc.clone()));
                let message_store = Arc::new(SqliteMessageStore::new(path_arc.clone()));
                let activity_store = Arc::new(SqliteActivityStore::new(path_arc.clone()));
                let request_store = Arc::new(SqliteRequestStore::new(path_arc.clone()));
                let outbox_store = Arc::new(SqliteOutboxStore::new(path_arc));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    channel_store,
                    user_store,
                    feed_store,
                    message_store,
                    activity_store,
                    request_store,
                    outbox_store,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().expect("postgres pool is set");
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().expect("sqlite path is set");
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS channels (
                    id BIGSERIAL PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    display_name TEXT NOT NULL,
                    description TEXT,
                    avatar_url TEXT,
                    category TEXT,
                    is_public BOOLEAN NOT NULL DEFAULT TRUE,
                    premium BOOLEAN NOT NULL DEFAULT FALSE,
                    is_realtime BOOLEAN NOT NULL DEFAULT FALSE,
                    is_owner_db BOOLEAN NOT NULL DEFAULT FALSE,
                    owner_user_id TEXT,
                    tenant_id TEXT,
                    related_channels JSONB NOT NULL DEFAULT '[]',
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    display_name TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS superfeed (
                    id BIGSERIAL PRIMARY KEY,
                    channel_username TEXT NOT NULL,
                    item_type TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '',
                    caption TEXT,
                    message TEXT,
                    media JSONB NOT NULL DEFAULT '[]',
                    metadata JSONB NOT NULL DEFAULT '{}',
                    stats JSONB NOT NULL DEFAULT '{}',
                    interactive_content JSONB,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS interactive_responses (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    feed_item_id BIGINT NOT NULL,
                    response_type TEXT NOT NULL,
                    payload JSONB NOT NULL DEFAULT '{}',
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (user_id, feed_item_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS channels_messages (
                    id BIGSERIAL PRIMARY KEY,
                    channel_username TEXT NOT NULL,
                    message_text TEXT NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS channels_activity (
                    id BIGSERIAL PRIMARY KEY,
                    channel_username TEXT NOT NULL UNIQUE,
                    last_message JSONB,
                    message_count BIGINT NOT NULL DEFAULT 0,
                    last_updated TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_channel_last_viewed (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    channel_username TEXT NOT NULL,
                    last_viewed TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    message_count BIGINT NOT NULL DEFAULT 0,
                    UNIQUE (user_id, channel_username)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS tenant_requests (
                    id BIGSERIAL PRIMARY KEY,
                    request_id TEXT NOT NULL UNIQUE,
                    request_type TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    channel_username TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS relay_outbox (
                    id BIGSERIAL PRIMARY KEY,
                    event_id TEXT NOT NULL UNIQUE,
                    event_kind TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    last_error TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_language (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    language TEXT NOT NULL,
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_notifications (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    notifications_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_location (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    latitude DOUBLE PRECISION NOT NULL,
                    longitude DOUBLE PRECISION NOT NULL,
                    place_name TEXT,
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_channels_username ON channels(username)",
                "CREATE INDEX IF NOT EXISTS idx_channels_tenant ON channels(tenant_id)",
                "CREATE INDEX IF NOT EXISTS idx_superfeed_channel ON superfeed(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_superfeed_created ON superfeed(created_at)",
                "CREATE INDEX IF NOT EXISTS idx_responses_item ON interactive_responses(feed_item_id)",
                "CREATE INDEX IF NOT EXISTS idx_messages_channel ON channels_messages(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_activity_channel ON channels_activity(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_requests_request_id ON tenant_requests(request_id)",
                "CREATE INDEX IF NOT EXISTS idx_requests_user ON tenant_requests(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_outbox_status_due ON relay_outbox(status, next_attempt_at)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS channels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    display_name TEXT NOT NULL,
                    description TEXT,
                    avatar_url TEXT,
                    category TEXT,
                    is_public INTEGER NOT NULL DEFAULT 1,
                    premium INTEGER NOT NULL DEFAULT 0,
                    is_realtime INTEGER NOT NULL DEFAULT 0,
                    is_owner_db INTEGER NOT NULL DEFAULT 0,
                    owner_user_id TEXT,
                    tenant_id TEXT,
                    related_channels TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL UNIQUE,
                    display_name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS superfeed (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel_username TEXT NOT NULL,
                    item_type TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '',
                    caption TEXT,
                    message TEXT,
                    media TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{}',
                    stats TEXT NOT NULL DEFAULT '{}',
                    interactive_content TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS interactive_responses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    feed_item_id INTEGER NOT NULL,
                    response_type TEXT NOT NULL,
                    payload TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (user_id, feed_item_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS channels_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel_username TEXT NOT NULL,
                    message_text TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS channels_activity (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel_username TEXT NOT NULL UNIQUE,
                    last_message TEXT,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    last_updated TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_channel_last_viewed (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    channel_username TEXT NOT NULL,
                    last_viewed TEXT NOT NULL DEFAULT (datetime('now')),
                    message_count INTEGER NOT NULL DEFAULT 0,
                    UNIQUE (user_id, channel_username)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS tenant_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    request_id TEXT NOT NULL UNIQUE,
                    request_type TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    channel_username TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS relay_outbox (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_id TEXT NOT NULL UNIQUE,
                    event_kind TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at TEXT NOT NULL DEFAULT (datetime('now')),
                    last_error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_language (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL UNIQUE,
                    language TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL UNIQUE,
                    notifications_enabled INTEGER NOT NULL DEFAULT 1,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS user_location (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL UNIQUE,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    place_name TEXT,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_channels_username ON channels(username)",
                "CREATE INDEX IF NOT EXISTS idx_channels_tenant ON channels(tenant_id)",
                "CREATE INDEX IF NOT EXISTS idx_superfeed_channel ON superfeed(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_superfeed_created ON superfeed(created_at)",
                "CREATE INDEX IF NOT EXISTS idx_responses_item ON interactive_responses(feed_item_id)",
                "CREATE INDEX IF NOT EXISTS idx_messages_channel ON channels_messages(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_activity_channel ON channels_activity(channel_username)",
                "CREATE INDEX IF NOT EXISTS idx_requests_request_id ON tenant_requests(request_id)",
                "CREATE INDEX IF NOT EXISTS idx_requests_user ON tenant_requests(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_outbox_status_due ON relay_outbox(status, next_attempt_at)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn channel_store(&self) -> Arc<dyn ChannelStore> {
        self.channel_store.clone()
    }

    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.user_store.clone()
    }

    pub fn feed_store(&self) -> Arc<dyn FeedStore> {
        self.feed_store.clone()
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    pub fn activity_store(&self) -> Arc<dyn ActivityStore> {
        self.activity_store.clone()
    }

    pub fn request_store(&self) -> Arc<dyn RequestStore> {
        self.request_store.clone()
    }

    pub fn outbox_store(&self) -> Arc<dyn OutboxStore> {
        self.outbox_store.clone()
    }

    #[cfg(feature = "postgres")]
    pub fn pool(&self) -> Option<&Pool> {
        self.postgres_pool.as_ref()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}
