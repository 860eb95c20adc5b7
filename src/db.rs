pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    Channel, ChannelActivity, ChannelMessage, Language, LastViewed, LocationPreference,
    NewChannelActivity, NotificationPreference, OutboxEntry, OutboxStatus, UserLanguage,
    UserRecord,
};
pub use self::stores::{
    ActivityStore, ChannelStore, FeedStore, MessageStore, OutboxStore, RequestStore, UserStore,
};

pub mod error;
pub mod manager;
pub mod models;
#[cfg(feature = "postgres")]
pub mod schema;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
