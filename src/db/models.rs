use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub category: Option<String>,
    pub is_public: bool,
    pub premium: bool,
    pub is_realtime: bool,
    pub is_owner_db: bool,
    pub owner_user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub related_channels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(username: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            display_name,
            description: None,
            avatar_url: None,
            category: None,
            is_public: true,
            premium: false,
            is_realtime: false,
            is_owner_db: false,
            owner_user_id: None,
            tenant_id: None,
            related_channels: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub user_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub channel_username: String,
    pub message_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelActivity {
    pub id: i64,
    pub channel_username: String,
    pub last_message: Option<serde_json::Value>,
    pub message_count: i64,
    pub last_updated: DateTime<Utc>,
}

// Upsert shape for the activity rollup; also the `record` payload a tenant
// database trigger posts to the activity webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChannelActivity {
    pub channel_username: String,
    #[serde(default)]
    pub last_message: Option<serde_json::Value>,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastViewed {
    pub id: i64,
    pub user_id: String,
    pub channel_username: String,
    pub last_viewed: DateTime<Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Telugu,
    Kannada,
    Hindi,
    Tamil,
    Malayalam,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::English,
        Language::Telugu,
        Language::Kannada,
        Language::Hindi,
        Language::Tamil,
        Language::Malayalam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Telugu => "telugu",
            Language::Kannada => "kannada",
            Language::Hindi => "hindi",
            Language::Tamil => "tamil",
            Language::Malayalam => "malayalam",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "english" => Ok(Language::English),
            "telugu" => Ok(Language::Telugu),
            "kannada" => Ok(Language::Kannada),
            "hindi" => Ok(Language::Hindi),
            "tamil" => Ok(Language::Tamil),
            "malayalam" => Ok(Language::Malayalam),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLanguage {
    pub user_id: String,
    pub language: Language,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: String,
    pub notifications_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPreference {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub place_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Resolved,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Resolved => "resolved",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OutboxStatus::Pending),
            "resolved" => Ok(OutboxStatus::Resolved),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub event_id: String,
    pub event_kind: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_roundtrips_through_its_wire_name() {
        for language in Language::ALL {
            assert_eq!(language.as_str().parse::<Language>().unwrap(), language);
        }
    }

    #[test]
    fn unknown_language_is_rejected() {
        assert!("klingon".parse::<Language>().is_err());
        assert!("English".parse::<Language>().is_err());
    }

    #[test]
    fn outbox_status_parses_wire_names() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Resolved,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
    }
}
