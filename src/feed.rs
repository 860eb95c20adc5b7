use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedError {
    #[error("interactive content ({content}) does not match item type ({item_type})")]
    InteractiveMismatch {
        item_type: FeedItemKind,
        content: FeedItemKind,
    },

    #[error("item type {0} requires interactive content")]
    MissingInteractive(FeedItemKind),

    #[error("item type {0} cannot carry interactive content")]
    UnexpectedInteractive(FeedItemKind),

    #[error("unknown item type: {0}")]
    UnknownKind(String),

    #[error("response type ({response}) does not match item type ({item_type})")]
    ResponseMismatch {
        item_type: FeedItemKind,
        response: FeedItemKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedItemKind {
    Tweet,
    Instagram,
    Linkedin,
    Whatsapp,
    Poll,
    Survey,
    Quiz,
    All,
}

impl FeedItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedItemKind::Tweet => "tweet",
            FeedItemKind::Instagram => "instagram",
            FeedItemKind::Linkedin => "linkedin",
            FeedItemKind::Whatsapp => "whatsapp",
            FeedItemKind::Poll => "poll",
            FeedItemKind::Survey => "survey",
            FeedItemKind::Quiz => "quiz",
            FeedItemKind::All => "all",
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            FeedItemKind::Poll | FeedItemKind::Survey | FeedItemKind::Quiz
        )
    }
}

impl std::str::FromStr for FeedItemKind {
    type Err = FeedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tweet" => Ok(FeedItemKind::Tweet),
            "instagram" => Ok(FeedItemKind::Instagram),
            "linkedin" => Ok(FeedItemKind::Linkedin),
            "whatsapp" => Ok(FeedItemKind::Whatsapp),
            "poll" => Ok(FeedItemKind::Poll),
            "survey" => Ok(FeedItemKind::Survey),
            "quiz" => Ok(FeedItemKind::Quiz),
            "all" => Ok(FeedItemKind::All),
            other => Err(FeedError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for FeedItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaLayout {
    Grid,
    Carousel,
    Single,
}

impl Default for MediaLayout {
    fn default() -> Self {
        MediaLayout::Grid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionVisibility {
    #[serde(default = "default_true")]
    pub show_header: bool,
    #[serde(default = "default_true")]
    pub show_footer: bool,
    #[serde(default = "default_true")]
    pub show_stats: bool,
}

impl Default for SectionVisibility {
    fn default() -> Self {
        Self {
            show_header: true,
            show_footer: true,
            show_stats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMetadata {
    #[serde(default = "default_true")]
    pub is_collapsible: bool,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default)]
    pub visibility: SectionVisibility,
    #[serde(default)]
    pub media_layout: MediaLayout,
}

impl Default for FeedMetadata {
    fn default() -> Self {
        Self {
            is_collapsible: true,
            max_height: default_max_height(),
            visibility: SectionVisibility::default(),
            media_layout: MediaLayout::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_height() -> u32 {
    300
}

// Counters only go up; resets happen out of band if at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub responses: u64,
}

impl FeedStats {
    pub fn record_view(&mut self) {
        self.views += 1;
    }

    pub fn record_like(&mut self) {
        self.likes += 1;
    }

    pub fn record_share(&mut self) {
        self.shares += 1;
    }

    pub fn record_response(&mut self) {
        self.responses += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollContent {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizContent {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyContent {
    pub questions: Vec<SurveyQuestion>,
}

// Externally tagged on purpose: serializes to {"poll": {...}} etc., the
// one-keyed object shape stored in the interactive_content column. A payload
// that disagrees with its tag is unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveContent {
    Poll(PollContent),
    Quiz(QuizContent),
    Survey(SurveyContent),
}

impl InteractiveContent {
    pub fn kind(&self) -> FeedItemKind {
        match self {
            InteractiveContent::Poll(_) => FeedItemKind::Poll,
            InteractiveContent::Quiz(_) => FeedItemKind::Quiz,
            InteractiveContent::Survey(_) => FeedItemKind::Survey,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeedItem {
    pub channel_username: String,
    pub item_type: FeedItemKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FeedMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_content: Option<InteractiveContent>,
}

impl NewFeedItem {
    pub fn text(channel_username: &str, item_type: FeedItemKind, content: &str) -> Self {
        Self {
            channel_username: channel_username.to_string(),
            item_type,
            content: content.to_string(),
            caption: None,
            message: None,
            media: Vec::new(),
            metadata: None,
            interactive_content: None,
        }
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        match (&self.interactive_content, self.item_type.is_interactive()) {
            (Some(interactive), true) => {
                let content = interactive.kind();
                if content != self.item_type {
                    return Err(FeedError::InteractiveMismatch {
                        item_type: self.item_type,
                        content,
                    });
                }
                Ok(())
            }
            (Some(_), false) => Err(FeedError::UnexpectedInteractive(self.item_type)),
            (None, true) => Err(FeedError::MissingInteractive(self.item_type)),
            (None, false) => Ok(()),
        }
    }

    pub fn metadata_or_default(&self) -> FeedMetadata {
        self.metadata.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    pub channel_username: String,
    pub item_type: FeedItemKind,
    pub content: String,
    pub caption: Option<String>,
    pub message: Option<String>,
    pub media: Vec<MediaItem>,
    pub metadata: FeedMetadata,
    pub stats: FeedStats,
    pub interactive_content: Option<InteractiveContent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveResponse {
    pub user_id: String,
    pub feed_item_id: i64,
    pub response_type: FeedItemKind,
    pub payload: serde_json::Value,
}

impl InteractiveResponse {
    pub fn validate_against(&self, item: &FeedItem) -> Result<(), FeedError> {
        if self.response_type != item.item_type {
            return Err(FeedError::ResponseMismatch {
                item_type: item.item_type,
                response: self.response_type,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn poll() -> InteractiveContent {
        InteractiveContent::Poll(PollContent {
            question: "favorite color?".to_string(),
            options: vec!["red".to_string(), "blue".to_string()],
        })
    }

    fn quiz() -> InteractiveContent {
        InteractiveContent::Quiz(QuizContent {
            question: "2 + 2?".to_string(),
            options: vec!["3".to_string(), "4".to_string()],
            correct_option: 1,
        })
    }

    #[test_case("tweet", FeedItemKind::Tweet)]
    #[test_case("poll", FeedItemKind::Poll)]
    #[test_case("whatsapp", FeedItemKind::Whatsapp)]
    #[test_case("all", FeedItemKind::All)]
    fn kind_parses_wire_names(raw: &str, expected: FeedItemKind) {
        assert_eq!(raw.parse::<FeedItemKind>().unwrap(), expected);
        assert_eq!(expected.as_str(), raw);
    }

    #[test]
    fn kind_rejects_unknown_values() {
        assert!(matches!(
            "facebook".parse::<FeedItemKind>(),
            Err(FeedError::UnknownKind(_))
        ));
    }

    #[test]
    fn interactive_content_serializes_to_one_keyed_object() {
        let value = serde_json::to_value(poll()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert!(object.contains_key("poll"));
    }

    #[test]
    fn poll_item_with_poll_payload_is_valid() {
        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Poll, "vote!");
        item.interactive_content = Some(poll());
        assert!(item.validate().is_ok());
    }

    #[test]
    fn poll_item_with_quiz_payload_is_rejected() {
        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Poll, "vote!");
        item.interactive_content = Some(quiz());
        assert_eq!(
            item.validate(),
            Err(FeedError::InteractiveMismatch {
                item_type: FeedItemKind::Poll,
                content: FeedItemKind::Quiz,
            })
        );
    }

    #[test]
    fn interactive_kind_without_payload_is_rejected() {
        let item = NewFeedItem::text("janedoe", FeedItemKind::Quiz, "pop quiz");
        assert_eq!(
            item.validate(),
            Err(FeedError::MissingInteractive(FeedItemKind::Quiz))
        );
    }

    #[test]
    fn tweet_with_payload_is_rejected() {
        let mut item = NewFeedItem::text("janedoe", FeedItemKind::Tweet, "hello");
        item.interactive_content = Some(poll());
        assert_eq!(
            item.validate(),
            Err(FeedError::UnexpectedInteractive(FeedItemKind::Tweet))
        );
    }

    #[test]
    fn metadata_defaults_fill_in_display_settings() {
        let item = NewFeedItem::text("janedoe", FeedItemKind::Tweet, "hello");
        let metadata = item.metadata_or_default();
        assert!(metadata.is_collapsible);
        assert_eq!(metadata.max_height, 300);
        assert!(metadata.visibility.show_stats);
        assert_eq!(metadata.media_layout, MediaLayout::Grid);
    }

    #[test]
    fn stats_counters_only_increase() {
        let mut stats = FeedStats::default();
        stats.record_view();
        stats.record_view();
        stats.record_response();
        assert_eq!(stats.views, 2);
        assert_eq!(stats.responses, 1);
        assert_eq!(stats.likes, 0);
    }

    #[test]
    fn response_type_must_match_item_type() {
        let item = FeedItem {
            id: 7,
            channel_username: "janedoe".to_string(),
            item_type: FeedItemKind::Poll,
            content: "vote!".to_string(),
            caption: None,
            message: None,
            media: Vec::new(),
            metadata: FeedMetadata::default(),
            stats: FeedStats::default(),
            interactive_content: Some(poll()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = InteractiveResponse {
            user_id: "u1".to_string(),
            feed_item_id: 7,
            response_type: FeedItemKind::Quiz,
            payload: serde_json::json!({ "selected": 0 }),
        };

        assert!(response.validate_against(&item).is_err());
    }
}
