use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccessError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("unknown request status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Granted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Granted => "granted",
            RequestStatus::Rejected => "rejected",
        }
    }

    // pending is the only state with outgoing edges; granted/rejected are
    // terminal and there are no reverse transitions.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Granted)
                | (RequestStatus::Pending, RequestStatus::Rejected)
        )
    }

    pub fn transition_to(&self, next: RequestStatus) -> Result<RequestStatus, AccessError> {
        if *self == next || self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AccessError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = AccessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(RequestStatus::Pending),
            "granted" => Ok(RequestStatus::Granted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(AccessError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRequest {
    pub id: i64,
    pub request_id: String,
    pub request_type: String,
    pub user_id: String,
    pub channel_username: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRequest {
    pub fn new_pending(request_type: &str, user_id: &str, channel_username: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            request_id: Uuid::new_v4().to_string(),
            request_type: request_type.to_string(),
            user_id: user_id.to_string(),
            channel_username: channel_username.to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

// The wire shape a tenant database trigger posts to the relay webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRequestRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: String,
    pub uid: String,
    pub username: String,
    pub status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(RequestStatus::Pending, RequestStatus::Granted, true)]
    #[test_case(RequestStatus::Pending, RequestStatus::Rejected, true)]
    #[test_case(RequestStatus::Granted, RequestStatus::Pending, false)]
    #[test_case(RequestStatus::Granted, RequestStatus::Rejected, false)]
    #[test_case(RequestStatus::Rejected, RequestStatus::Pending, false)]
    #[test_case(RequestStatus::Rejected, RequestStatus::Granted, false)]
    fn transition_matrix(from: RequestStatus, to: RequestStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn transition_to_same_status_is_a_no_op() {
        assert_eq!(
            RequestStatus::Granted.transition_to(RequestStatus::Granted),
            Ok(RequestStatus::Granted)
        );
    }

    #[test]
    fn reverse_transition_is_an_error() {
        let result = RequestStatus::Granted.transition_to(RequestStatus::Pending);
        assert_eq!(
            result,
            Err(AccessError::InvalidTransition {
                from: RequestStatus::Granted,
                to: RequestStatus::Pending,
            })
        );
    }

    #[test]
    fn new_pending_request_gets_a_request_id() {
        let request = TenantRequest::new_pending("channel_access", "u1", "janedoe");
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = TenantRequestRecord {
            id: "r-1".to_string(),
            request_type: "channel_access".to_string(),
            uid: "u1".to_string(),
            username: "janedoe".to_string(),
            status: RequestStatus::Pending,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "channel_access");
        assert_eq!(value["status"], "pending");
        let back: TenantRequestRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
