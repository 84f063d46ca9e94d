//! Shared types: the offline action model and queue/connectivity reports.
//!
//! Everything here is plain data with serde derives; the persisted queue is a
//! JSON array of `QueuedAction`.

use chrono::{DateTime, NaiveDate, Utc};
use engage360_core::{ActionId, BookingId, ProgramId, UserId};
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of a booking document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// Account status stored on a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// Fields of a booking created by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub user_id: UserId,
    pub program_id: ProgramId,
    pub date: NaiveDate,
    /// Session start as shown on the timetable, e.g. `"18:00"`.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Partial update of a booking; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BookingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BookingUpdate {
    pub fn status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Partial update of a user profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
}

/// A bulk email campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailCampaign {
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// A mutation that can be replayed against the backing services.
///
/// Each variant maps to exactly one backing operation. The `type` tags are
/// the names already present in persisted queues and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum OfflineAction {
    CreateBooking {
        data: NewBooking,
    },
    UpdateBooking {
        booking_id: BookingId,
        data: BookingUpdate,
    },
    CancelBooking {
        booking_id: BookingId,
    },
    #[serde(rename = "SEND_EMAIL")]
    SendBulkEmail {
        campaign: EmailCampaign,
        recipients: Vec<String>,
    },
    UpdateUserProfile {
        user_id: UserId,
        data: ProfileUpdate,
    },
    #[serde(rename = "ENROLL_PROGRAM")]
    EnrollInProgram {
        user_id: UserId,
        program_id: ProgramId,
    },
}

impl OfflineAction {
    /// The persisted `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            OfflineAction::CreateBooking { .. } => "CREATE_BOOKING",
            OfflineAction::UpdateBooking { .. } => "UPDATE_BOOKING",
            OfflineAction::CancelBooking { .. } => "CANCEL_BOOKING",
            OfflineAction::SendBulkEmail { .. } => "SEND_EMAIL",
            OfflineAction::UpdateUserProfile { .. } => "UPDATE_USER_PROFILE",
            OfflineAction::EnrollInProgram { .. } => "ENROLL_PROGRAM",
        }
    }
}

/// An action waiting in the mutation queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    #[serde(deserialize_with = "deserialize_action_id")]
    pub id: ActionId,
    pub action: OfflineAction,
    #[serde(alias = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(alias = "retries")]
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Accepts both current UUID ids and the base36 ids of older clients.
fn deserialize_action_id<'de, D>(deserializer: D) -> Result<ActionId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(ActionId::from_legacy(&raw))
}

impl QueuedAction {
    pub fn new(action: OfflineAction, max_retries: u32) -> Self {
        Self {
            id: ActionId::new(),
            action,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// True once the action has used up its attempts.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_online(is_online: bool) -> Self {
        if is_online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

/// Notification emitted on every online/offline transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub state: ConnectivityState,
    pub at: DateTime<Utc>,
}

/// Point-in-time connectivity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_online: bool,
    /// Best-effort effective connection type; `"unknown"` when unavailable.
    pub connection_quality: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub pending_actions: usize,
}

/// Result of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub succeeded: Vec<ActionId>,
    pub retried: Vec<ActionId>,
    /// Actions removed after their last failed attempt. They are not kept
    /// anywhere else; this report is the only trace besides the logs.
    pub dropped: Vec<QueuedAction>,
}

impl ReplayReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.retried.len() + self.dropped.len()
    }
}

/// What a `replay_all` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed(ReplayReport),
    /// The queue was empty; nothing ran and nothing was persisted.
    Idle,
    /// Another pass was in flight; this trigger was ignored.
    AlreadyRunning,
}

/// Events published by the mutation queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued { id: ActionId, kind: &'static str },
    ReplayFinished(ReplayReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedActionSummary {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total_actions: usize,
    pub actions: Vec<QueuedActionSummary>,
    pub sync_in_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_booking_uses_the_persisted_wire_shape() {
        let action = OfflineAction::CreateBooking {
            data: NewBooking {
                user_id: UserId::new("u1"),
                program_id: ProgramId::new("p1"),
                date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                time: "18:00".to_string(),
                notes: None,
            },
        };

        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({
                "type": "CREATE_BOOKING",
                "data": {"userId": "u1", "programId": "p1", "date": "2025-01-10", "time": "18:00"}
            })
        );
    }

    #[test]
    fn legacy_tags_decode_into_variants() {
        let email: OfflineAction = serde_json::from_value(json!({
            "type": "SEND_EMAIL",
            "campaign": {"subject": "Spring timetable", "body": "New classes"},
            "recipients": ["a@example.org"]
        }))
        .unwrap();
        assert_eq!(email.kind(), "SEND_EMAIL");

        let enroll: OfflineAction = serde_json::from_value(json!({
            "type": "ENROLL_PROGRAM",
            "userId": "u1",
            "programId": "yoga"
        }))
        .unwrap();
        assert_eq!(
            enroll,
            OfflineAction::EnrollInProgram {
                user_id: UserId::new("u1"),
                program_id: ProgramId::new("yoga"),
            }
        );
    }

    #[test]
    fn unknown_action_type_does_not_decode() {
        let result: Result<OfflineAction, _> =
            serde_json::from_value(json!({"type": "DELETE_EVERYTHING"}));
        assert!(result.is_err());
    }

    #[test]
    fn exhaustion_is_reached_at_max_retries() {
        let mut queued = QueuedAction::new(
            OfflineAction::CancelBooking {
                booking_id: BookingId::new("b1"),
            },
            3,
        );
        assert!(!queued.is_exhausted());
        queued.retry_count = 2;
        assert!(!queued.is_exhausted());
        queued.retry_count = 3;
        assert!(queued.is_exhausted());
    }
}
