//! Chat room and message models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::profile::ProfileSummary;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatRoom {
    pub id: String,
    pub patient_id: String,
    pub therapist_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.patient_id == user_id || self.therapist_id == user_id
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.patient_id == user_id {
            &self.therapist_id
        } else {
            &self.patient_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub chat_room_id: String,
    pub sender_id: String,
    pub content: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRoomSummary {
    pub id: String,
    pub patient_id: String,
    pub therapist_id: String,
    pub counterpart: Option<ProfileSummary>,
    pub last_message: Option<Message>,
    pub unread_count: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRoomRequest {
    /// The other party: a therapist when a patient opens, a patient otherwise
    pub counterpart_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_participant() {
        let room = ChatRoom {
            id: "r".into(),
            patient_id: "p".into(),
            therapist_id: "t".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(room.other_participant("p"), "t");
        assert_eq!(room.other_participant("t"), "p");
        assert!(room.has_participant("t"));
        assert!(!room.has_participant("x"));
    }
}
