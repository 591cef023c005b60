use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Flat field map as stored in the document store.
pub type Document = Map<String, Value>;

/// Denormalized snapshot of one side of a chat room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>,
}

impl Participant {
    fn from_member(member: Option<&Value>) -> Self {
        let Some(member) = member else { return Self::default() };
        Self {
            name: member.get("name").and_then(value_as_string),
            phone_number: member.get("phoneNumber").and_then(value_as_string),
            profile_picture: member.get("profilePicture").and_then(value_as_string),
        }
    }

    fn to_member(&self) -> Value {
        json!({
            "phoneNumber": self.phone_number,
            "name": self.name,
            "profilePicture": self.profile_picture,
        })
    }
}

impl From<&User> for Participant {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            phone_number: Some(user.phone_number.clone()),
            profile_picture: user.profile_picture.clone(),
        }
    }
}

/// A two-participant conversation with its last-message preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub room_id: String,
    pub sender: Participant,
    pub receiver: Participant,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub deleted_at: Option<String>,
}

/// The room fields that carry their own listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomField {
    LastMessage,
    LastMessageTime,
    UpdatedAt,
}

impl RoomField {
    pub const ALL: [RoomField; 3] = [RoomField::LastMessage, RoomField::LastMessageTime, RoomField::UpdatedAt];

    pub fn key(self) -> &'static str {
        match self {
            RoomField::LastMessage => "last_message",
            RoomField::LastMessageTime => "last_message_time",
            RoomField::UpdatedAt => "updated_at",
        }
    }
}

impl ChatRoom {
    /// Rebuild a room from its realtime record (`chatRooms/{id}`).
    pub fn from_record(room_id: &str, record: &Value) -> Self {
        let members = record.get("members");
        Self {
            room_id: room_id.to_string(),
            sender: Participant::from_member(members.and_then(|m| m.get("member1"))),
            receiver: Participant::from_member(members.and_then(|m| m.get("member2"))),
            last_message: record.get("last_message").and_then(value_as_string),
            last_message_time: record.get("last_message_time").and_then(value_as_string),
            created_at: record.get("created_at").and_then(value_as_string),
            updated_at: record.get("updated_at").and_then(value_as_string),
            deleted_at: record.get("deleted_at").and_then(value_as_string),
        }
    }

    /// Realtime record layout, the inverse of `from_record`.
    pub fn to_record(&self) -> Value {
        json!({
            "members": {
                "member1": self.sender.to_member(),
                "member2": self.receiver.to_member(),
            },
            "last_message": self.last_message,
            "last_message_time": self.last_message_time,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "deleted_at": self.deleted_at,
        })
    }

    pub fn apply_field(&mut self, field: RoomField, value: &Value) {
        let value = value_as_string(value);
        match field {
            RoomField::LastMessage => self.last_message = value,
            RoomField::LastMessageTime => self.last_message_time = value,
            RoomField::UpdatedAt => self.updated_at = value,
        }
    }

    /// True when the room connects exactly these two phone numbers, in either order.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        let first = self.sender.phone_number.as_deref();
        let second = self.receiver.phone_number.as_deref();
        (first == Some(a) && second == Some(b)) || (first == Some(b) && second == Some(a))
    }

    /// True when `phone_number` is one of the two participants.
    pub fn involves(&self, phone_number: &str) -> bool {
        self.sender.phone_number.as_deref() == Some(phone_number)
            || self.receiver.phone_number.as_deref() == Some(phone_number)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub name: Option<String>,
    pub phone_number: String,
    pub birth_date: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: Option<String>,
}

impl User {
    /// Build a user from the `users/{uid}` profile document.
    pub fn from_document(uid: &str, doc: &Document) -> Self {
        Self {
            uid: uid.to_string(),
            name: doc.get("name").and_then(value_as_string),
            phone_number: doc.get("phone_number").and_then(value_as_string).unwrap_or_default(),
            birth_date: doc.get("birth_date").and_then(value_as_string),
            email: doc.get("email").and_then(value_as_string),
            profile_picture: doc.get("profile_picture").and_then(value_as_string),
            created_at: doc.get("created_at").and_then(value_as_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// Scalars become strings, everything else (null, objects, arrays) is absent.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_members_map_to_sender_and_receiver() {
        let record = json!({
            "members": {
                "member1": {"phoneNumber": "0811", "name": "Ana", "profilePicture": null},
                "member2": {"phoneNumber": "0812", "name": "Budi", "profilePicture": "https://img/b.png"}
            },
            "last_message": null,
            "updated_at": "1700000000000"
        });
        let room = ChatRoom::from_record("room1", &record);
        assert_eq!(room.room_id, "room1");
        assert_eq!(room.sender.name.as_deref(), Some("Ana"));
        assert_eq!(room.receiver.profile_picture.as_deref(), Some("https://img/b.png"));
        assert_eq!(room.last_message, None);
        assert_eq!(room.updated_at.as_deref(), Some("1700000000000"));
        assert!(room.connects("0812", "0811"));
        assert!(!room.connects("0811", "0813"));
        assert!(room.involves("0811") && room.involves("0812"));
        assert!(!room.involves("0813"));
    }

    #[test]
    fn record_layout_survives_a_rebuild() {
        let room = ChatRoom {
            room_id: "r".into(),
            sender: Participant { name: Some("Ana".into()), phone_number: Some("0811".into()), profile_picture: None },
            receiver: Participant { name: None, phone_number: Some("0812".into()), profile_picture: None },
            created_at: Some("1".into()),
            updated_at: Some("1".into()),
            ..Default::default()
        };
        assert_eq!(ChatRoom::from_record("r", &room.to_record()), room);
    }

    #[test]
    fn numeric_field_values_are_kept_as_text() {
        let mut room = ChatRoom::default();
        room.apply_field(RoomField::UpdatedAt, &json!(1700000000000u64));
        assert_eq!(room.updated_at.as_deref(), Some("1700000000000"));
        room.apply_field(RoomField::UpdatedAt, &Value::Null);
        assert_eq!(room.updated_at, None);
    }
}
