use log::{error, info, warn};
use serde_json::{json, Value};

use super::{membership_path, room_path, RoomAggregator, ROOMS_ROOT};
use crate::client::models::UiState;
use crate::common::error::{ChatError, ChatResult};
use crate::common::models::{value_as_string, ChatRoom, Participant, User};
use crate::utils::clock::now_millis_string;

pub const CREATE_FAILED_MESSAGE: &str = "Failed to create chat room";
const CREATED_MESSAGE: &str = "Chat room created";

/// Writes a failed rollback left behind.
#[derive(Debug, Clone)]
pub(super) struct Orphan {
    room_id: String,
    paths: Vec<String>,
}

impl RoomAggregator {
    /// Create a one-to-one room between `sender` and `receiver_phone`.
    ///
    /// Returns the existing room when the published list already connects the
    /// two numbers. On a failed step everything written so far is removed; what
    /// cannot be removed is kept for [`RoomAggregator::reconcile_orphans`].
    pub async fn create_room(&self, sender: &User, receiver_phone: &str) -> ChatResult<String> {
        let receiver_phone = receiver_phone.trim();
        let invalid = if receiver_phone.is_empty() {
            Some("Receiver phone number cannot be empty")
        } else if sender.phone_number.trim().is_empty() {
            Some("Sender phone number is missing")
        } else {
            None
        };
        if let Some(message) = invalid {
            self.state.update(|s| s.ui = UiState::failed(message));
            return Err(ChatError::Validation(message.to_string()));
        }

        if let Some(existing) = self.rooms().iter().find(|r| r.connects(&sender.phone_number, receiver_phone)) {
            info!("[ROOMS] {} and {} already share room {}", sender.phone_number, receiver_phone, existing.room_id);
            return Ok(existing.room_id.clone());
        }

        self.state.update(|s| s.ui.is_loading = true);
        match self.write_room(sender, receiver_phone).await {
            Ok(room_id) => {
                info!("[ROOMS] created room {}", room_id);
                self.state.update(|s| s.ui = UiState::succeeded(CREATED_MESSAGE));
                Ok(room_id)
            }
            Err(e) => {
                error!("[ROOMS] room creation failed: {}", e);
                self.state.update(|s| s.ui = UiState::failed(CREATE_FAILED_MESSAGE));
                Err(ChatError::Remote(CREATE_FAILED_MESSAGE.to_string()))
            }
        }
    }

    /// Retry removing what earlier rollbacks left behind. Returns the ids of
    /// rooms now fully cleaned up.
    pub async fn reconcile_orphans(&self) -> ChatResult<Vec<String>> {
        let mut orphans = self.orphans.lock().await;
        let mut cleaned = Vec::new();
        let mut remaining = Vec::new();

        for orphan in orphans.drain(..) {
            let mut left = Vec::new();
            for path in orphan.paths {
                if let Err(e) = self.realtime.write_node(&path, Value::Null).await {
                    warn!("[ROOMS] {} still cannot be removed: {}", path, e);
                    left.push(path);
                }
            }
            if left.is_empty() {
                cleaned.push(orphan.room_id);
            } else {
                remaining.push(Orphan { room_id: orphan.room_id, paths: left });
            }
        }

        *orphans = remaining;
        if !cleaned.is_empty() {
            info!("[ROOMS] reconciled {} orphaned room(s)", cleaned.len());
        }
        Ok(cleaned)
    }

    /// Room ids with writes still waiting for cleanup.
    pub async fn orphaned_rooms(&self) -> Vec<String> {
        self.orphans.lock().await.iter().map(|o| o.room_id.clone()).collect()
    }

    async fn write_room(&self, sender: &User, receiver_phone: &str) -> ChatResult<String> {
        let receiver = self.receiver_participant(receiver_phone).await;
        let room_id = self.realtime.push_child(ROOMS_ROOT).await?;
        let now = now_millis_string();
        let room = ChatRoom {
            room_id: room_id.clone(),
            sender: Participant::from(sender),
            receiver,
            created_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        };

        let record = room_path(&room_id);
        self.realtime.write_node(&record, room.to_record()).await?;
        let mut written = vec![record];

        let mut members = vec![sender.phone_number.as_str()];
        if receiver_phone != sender.phone_number {
            members.push(receiver_phone);
        }
        for member in members {
            match self.append_membership(member, &room_id).await {
                Ok(path) => written.push(path),
                Err(e) => {
                    self.roll_back(&room_id, written).await;
                    return Err(e);
                }
            }
        }
        Ok(room_id)
    }

    /// Profile snapshot of the receiver; just the number when no profile is found.
    async fn receiver_participant(&self, phone_number: &str) -> Participant {
        let fallback = Participant { phone_number: Some(phone_number.to_string()), ..Default::default() };
        match self.documents.find_by_field("users", "phone_number", phone_number).await {
            Ok(found) => match found.into_iter().next() {
                Some((_, doc)) => Participant {
                    name: doc.get("name").and_then(value_as_string),
                    phone_number: Some(phone_number.to_string()),
                    profile_picture: doc.get("profile_picture").and_then(value_as_string),
                },
                None => fallback,
            },
            Err(e) => {
                warn!("[ROOMS] receiver lookup for {} failed: {}", phone_number, e);
                fallback
            }
        }
    }

    async fn append_membership(&self, member: &str, room_id: &str) -> ChatResult<String> {
        let parent = membership_path(member);
        let key = self.realtime.push_child(&parent).await?;
        let path = format!("{}/{}", parent, key);
        self.realtime.write_node(&path, json!(room_id)).await?;
        Ok(path)
    }

    async fn roll_back(&self, room_id: &str, written: Vec<String>) {
        let mut left = Vec::new();
        // membership entries first, the record last
        for path in written.into_iter().rev() {
            if let Err(e) = self.realtime.write_node(&path, Value::Null).await {
                warn!("[ROOMS] rollback of {} failed: {}", path, e);
                left.push(path);
            }
        }
        if !left.is_empty() {
            self.orphans.lock().await.push(Orphan { room_id: room_id.to_string(), paths: left });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::AggregatorOptions;
    use super::*;
    use crate::backend::{DocumentStore, InMemoryDocumentStore, InMemoryRealtimeStore};
    use crate::client::database::Database;

    struct Fixture {
        store: InMemoryRealtimeStore,
        aggregator: RoomAggregator,
        ana: User,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryRealtimeStore::new();
        let documents = InMemoryDocumentStore::new();
        let budi = json!({"name": "Budi", "phone_number": "0812", "profile_picture": "https://img/b.png"});
        documents
            .set_document("users", "u2", budi.as_object().cloned().unwrap())
            .await
            .unwrap();
        let cache = Database::open("sqlite::memory:").await.unwrap();
        let aggregator = RoomAggregator::new(
            Arc::new(store.clone()),
            Arc::new(documents),
            Arc::new(cache),
            AggregatorOptions::default(),
        );
        let ana = User { uid: "u1".into(), name: Some("Ana".into()), phone_number: "0811".into(), ..Default::default() };
        Fixture { store, aggregator, ana }
    }

    fn entries(value: &Value) -> Vec<String> {
        value
            .as_object()
            .map(|m| m.values().filter_map(value_as_string).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn creation_writes_record_and_both_memberships() {
        let f = fixture().await;
        let room_id = f.aggregator.create_room(&f.ana, "0812").await.unwrap();
        assert!(!room_id.is_empty());

        let record = f.store.read_node(&room_path(&room_id)).await;
        let room = ChatRoom::from_record(&room_id, &record);
        assert_eq!(room.sender.name.as_deref(), Some("Ana"));
        assert_eq!(room.receiver.name.as_deref(), Some("Budi"));
        assert_eq!(room.receiver.profile_picture.as_deref(), Some("https://img/b.png"));
        assert_eq!(room.last_message, None);
        assert_eq!(room.created_at, room.updated_at);
        assert_eq!(room.updated_at.map(|t| t.len()), Some(13));

        assert_eq!(entries(&f.store.read_node("userChats/0811").await), vec![room_id.clone()]);
        assert_eq!(entries(&f.store.read_node("userChats/0812").await), vec![room_id]);
        assert_eq!(f.aggregator.state().get().ui.success.as_deref(), Some("Chat room created"));
    }

    #[tokio::test]
    async fn unknown_receiver_gets_a_number_only_snapshot() {
        let f = fixture().await;
        let room_id = f.aggregator.create_room(&f.ana, "0899").await.unwrap();
        let room = ChatRoom::from_record(&room_id, &f.store.read_node(&room_path(&room_id)).await);
        assert_eq!(room.receiver.phone_number.as_deref(), Some("0899"));
        assert_eq!(room.receiver.name, None);
    }

    #[tokio::test]
    async fn existing_room_is_returned_instead_of_a_new_one() {
        let f = fixture().await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        let first = f.aggregator.create_room(&f.ana, "0812").await.unwrap();

        let mut rx = f.aggregator.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.rooms.len() == 1))
            .await
            .unwrap()
            .unwrap();

        let second = f.aggregator.create_room(&f.ana, "0812").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(entries(&f.store.read_node("userChats/0811").await).len(), 1);
    }

    #[tokio::test]
    async fn failed_membership_append_rolls_everything_back() {
        let f = fixture().await;
        f.store.fail_writes_under("userChats/0812").await;

        let err = f.aggregator.create_room(&f.ana, "0812").await.unwrap_err();
        assert_eq!(err.user_message(), CREATE_FAILED_MESSAGE);
        assert_eq!(f.aggregator.state().get().ui.error.as_deref(), Some(CREATE_FAILED_MESSAGE));
        assert_eq!(f.store.read_node("userChats").await, Value::Null);
        assert_eq!(f.store.read_node("chatRooms").await, Value::Null);
        assert!(f.aggregator.orphaned_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn unremovable_record_is_reconciled_later() {
        let f = fixture().await;
        f.store.fail_writes_under("userChats/").await;
        f.store.fail_deletes_under("chatRooms/").await;

        assert!(f.aggregator.create_room(&f.ana, "0812").await.is_err());
        let orphans = f.aggregator.orphaned_rooms().await;
        assert_eq!(orphans.len(), 1);
        assert_ne!(f.store.read_node(&room_path(&orphans[0])).await, Value::Null);
        assert_eq!(f.store.read_node("userChats").await, Value::Null);

        assert!(f.aggregator.reconcile_orphans().await.unwrap().is_empty());

        f.store.clear_failures().await;
        assert_eq!(f.aggregator.reconcile_orphans().await.unwrap(), orphans);
        assert_eq!(f.store.read_node("chatRooms").await, Value::Null);
        assert!(f.aggregator.orphaned_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn blank_receiver_is_rejected_before_any_write() {
        let f = fixture().await;
        let err = f.aggregator.create_room(&f.ana, "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(f.store.read_node("chatRooms").await, Value::Null);
    }
}
