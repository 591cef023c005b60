//! Contracts for the services the client talks to.
//!
//! Every collaborator is a trait object handed to the view-models at
//! construction time. In-memory implementations live next to each contract;
//! the Redis realtime store and the SQLite cache are the durable ones.

pub mod auth;
pub mod contacts;
pub mod document;
pub mod realtime;
pub mod redis_realtime;
pub mod settings;

use async_trait::async_trait;

use crate::common::error::ChatResult;
use crate::common::models::{ChatRoom, User};

pub use auth::{AuthService, AuthUser, InMemoryAuth, PhoneVerification};
pub use contacts::{ContactsProvider, InMemoryContacts};
pub use document::{DocumentStore, InMemoryDocumentStore};
pub use realtime::{InMemoryRealtimeStore, NodeEvent, NodeSubscription, RealtimeStore};
pub use redis_realtime::RedisRealtimeStore;
pub use settings::{FileSettingsStore, SettingsStore, HAS_LOGGED_IN};

/// On-device mirror of rooms and the signed-in user.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Insert or replace by `room_id`.
    async fn upsert_rooms(&self, rooms: &[ChatRoom]) -> ChatResult<()>;
    async fn read_rooms(&self) -> ChatResult<Vec<ChatRoom>>;
    async fn find_room(&self, room_id: &str) -> ChatResult<Option<ChatRoom>>;
    async fn delete_room(&self, room_id: &str) -> ChatResult<()>;
    async fn clear_rooms(&self) -> ChatResult<()>;

    async fn upsert_user(&self, user: &User) -> ChatResult<()>;
    /// The single cached user, if any.
    async fn read_user(&self) -> ChatResult<Option<User>>;
    async fn clear_users(&self) -> ChatResult<()>;
}
