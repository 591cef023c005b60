use std::sync::Arc;

use log::{info, warn};
use tokio::sync::watch;

use crate::backend::LocalCache;
use crate::client::models::{RoomListState, UiState};
use crate::client::services::room_aggregator::{compare_rooms, RoomAggregator};
use crate::common::error::{ChatError, ChatResult};
use crate::common::models::User;

/// The chat list screen: cached rooms first, then the live list.
pub struct ChatListViewModel {
    cache: Arc<dyn LocalCache>,
    aggregator: Arc<RoomAggregator>,
}

impl ChatListViewModel {
    pub fn new(cache: Arc<dyn LocalCache>, aggregator: Arc<RoomAggregator>) -> Self {
        Self { cache, aggregator }
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomListState> {
        self.aggregator.subscribe()
    }

    pub fn aggregator(&self) -> &Arc<RoomAggregator> {
        &self.aggregator
    }

    /// Show the signed-in user's cached rooms, then follow the live list.
    /// Calling it while the live list is already followed changes nothing.
    pub async fn load_chat_rooms(&self) -> ChatResult<()> {
        let state = self.aggregator.state();
        let idle = self.aggregator.active_key().await.is_none();
        if idle {
            state.update(|s| s.ui = UiState::loading());
        }

        let user = match self.signed_in_user().await {
            Ok(user) => user,
            Err(e) => {
                state.update(|s| s.ui = UiState::failed(e.user_message()));
                return Err(e);
            }
        };

        if idle {
            match self.cache.read_rooms().await {
                Ok(cached) => {
                    let mut own: Vec<_> = cached.into_iter().filter(|r| r.involves(&user.phone_number)).collect();
                    own.sort_by(compare_rooms);
                    info!("[CHATS] showing {} cached room(s)", own.len());
                    state.update(|s| s.rooms = own);
                }
                Err(e) => warn!("[CHATS] cannot read cached rooms: {}", e),
            }
        }

        self.aggregator.start_aggregation(&user.phone_number).await
    }

    /// Returns the id of the new (or already existing) room.
    pub async fn create_new_chat_room(&self, receiver_phone: &str) -> ChatResult<String> {
        let user = self.signed_in_user().await?;
        self.aggregator.create_room(&user, receiver_phone).await
    }

    pub async fn stop(&self) {
        self.aggregator.stop().await;
    }

    async fn signed_in_user(&self) -> ChatResult<User> {
        self.cache
            .read_user()
            .await?
            .ok_or_else(|| ChatError::NotFound("User not found".to_string()))
    }
}
