use std::sync::Arc;

use crate::backend::LocalCache;
use crate::client::models::{Observable, UiState};
use crate::common::error::{ChatError, ChatResult};
use crate::common::models::User;

pub struct ProfileViewModel {
    cache: Arc<dyn LocalCache>,
    user: Observable<Option<User>>,
    state: Observable<UiState>,
}

impl ProfileViewModel {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self { cache, user: Observable::default(), state: Observable::new(UiState::loading()) }
    }

    pub fn user(&self) -> Observable<Option<User>> {
        self.user.clone()
    }

    pub fn state(&self) -> Observable<UiState> {
        self.state.clone()
    }

    pub async fn load_user_data(&self) -> ChatResult<User> {
        let result = match self.cache.read_user().await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ChatError::NotFound("User not found".to_string())),
            Err(e) => Err(e),
        };
        match &result {
            Ok(user) => {
                self.user.set(Some(user.clone()));
                self.state.set(UiState::succeeded("Success"));
            }
            Err(e) => self.state.set(UiState::failed(e.user_message())),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::database::Database;

    #[tokio::test]
    async fn loads_cached_user() {
        let cache = Arc::new(Database::open("sqlite::memory:").await.unwrap());
        let vm = ProfileViewModel::new(cache.clone());
        assert!(vm.state().get().is_loading);

        assert!(vm.load_user_data().await.is_err());
        assert_eq!(vm.state().get().error.as_deref(), Some("User not found"));

        let ana = User { uid: "u1".into(), phone_number: "0811".into(), name: Some("Ana".into()), ..Default::default() };
        cache.upsert_user(&ana).await.unwrap();
        vm.load_user_data().await.unwrap();
        assert_eq!(vm.user().get(), Some(ana));
        assert_eq!(vm.state().get().success.as_deref(), Some("Success"));
    }
}
