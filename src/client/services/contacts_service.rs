use std::sync::Arc;

use log::{info, warn};

use crate::backend::ContactsProvider;
use crate::client::models::{Observable, UiState};
use crate::common::error::ChatResult;
use crate::common::models::Contact;

pub struct ContactsViewModel {
    provider: Arc<dyn ContactsProvider>,
    contacts: Observable<Vec<Contact>>,
    state: Observable<UiState>,
}

impl ContactsViewModel {
    pub fn new(provider: Arc<dyn ContactsProvider>) -> Self {
        Self { provider, contacts: Observable::default(), state: Observable::default() }
    }

    pub fn contacts(&self) -> Observable<Vec<Contact>> {
        self.contacts.clone()
    }

    pub fn state(&self) -> Observable<UiState> {
        self.state.clone()
    }

    /// Replace the list with the current address book.
    pub async fn load_contacts(&self) -> ChatResult<usize> {
        self.state.set(UiState::loading());
        match self.provider.query_contacts().await {
            Ok(contacts) => {
                let count = contacts.len();
                info!("[CONTACTS] loaded {}", count);
                self.contacts.set(contacts);
                self.state.set(UiState::default());
                Ok(count)
            }
            Err(e) => {
                warn!("[CONTACTS] {}", e);
                self.state.set(UiState::failed(e.user_message()));
                Err(e)
            }
        }
    }
}
