use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use crate::common::error::{ChatError, ChatResult};
use crate::common::models::Contact;

/// Device address book. Reading it needs the contacts permission.
#[async_trait]
pub trait ContactsProvider: Send + Sync {
    async fn query_contacts(&self) -> ChatResult<Vec<Contact>>;
}

struct AddressBook {
    contacts: Vec<Contact>,
    granted: bool,
}

#[derive(Clone)]
pub struct InMemoryContacts {
    inner: Arc<Mutex<AddressBook>>,
}

impl InMemoryContacts {
    /// A readable address book.
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { inner: Arc::new(Mutex::new(AddressBook { contacts, granted: true })) }
    }

    /// Load contacts from a JSON array of `{name, phone_number, profile_picture}`.
    pub async fn from_json_file(path: impl AsRef<Path>) -> ChatResult<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let contacts: Vec<Contact> = serde_json::from_str(&raw)?;
        info!("Loaded {} contacts from {}", contacts.len(), path.as_ref().display());
        Ok(Self::new(contacts))
    }

    pub async fn grant(&self) {
        self.inner.lock().await.granted = true;
    }

    pub async fn revoke(&self) {
        self.inner.lock().await.granted = false;
    }

    pub async fn add(&self, contact: Contact) {
        self.inner.lock().await.contacts.push(contact);
    }
}

#[async_trait]
impl ContactsProvider for InMemoryContacts {
    async fn query_contacts(&self) -> ChatResult<Vec<Contact>> {
        let book = self.inner.lock().await;
        if !book.granted {
            return Err(ChatError::PermissionDenied("contacts".to_string()));
        }
        Ok(book.contacts.clone())
    }
}
