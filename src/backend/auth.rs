use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::common::error::{AuthFailure, ChatError, ChatResult};

/// The account the authentication backend reports as signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
}

/// Outcome of starting a phone verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneVerification {
    /// An SMS was sent; sign in with this id and the received code.
    CodeSent(String),
    /// The platform read the SMS itself and hands over the code.
    AutoVerified { verification_id: String, code: String },
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in_email(&self, email: &str, password: &str) -> ChatResult<AuthUser>;
    async fn sign_in_phone(&self, verification_id: &str, code: &str) -> ChatResult<AuthUser>;
    async fn sign_in_federated(&self, id_token: &str) -> ChatResult<AuthUser>;
    async fn sign_up(&self, email: &str, password: &str) -> ChatResult<AuthUser>;
    async fn update_display_name(&self, name: &str) -> ChatResult<()>;
    async fn send_email_verification(&self) -> ChatResult<()>;
    async fn request_phone_verification(&self, phone_number: &str, timeout: Duration) -> ChatResult<PhoneVerification>;
    async fn sign_out(&self) -> ChatResult<()>;
    async fn current_user(&self) -> Option<AuthUser>;
}

struct Account {
    password: String,
    user: AuthUser,
}

struct PendingCode {
    phone_number: String,
    code: String,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    phone_users: HashMap<String, AuthUser>,
    federated: HashMap<String, AuthUser>,
    pending_codes: HashMap<String, PendingCode>,
    verification_mails: Vec<String>,
    current: Option<AuthUser>,
    auto_verify: bool,
}

/// Authentication backend kept in process memory.
///
/// Verification codes are always `123456`; tests read them back with
/// [`InMemoryAuth::pending_code`].
#[derive(Clone, Default)]
pub struct InMemoryAuth {
    inner: Arc<Mutex<AuthState>>,
}

pub const IN_MEMORY_SMS_CODE: &str = "123456";
const MIN_PASSWORD_LENGTH: usize = 6;

impl InMemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_email_verified(&self, email: &str) -> bool {
        let mut state = self.inner.lock().await;
        match state.accounts.get_mut(email) {
            Some(account) => {
                account.user.email_verified = true;
                true
            }
            None => false,
        }
    }

    /// Accept `id_token` as a federated identity for `user`.
    pub async fn register_federated_identity(&self, id_token: &str, user: AuthUser) {
        self.inner.lock().await.federated.insert(id_token.to_string(), user);
    }

    /// Make phone verification complete without an SMS round trip.
    pub async fn set_auto_verify(&self, enabled: bool) {
        self.inner.lock().await.auto_verify = enabled;
    }

    pub async fn pending_code(&self, verification_id: &str) -> Option<String> {
        self.inner.lock().await.pending_codes.get(verification_id).map(|p| p.code.clone())
    }

    /// Addresses a verification mail was sent to, oldest first.
    pub async fn verification_mails(&self) -> Vec<String> {
        self.inner.lock().await.verification_mails.clone()
    }
}

#[async_trait]
impl AuthService for InMemoryAuth {
    async fn sign_in_email(&self, email: &str, password: &str) -> ChatResult<AuthUser> {
        let mut state = self.inner.lock().await;
        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(AuthFailure::InvalidCredentials.into()),
        };
        info!("[AUTH:MEM] {} signed in", user.uid);
        state.current = Some(user.clone());
        Ok(user)
    }

    async fn sign_in_phone(&self, verification_id: &str, code: &str) -> ChatResult<AuthUser> {
        let mut state = self.inner.lock().await;
        let phone_number = match state.pending_codes.get(verification_id) {
            Some(pending) if pending.code == code => pending.phone_number.clone(),
            _ => return Err(AuthFailure::InvalidVerificationCode.into()),
        };
        state.pending_codes.remove(verification_id);
        let user = state
            .phone_users
            .entry(phone_number.clone())
            .or_insert_with(|| AuthUser {
                uid: uuid::Uuid::new_v4().to_string(),
                phone_number: Some(phone_number),
                ..Default::default()
            })
            .clone();
        state.current = Some(user.clone());
        Ok(user)
    }

    async fn sign_in_federated(&self, id_token: &str) -> ChatResult<AuthUser> {
        let mut state = self.inner.lock().await;
        let user = state
            .federated
            .get(id_token)
            .cloned()
            .ok_or_else(|| ChatError::Auth(AuthFailure::Rejected("Unknown identity token".to_string())))?;
        state.current = Some(user.clone());
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> ChatResult<AuthUser> {
        if !email.contains('@') {
            return Err(AuthFailure::MalformedEmail.into());
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthFailure::WeakPassword.into());
        }
        let mut state = self.inner.lock().await;
        if state.accounts.contains_key(email) {
            return Err(AuthFailure::UserCollision.into());
        }
        let user = AuthUser {
            uid: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            ..Default::default()
        };
        state.accounts.insert(email.to_string(), Account { password: password.to_string(), user: user.clone() });
        state.current = Some(user.clone());
        info!("[AUTH:MEM] created account {}", user.uid);
        Ok(user)
    }

    async fn update_display_name(&self, name: &str) -> ChatResult<()> {
        let mut state = self.inner.lock().await;
        let current = state
            .current
            .as_mut()
            .ok_or_else(|| ChatError::Auth(AuthFailure::Rejected("No user signed in".to_string())))?;
        current.display_name = Some(name.to_string());
        let updated = current.clone();
        if let Some(email) = updated.email.as_deref() {
            if let Some(account) = state.accounts.get_mut(email) {
                account.user.display_name = updated.display_name.clone();
            }
        }
        Ok(())
    }

    async fn send_email_verification(&self) -> ChatResult<()> {
        let mut state = self.inner.lock().await;
        let email = state
            .current
            .as_ref()
            .and_then(|u| u.email.clone())
            .ok_or_else(|| ChatError::Auth(AuthFailure::Rejected("No email to verify".to_string())))?;
        debug!("[AUTH:MEM] verification mail to {}", email);
        state.verification_mails.push(email);
        Ok(())
    }

    async fn request_phone_verification(&self, phone_number: &str, _timeout: Duration) -> ChatResult<PhoneVerification> {
        if phone_number.trim().is_empty() {
            return Err(AuthFailure::Rejected("Invalid phone number".to_string()).into());
        }
        let mut state = self.inner.lock().await;
        let verification_id = uuid::Uuid::new_v4().to_string();
        state.pending_codes.insert(
            verification_id.clone(),
            PendingCode { phone_number: phone_number.to_string(), code: IN_MEMORY_SMS_CODE.to_string() },
        );
        if state.auto_verify {
            Ok(PhoneVerification::AutoVerified { verification_id, code: IN_MEMORY_SMS_CODE.to_string() })
        } else {
            Ok(PhoneVerification::CodeSent(verification_id))
        }
    }

    async fn sign_out(&self) -> ChatResult<()> {
        self.inner.lock().await.current = None;
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.inner.lock().await.current.clone()
    }
}
