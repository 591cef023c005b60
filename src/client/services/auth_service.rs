use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};

use crate::backend::{AuthService, AuthUser, DocumentStore, LocalCache, PhoneVerification, SettingsStore, HAS_LOGGED_IN};
use crate::client::config::ClientConfig;
use crate::client::models::{AuthUiState, Observable, UiState};
use crate::client::services::validation::{validate_credentials, Credentials};
use crate::common::error::{AuthFailure, ChatError, ChatResult};
use crate::common::models::{Document, User};
use crate::utils::clock::now_millis_string;

const USERS: &str = "users";
const LOGIN_OK: &str = "Login successful";
const REGISTER_OK: &str = "Registration successful, please verify your email";

/// What the user typed on the auth screen.
#[derive(Debug, Clone, Default)]
pub struct AuthForm {
    pub name: String,
    pub birth_date: String,
    pub phone_number: String,
    pub email: String,
    pub password: String,
    pub verification_code: String,
}

#[derive(Debug, Clone)]
struct AuthSettings {
    phone_country_prefix: String,
    verification_timeout: Duration,
    min_password_length: usize,
}

/// Sign-in, sign-up and sign-out flows.
pub struct AuthViewModel {
    auth: Arc<dyn AuthService>,
    documents: Arc<dyn DocumentStore>,
    cache: Arc<dyn LocalCache>,
    settings: Arc<dyn SettingsStore>,
    options: AuthSettings,
    form: Mutex<AuthForm>,
    state: Observable<AuthUiState>,
}

impl AuthViewModel {
    pub fn new(
        auth: Arc<dyn AuthService>,
        documents: Arc<dyn DocumentStore>,
        cache: Arc<dyn LocalCache>,
        settings: Arc<dyn SettingsStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            auth,
            documents,
            cache,
            settings,
            options: AuthSettings {
                phone_country_prefix: config.phone_country_prefix.clone(),
                verification_timeout: config.verification_timeout(),
                min_password_length: config.min_password_length,
            },
            form: Mutex::new(AuthForm::default()),
            state: Observable::default(),
        }
    }

    pub fn state(&self) -> Observable<AuthUiState> {
        self.state.clone()
    }

    pub async fn form(&self) -> AuthForm {
        self.form.lock().await.clone()
    }

    pub async fn set_name(&self, name: &str) {
        self.form.lock().await.name = name.to_string();
    }

    pub async fn set_birth_date(&self, birth_date: &str) {
        self.form.lock().await.birth_date = birth_date.to_string();
    }

    pub async fn set_phone_number(&self, phone_number: &str) {
        self.form.lock().await.phone_number = phone_number.to_string();
    }

    pub async fn set_email(&self, email: &str) {
        self.form.lock().await.email = email.to_string();
    }

    pub async fn set_password(&self, password: &str) {
        self.form.lock().await.password = password.to_string();
    }

    pub async fn set_verification_code(&self, code: &str) {
        self.form.lock().await.verification_code = code.to_string();
    }

    /// True while a session is stored on this device.
    pub async fn login_status(&self) -> ChatResult<watch::Receiver<bool>> {
        self.settings.watch_flag(HAS_LOGGED_IN).await
    }

    pub async fn login(&self) -> ChatResult<()> {
        let form = self.form().await;
        self.validate(&form, false)?;
        self.begin();
        let result = self.email_login(&form).await;
        self.finish(result, LOGIN_OK)
    }

    pub async fn login_with_federated(&self, id_token: &str) -> ChatResult<()> {
        let form = self.form().await;
        self.begin();
        let result = self.federated_login(id_token, &form).await;
        self.finish(result, LOGIN_OK)
    }

    /// Ask for an SMS code for the number in the form (country prefix added).
    pub async fn send_verification_code(&self) -> ChatResult<()> {
        let form = self.form().await;
        let phone_number = form.phone_number.trim();
        if phone_number.is_empty() {
            return self.reject(ChatError::Validation("Phone number cannot be empty".to_string()));
        }
        self.begin();

        let full_number = format!("{}{}", self.options.phone_country_prefix, phone_number);
        match self.auth.request_phone_verification(&full_number, self.options.verification_timeout).await {
            Ok(PhoneVerification::CodeSent(verification_id)) => {
                info!("[AUTH] verification code sent to {}", full_number);
                self.state.update(|s| {
                    s.verification_id = Some(verification_id);
                    s.is_code_sent = true;
                    s.ui.is_loading = false;
                });
                Ok(())
            }
            Ok(PhoneVerification::AutoVerified { verification_id, code }) => {
                info!("[AUTH] {} verified without SMS", full_number);
                self.state.update(|s| s.verification_id = Some(verification_id));
                self.login_with_phone(Some(&code)).await
            }
            Err(e) => {
                let message = format!("Verification failed: {}", e.user_message());
                self.state.update(|s| s.ui = UiState::failed(message));
                Err(e)
            }
        }
    }

    /// Finish phone sign-in with `code`, or the code typed in the form.
    pub async fn login_with_phone(&self, code: Option<&str>) -> ChatResult<()> {
        let form = self.form().await;
        let code = code.map(str::to_string).unwrap_or_else(|| form.verification_code.clone());
        let verification_id = self.state.get().verification_id;

        let verification_id = match verification_id {
            Some(id) if !code.trim().is_empty() => id,
            _ => {
                return self.reject(ChatError::Validation("Verification ID or SMS code is missing".to_string()));
            }
        };

        self.begin();
        let result = self.phone_login(&verification_id, code.trim(), &form).await;
        self.finish(result, LOGIN_OK)
    }

    pub async fn register(&self) -> ChatResult<()> {
        let form = self.form().await;
        self.validate(&form, true)?;
        self.begin();
        let result = self.create_account(&form).await;
        self.finish(result, REGISTER_OK)
    }

    /// Forget the local session: cached rooms and user, backend session and settings.
    pub async fn logout(&self) -> ChatResult<()> {
        let result = async {
            self.cache.clear_rooms().await?;
            self.cache.clear_users().await?;
            self.auth.sign_out().await?;
            self.settings.clear_all().await
        }
        .await;
        match &result {
            Ok(()) => {
                info!("[AUTH] logged out");
                self.state.set(AuthUiState::default());
            }
            Err(e) => self.state.update(|s| s.ui = UiState::failed(e.user_message())),
        }
        result
    }

    fn validate(&self, form: &AuthForm, registering: bool) -> ChatResult<()> {
        let credentials = Credentials {
            name: &form.name,
            birth_date: &form.birth_date,
            email: &form.email,
            password: &form.password,
        };
        match validate_credentials(credentials, registering, self.options.min_password_length) {
            Ok(()) => Ok(()),
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, error: ChatError) -> ChatResult<()> {
        self.state.update(|s| s.ui = UiState::failed(error.user_message()));
        Err(error)
    }

    fn begin(&self) {
        self.state.update(|s| s.ui = UiState::loading());
    }

    fn finish(&self, result: ChatResult<()>, success: &str) -> ChatResult<()> {
        match &result {
            Ok(()) => self.state.update(|s| s.ui = UiState::succeeded(success)),
            Err(e) => {
                warn!("[AUTH] {}", e);
                self.state.update(|s| s.ui = UiState::failed(e.user_message()));
            }
        }
        result
    }

    async fn email_login(&self, form: &AuthForm) -> ChatResult<()> {
        let account = self.auth.sign_in_email(&form.email, &form.password).await?;
        if !account.email_verified {
            self.auth.sign_out().await?;
            return Err(AuthFailure::Rejected("Email not verified, please check your email".to_string()).into());
        }
        let profile = self.documents.get_document(USERS, &account.uid).await?.unwrap_or_default();
        self.store_session(&User::from_document(&account.uid, &profile)).await
    }

    async fn federated_login(&self, id_token: &str, form: &AuthForm) -> ChatResult<()> {
        let account = self.auth.sign_in_federated(id_token).await?;
        if self.documents.get_document(USERS, &account.uid).await?.is_none() {
            info!("[AUTH] first federated sign-in for {}, creating profile", account.uid);
            let profile = profile_document(&account, account.display_name.clone(), &form.birth_date);
            self.documents.set_document(USERS, &account.uid, profile).await?;
        }
        let profile = self
            .documents
            .get_document(USERS, &account.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound("User profile not found".to_string()))?;
        self.store_session(&User::from_document(&account.uid, &profile)).await
    }

    async fn phone_login(&self, verification_id: &str, code: &str, form: &AuthForm) -> ChatResult<()> {
        let account = self.auth.sign_in_phone(verification_id, code).await?;
        let profile = self.documents.get_document(USERS, &account.uid).await?.unwrap_or_default();
        let mut user = User::from_document(&account.uid, &profile);
        // the membership key is the number as typed, without the country prefix
        user.phone_number = form.phone_number.trim().to_string();
        self.store_session(&user).await
    }

    async fn create_account(&self, form: &AuthForm) -> ChatResult<()> {
        let account = self.auth.sign_up(&form.email, &form.password).await?;
        self.auth.update_display_name(&form.name).await?;
        self.auth.send_email_verification().await?;

        let mut profile = profile_document(&account, Some(form.name.clone()), &form.birth_date);
        profile.insert("email".to_string(), json!(form.email));
        profile.insert("phone_number".to_string(), json!(form.phone_number.trim()));
        self.documents.set_document(USERS, &account.uid, profile).await?;
        info!("[AUTH] registered {}", account.uid);
        Ok(())
    }

    async fn store_session(&self, user: &User) -> ChatResult<()> {
        self.cache.upsert_user(user).await?;
        self.settings.set_flag(HAS_LOGGED_IN, true).await?;
        info!("[AUTH] session stored for {}", user.uid);
        Ok(())
    }
}

fn profile_document(account: &AuthUser, name: Option<String>, birth_date: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("name".to_string(), name.map_or(Value::Null, Value::String));
    doc.insert("phone_number".to_string(), json!(account.phone_number.clone().unwrap_or_default()));
    doc.insert("email".to_string(), json!(account.email));
    doc.insert("birth_date".to_string(), json!(birth_date));
    doc.insert("profile_picture".to_string(), json!(account.photo_url));
    doc.insert("created_at".to_string(), json!(now_millis_string()));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileSettingsStore, InMemoryAuth, InMemoryDocumentStore};
    use crate::client::database::Database;
    use crate::common::models::ChatRoom;

    struct Fixture {
        auth: InMemoryAuth,
        documents: InMemoryDocumentStore,
        cache: Arc<Database>,
        vm: AuthViewModel,
    }

    async fn fixture() -> Fixture {
        let auth = InMemoryAuth::new();
        let documents = InMemoryDocumentStore::new();
        let cache = Arc::new(Database::open("sqlite::memory:").await.unwrap());
        let vm = AuthViewModel::new(
            Arc::new(auth.clone()),
            Arc::new(documents.clone()),
            cache.clone(),
            Arc::new(FileSettingsStore::in_memory()),
            &ClientConfig::default(),
        );
        Fixture { auth, documents, cache, vm }
    }

    async fn fill_registration(vm: &AuthViewModel) {
        vm.set_name("Ana").await;
        vm.set_birth_date("2000-01-01").await;
        vm.set_phone_number("0811").await;
        vm.set_email("ana@example.com").await;
        vm.set_password("secret1").await;
    }

    fn error(vm: &AuthViewModel) -> Option<String> {
        vm.state().get().ui.error
    }

    #[tokio::test]
    async fn invalid_form_never_reaches_the_backend() {
        let f = fixture().await;
        f.vm.set_email("ana@example.com").await;
        f.vm.set_password("123").await;
        assert!(f.vm.login().await.is_err());
        assert_eq!(error(&f.vm).as_deref(), Some("Password must be at least 6 characters"));

        assert!(f.vm.register().await.is_err());
        assert_eq!(error(&f.vm).as_deref(), Some("Name cannot be empty"));
        assert!(f.auth.current_user().await.is_none());
    }

    #[tokio::test]
    async fn register_then_login_after_verification() {
        let f = fixture().await;
        fill_registration(&f.vm).await;
        f.vm.register().await.unwrap();
        assert_eq!(f.vm.state().get().ui.success.as_deref(), Some(REGISTER_OK));
        assert_eq!(f.auth.verification_mails().await, vec!["ana@example.com".to_string()]);

        f.vm.login().await.unwrap_err();
        assert_eq!(error(&f.vm).as_deref(), Some("Email not verified, please check your email"));
        assert!(f.auth.current_user().await.is_none());

        f.auth.mark_email_verified("ana@example.com").await;
        f.vm.login().await.unwrap();
        assert_eq!(f.vm.state().get().ui.success.as_deref(), Some(LOGIN_OK));

        let cached = f.cache.read_user().await.unwrap().unwrap();
        assert_eq!(cached.name.as_deref(), Some("Ana"));
        assert_eq!(cached.phone_number, "0811");
        assert!(*f.vm.login_status().await.unwrap().borrow());
    }

    #[tokio::test]
    async fn wrong_password_is_reported_as_bad_credentials() {
        let f = fixture().await;
        fill_registration(&f.vm).await;
        f.vm.register().await.unwrap();
        f.auth.mark_email_verified("ana@example.com").await;

        f.vm.set_password("wrong-password").await;
        let err = f.vm.login().await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(AuthFailure::InvalidCredentials)));
        assert_eq!(error(&f.vm).as_deref(), Some("Invalid email or password"));
        assert!(f.cache.read_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_reports_collision() {
        let f = fixture().await;
        fill_registration(&f.vm).await;
        f.vm.register().await.unwrap();
        assert!(f.vm.register().await.is_err());
        assert_eq!(error(&f.vm).as_deref(), Some("Email already in use"));
    }

    #[tokio::test]
    async fn federated_login_creates_missing_profile() {
        let f = fixture().await;
        let account = AuthUser {
            uid: "g1".into(),
            display_name: Some("Gita".into()),
            email: Some("gita@example.com".into()),
            ..Default::default()
        };
        f.auth.register_federated_identity("token-1", account).await;
        f.vm.set_birth_date("1999-09-09").await;

        f.vm.login_with_federated("token-1").await.unwrap();
        let profile = f.documents.get_document("users", "g1").await.unwrap().unwrap();
        assert_eq!(profile.get("birth_date"), Some(&json!("1999-09-09")));
        let cached = f.cache.read_user().await.unwrap().unwrap();
        assert_eq!(cached.name.as_deref(), Some("Gita"));

        assert!(f.vm.login_with_federated("unknown").await.is_err());
    }

    #[tokio::test]
    async fn phone_login_uses_sent_code() {
        let f = fixture().await;
        f.vm.set_phone_number("0811").await;
        assert!(f.vm.login_with_phone(None).await.is_err());
        assert_eq!(error(&f.vm).as_deref(), Some("Verification ID or SMS code is missing"));

        f.vm.send_verification_code().await.unwrap();
        let state = f.vm.state().get();
        assert!(state.is_code_sent);
        let code = f.auth.pending_code(state.verification_id.as_deref().unwrap()).await.unwrap();

        f.vm.set_verification_code(&code).await;
        f.vm.login_with_phone(None).await.unwrap();
        let cached = f.cache.read_user().await.unwrap().unwrap();
        assert_eq!(cached.phone_number, "0811");
        assert_eq!(f.auth.current_user().await.unwrap().phone_number.as_deref(), Some("+620811"));
    }

    #[tokio::test]
    async fn auto_verified_number_signs_in_directly() {
        let f = fixture().await;
        f.auth.set_auto_verify(true).await;
        f.vm.set_phone_number("0812").await;
        f.vm.send_verification_code().await.unwrap();
        assert_eq!(f.vm.state().get().ui.success.as_deref(), Some(LOGIN_OK));
        assert!(f.cache.read_user().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let f = fixture().await;
        f.auth.set_auto_verify(true).await;
        f.vm.set_phone_number("0812").await;
        f.vm.send_verification_code().await.unwrap();
        let status = f.vm.login_status().await.unwrap();
        assert!(*status.borrow());

        let room = ChatRoom { room_id: "r1".into(), ..Default::default() };
        f.cache.upsert_rooms(&[room]).await.unwrap();

        f.vm.logout().await.unwrap();
        assert!(!*status.borrow());
        assert!(f.cache.read_user().await.unwrap().is_none());
        assert!(f.cache.read_rooms().await.unwrap().is_empty());
        assert!(f.auth.current_user().await.is_none());
    }
}
