use thiserror::Error;

/// Rejections reported by the authentication backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("password is too weak")]
    WeakPassword,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("malformed email")]
    MalformedEmail,
    #[error("user already exists")]
    UserCollision,
    #[error("invalid verification code")]
    InvalidVerificationCode,
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthFailure),
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("listener on {path} cancelled: {message}")]
    Cancelled { path: String, message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("local cache: {0}")]
    Cache(#[from] sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl From<redis::RedisError> for ChatError {
    fn from(e: redis::RedisError) -> Self {
        ChatError::Remote(e.to_string())
    }
}

impl ChatError {
    /// Text shown to the user. No structured code survives past this point.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Validation(msg) | ChatError::NotFound(msg) => msg.clone(),
            ChatError::Auth(AuthFailure::WeakPassword) => "Password is too weak".to_string(),
            ChatError::Auth(AuthFailure::InvalidCredentials) => "Invalid email or password".to_string(),
            ChatError::Auth(AuthFailure::MalformedEmail) => "Invalid email format".to_string(),
            ChatError::Auth(AuthFailure::UserCollision) => "Email already in use".to_string(),
            ChatError::Auth(AuthFailure::InvalidVerificationCode) => "Invalid verification code".to_string(),
            ChatError::Auth(AuthFailure::Rejected(msg)) => msg.clone(),
            ChatError::Remote(msg) => msg.clone(),
            ChatError::Cancelled { message, .. } => message.clone(),
            ChatError::PermissionDenied(msg) => format!("Permission denied: {}", msg),
            other => other.to_string(),
        }
    }
}
