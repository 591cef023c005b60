use crate::common::models::ChatRoom;

/// Loading/success/error triple every screen shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub is_loading: bool,
    pub success: Option<String>,
    pub error: Option<String>,
}

impl UiState {
    pub fn loading() -> Self {
        Self { is_loading: true, ..Default::default() }
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self { success: Some(message.into()), ..Default::default() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { error: Some(message.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUiState {
    pub ui: UiState,
    pub verification_id: Option<String>,
    pub is_code_sent: bool,
}

/// What the chat list screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomListState {
    /// Sorted newest first.
    pub rooms: Vec<ChatRoom>,
    pub ui: UiState,
}
