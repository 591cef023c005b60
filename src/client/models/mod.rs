pub mod observable;
pub mod ui_state;

pub use observable::Observable;
pub use ui_state::{AuthUiState, RoomListState, UiState};
