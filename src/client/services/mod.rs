pub mod auth_service;
pub mod chat_list;
pub mod contacts_service;
pub mod profile_service;
pub mod room_aggregator;
pub mod validation;

pub use auth_service::{AuthForm, AuthViewModel};
pub use chat_list::ChatListViewModel;
pub use contacts_service::ContactsViewModel;
pub use profile_service::ProfileViewModel;
pub use room_aggregator::{AggregatorOptions, RoomAggregator};
