pub mod config;
pub mod database;
pub mod models;
pub mod services;

pub use config::{ClientConfig, RealtimeBackend};
pub use database::Database;
