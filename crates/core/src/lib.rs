//! Shared model for the storefront popup targeting engine: campaign and
//! visitor types, configuration, error taxonomy, the engine event bus, and
//! the campaign read API boundary.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod feed;
pub mod types;

pub use config::AppConfig;
pub use error::{PopupError, PopupResult};
