//! Client-local delivery state: the key-value store that survives page
//! reloads, per-campaign frequency capping, and visitor/session identity.

pub mod frequency_capping;
pub mod identity;
pub mod store;

pub use frequency_capping::{CapDecision, FrequencyCapState, FrequencyCapStore};
pub use identity::VisitorIdentity;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
