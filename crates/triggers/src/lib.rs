//! Trigger scheduling: typed trigger specs, one single-fire watcher per
//! trigger kind, and the AND/OR combinator that turns watcher fires into a
//! campaign-ready signal.
//!
//! # Modules
//!
//! - [`events`]: Page events (scroll, pointer, cart, custom) and the page clock
//! - [`spec`]: Trigger kinds and their typed configs, parsed from campaign rules
//! - [`watchers`]: Armed/Fired/Disabled watcher state machines
//! - [`combinator`]: Per-campaign combination of watcher fires

pub mod combinator;
pub mod events;
pub mod spec;
pub mod watchers;

pub use combinator::{Observation, TriggerCombinator};
pub use events::{Millis, PageEvent, PageEventKind};
pub use spec::{TriggerKind, TriggerSet, TriggerSpec};
pub use watchers::{ArmContext, TriggerWatcher, WatcherState};
