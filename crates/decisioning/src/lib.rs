//! Campaign decisioning: experiment bucketing, the selector state machine
//! and the page runtime that ties targeting, triggers and frequency capping
//! together for one page view.
//!
//! # Modules
//!
//! - [`experiments`]: Deterministic A/B/n variant assignment
//! - [`state_machine`]: Idle/Armed/Presenting/Cooldown lifecycle guard
//! - [`selector`]: Priority ranking and frequency-capped admission
//! - [`runtime`]: Per-page orchestration of filter, watchers and selector

pub mod experiments;
pub mod runtime;
pub mod selector;
pub mod state_machine;

pub use experiments::ExperimentAssigner;
pub use runtime::{PageRuntime, ShowDecision};
pub use selector::{CampaignSelector, ReadyCampaign};
pub use state_machine::{SelectorState, SelectorStateMachine};
