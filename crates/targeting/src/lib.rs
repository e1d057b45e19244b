//! Static eligibility: the flat condition evaluator and the page, device,
//! geo and audience filter that runs before any trigger is armed.

pub mod conditions;
pub mod filter;

pub use conditions::{evaluate, evaluate_rule_set, ContextField};
pub use filter::{ExclusionReason, FilterOutcome, TargetingFilter};
