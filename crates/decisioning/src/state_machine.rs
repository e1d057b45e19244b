use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Page-view lifecycle of the campaign selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    /// Nothing armed or shown on this page.
    #[default]
    Idle,
    /// At least one campaign is watching for a fire.
    Armed,
    /// A campaign was chosen and handed to rendering.
    Presenting,
    /// The shown campaign was dismissed. Terminal for the page view.
    Cooldown,
}

impl SelectorState {
    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_become(self, to: SelectorState) -> bool {
        use SelectorState::*;
        matches!(
            (self, to),
            (Idle, Armed) | (Armed, Presenting) | (Armed, Idle) | (Presenting, Cooldown)
        )
    }
}

/// Holds the selector's current state and rejects moves the lifecycle does
/// not allow.
#[derive(Debug, Clone, Default)]
pub struct SelectorStateMachine {
    state: SelectorState,
}

impl SelectorStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn transition(&mut self, to: SelectorState) -> Result<()> {
        if !self.state.can_become(to) {
            bail!("Invalid selector transition from {:?} to {:?}", self.state, to);
        }
        self.state = to;
        Ok(())
    }
}
