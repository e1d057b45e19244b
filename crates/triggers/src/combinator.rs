//! Per-campaign trigger combination.
//!
//! Under `AND` every watcher must have fired at some point in the page view;
//! fires are remembered, so the order does not matter. Under `OR` the first
//! fire makes the campaign ready and the remaining watchers are disposed.
//! Either way the ready signal is produced once.

use popup_core::types::LogicOperator;
use serde::Serialize;
use tracing::debug;

use crate::events::{Millis, PageEvent};
use crate::spec::{TriggerKind, TriggerSet};
use crate::watchers::{ArmContext, TriggerWatcher, WatcherState};

/// What one event did to a campaign's triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// Trigger kinds that fired on this event.
    pub fired: Vec<TriggerKind>,
    /// The campaign became ready on this event.
    pub ready: bool,
}

#[derive(Debug, Clone)]
pub struct TriggerCombinator {
    campaign_id: String,
    operator: LogicOperator,
    watchers: Vec<TriggerWatcher>,
    ready_at: Option<Millis>,
    disposed: bool,
}

impl TriggerCombinator {
    /// Arm one watcher per spec in `set`.
    pub fn arm(campaign_id: &str, set: &TriggerSet, ctx: &ArmContext) -> Self {
        let watchers = set
            .specs
            .iter()
            .map(|spec| TriggerWatcher::arm(spec, ctx))
            .collect();
        debug!(
            campaign_id,
            operator = ?set.operator,
            kinds = ?set.kinds(),
            "campaign triggers armed"
        );
        Self {
            campaign_id: campaign_id.to_string(),
            operator: set.operator,
            watchers,
            ready_at: None,
            disposed: false,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn operator(&self) -> LogicOperator {
        self.operator
    }

    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some()
    }

    /// Page time at which the campaign became ready.
    pub fn ready_at(&self) -> Option<Millis> {
        self.ready_at
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn watcher_states(&self) -> Vec<(TriggerKind, WatcherState)> {
        self.watchers.iter().map(|w| (w.kind(), w.state())).collect()
    }

    pub fn observe(&mut self, event: &PageEvent) -> Observation {
        let mut observation = Observation::default();
        if self.disposed || self.ready_at.is_some() || self.watchers.is_empty() {
            return observation;
        }

        for watcher in &mut self.watchers {
            if watcher.observe(event) {
                observation.fired.push(watcher.kind());
            }
        }
        if observation.fired.is_empty() {
            return observation;
        }

        let ready = match self.operator {
            LogicOperator::Or => true,
            LogicOperator::And => self
                .watchers
                .iter()
                .all(|w| w.state() == WatcherState::Fired),
        };
        debug!(
            campaign_id = %self.campaign_id,
            fired = ?observation.fired,
            ready,
            at_ms = event.at_ms,
            "trigger fired"
        );

        if ready {
            self.ready_at = Some(event.at_ms);
            observation.ready = true;
            for watcher in &mut self.watchers {
                if watcher.state() == WatcherState::Armed {
                    watcher.dispose();
                }
            }
        }
        observation
    }

    /// Dispose every watcher. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for watcher in &mut self.watchers {
            watcher.dispose();
        }
        self.disposed = true;
        debug!(campaign_id = %self.campaign_id, "campaign triggers disposed");
    }
}
