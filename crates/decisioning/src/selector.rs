//! Campaign selector: picks at most one campaign per page view.
//!
//! Ready campaigns are ranked by priority (highest first), then by the page
//! time their triggers became ready (earliest first), then by campaign id.
//! The best-ranked campaign the frequency-capping store admits wins, its
//! impression is recorded exactly once, and the selector moves to
//! `Presenting`. A ready campaign that is capped stays in the ready set and
//! is re-checked on the next pass, so an elapsing cooldown can still admit it.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use popup_core::event_bus::{DismissReason, EngineEvent, EngineSink};
use popup_core::types::FrequencyCapping;
use popup_delivery::{CapDecision, FrequencyCapStore};
use popup_triggers::Millis;
use tracing::{debug, error, info, warn};

use crate::state_machine::{SelectorState, SelectorStateMachine};

/// A campaign whose trigger combination has reported ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCampaign {
    pub campaign_id: String,
    pub priority: i32,
    pub ready_at: Millis,
    pub caps: FrequencyCapping,
}

impl ReadyCampaign {
    fn rank(&self) -> (Reverse<i32>, Millis, &str) {
        (Reverse(self.priority), self.ready_at, self.campaign_id.as_str())
    }
}

pub struct CampaignSelector {
    machine: SelectorStateMachine,
    ready: Vec<ReadyCampaign>,
    capped: HashSet<String>,
    caps: FrequencyCapStore,
    session_id: String,
    sink: Arc<dyn EngineSink>,
    presented: Option<String>,
}

impl CampaignSelector {
    pub fn new(caps: FrequencyCapStore, session_id: impl Into<String>, sink: Arc<dyn EngineSink>) -> Self {
        Self {
            machine: SelectorStateMachine::new(),
            ready: Vec::new(),
            capped: HashSet::new(),
            caps,
            session_id: session_id.into(),
            sink,
            presented: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.machine.state()
    }

    /// The campaign handed to rendering on this page, if any.
    pub fn presented(&self) -> Option<&str> {
        self.presented.as_deref()
    }

    pub fn ready(&self) -> &[ReadyCampaign] {
        &self.ready
    }

    /// `Idle -> Armed`, once watchers are attached.
    pub fn arm(&mut self) -> anyhow::Result<()> {
        self.machine.transition(SelectorState::Armed)
    }

    pub fn mark_ready(&mut self, candidate: ReadyCampaign) {
        if self.ready.iter().any(|r| r.campaign_id == candidate.campaign_id) {
            return;
        }
        debug!(campaign_id = %candidate.campaign_id, ready_at = candidate.ready_at, "campaign ready");
        self.ready.push(candidate);
    }

    /// Choose among the ready campaigns. Returns the winner's id when the
    /// selector moved to `Presenting` on this call.
    pub fn select(&mut self, now: DateTime<Utc>) -> Option<String> {
        if self.machine.state() != SelectorState::Armed || self.ready.is_empty() {
            return None;
        }

        self.ready.sort_by(|a, b| a.rank().cmp(&b.rank()));

        let mut winner = None;
        for candidate in &self.ready {
            let decision = self
                .caps
                .check(&candidate.campaign_id, &candidate.caps, &self.session_id, now);
            if decision.is_allowed() {
                winner = Some(candidate.campaign_id.clone());
                break;
            }
            if self.capped.insert(candidate.campaign_id.clone()) {
                info!(campaign_id = %candidate.campaign_id, decision = ?decision, "campaign frequency capped");
                metrics::counter!("popup_frequency_cap_rejections_total", "constraint" => cap_label(decision))
                    .increment(1);
                self.sink.emit(EngineEvent::FrequencyCapped {
                    campaign_id: candidate.campaign_id.clone(),
                });
            }
        }
        let campaign_id = winner?;

        if let Err(e) = self.caps.record_show(&campaign_id, &self.session_id, now) {
            warn!(campaign_id = %campaign_id, error = %e, "failed to record impression, suppressing show");
            return None;
        }
        if let Err(e) = self.machine.transition(SelectorState::Presenting) {
            error!(campaign_id = %campaign_id, error = %e, "selector invariant violated");
            return None;
        }
        self.ready.clear();
        self.presented = Some(campaign_id.clone());
        Some(campaign_id)
    }

    /// `Presenting -> Cooldown`. Returns `false` when nothing is presented.
    pub fn dismiss(&mut self, reason: DismissReason) -> bool {
        let Some(campaign_id) = self.presented.clone() else {
            return false;
        };
        if let Err(e) = self.machine.transition(SelectorState::Cooldown) {
            debug!(campaign_id = %campaign_id, error = %e, "dismiss ignored");
            return false;
        }
        info!(campaign_id = %campaign_id, reason = ?reason, "campaign dismissed");
        self.sink
            .emit(EngineEvent::CampaignDismissed { campaign_id, reason });
        true
    }

    /// `Armed -> Idle` on page unload. No-op in any other state.
    pub fn unload(&mut self) {
        if self.machine.state() == SelectorState::Armed {
            self.ready.clear();
            if let Err(e) = self.machine.transition(SelectorState::Idle) {
                error!(error = %e, "selector invariant violated on unload");
            }
        }
    }
}

fn cap_label(decision: CapDecision) -> &'static str {
    match decision {
        CapDecision::Allowed => "allowed",
        CapDecision::SessionLimit => "session",
        CapDecision::DailyLimit => "daily",
        CapDecision::Cooldown => "cooldown",
    }
}
