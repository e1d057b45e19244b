//! Engine event bus: trait for observing targeting decisions.
//!
//! The page runtime accepts an `Arc<dyn EngineSink>` and reports every
//! filter pass, trigger fire and show/dismiss decision through it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Why a presented campaign left the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    Closed,
    Submitted,
    Navigation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    CampaignsFiltered {
        eligible: Vec<String>,
        excluded: Vec<String>,
    },
    TriggerFired {
        campaign_id: String,
        kind: String,
        at_ms: u64,
    },
    CampaignReady {
        campaign_id: String,
        at_ms: u64,
    },
    FrequencyCapped {
        campaign_id: String,
    },
    CampaignShown {
        campaign_id: String,
        variant_key: Option<String>,
        at_ms: u64,
    },
    CampaignDismissed {
        campaign_id: String,
        reason: DismissReason,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::CampaignsFiltered { .. } => "campaigns_filtered",
            EngineEvent::TriggerFired { .. } => "trigger_fired",
            EngineEvent::CampaignReady { .. } => "campaign_ready",
            EngineEvent::FrequencyCapped { .. } => "frequency_capped",
            EngineEvent::CampaignShown { .. } => "campaign_shown",
            EngineEvent::CampaignDismissed { .. } => "campaign_dismissed",
        }
    }
}

pub trait EngineSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Records every event in order. Used by tests and replay tooling.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    fn log(&self) -> MutexGuard<'_, Vec<EngineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.log().clone()
    }

    pub fn count(&self) -> usize {
        self.log().len()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.log().iter().filter(|e| e.name() == name).count()
    }
}

impl EngineSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.log().push(event);
    }
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::default())
}
