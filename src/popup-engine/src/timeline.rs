//! Recorded page timelines replayed by `popup-engine simulate`.

use popup_core::event_bus::DismissReason;
use popup_triggers::{Millis, PageEvent};
use serde::Deserialize;

/// One step of a timeline file: either a page event or a dismissal of the
/// presented campaign.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimelineStep {
    Dismiss { at_ms: Millis, dismiss: DismissReason },
    Event(PageEvent),
}

impl TimelineStep {
    pub fn at_ms(&self) -> Millis {
        match self {
            TimelineStep::Dismiss { at_ms, .. } => *at_ms,
            TimelineStep::Event(event) => event.at_ms,
        }
    }
}

/// Parse a timeline and order it by page time. Steps sharing a timestamp
/// keep their file order.
pub fn parse_timeline(body: &[u8]) -> serde_json::Result<Vec<TimelineStep>> {
    let mut steps: Vec<TimelineStep> = serde_json::from_slice(body)?;
    steps.sort_by_key(TimelineStep::at_ms);
    Ok(steps)
}
