//! Frequency capping: limits how often one visitor sees a campaign.
//!
//! Counters are scoped to the session and the calendar day (UTC). Rollover
//! is detected lazily on read by comparing the stored session id and date
//! with the current ones, so no timer is needed to expire anything.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use popup_core::types::FrequencyCapping;
use popup_core::PopupResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{read_json, write_json, KeyValueStore};

/// Persisted per-campaign counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCapState {
    pub session_id: String,
    pub session_impressions: u32,
    pub day: Option<NaiveDate>,
    pub daily_impressions: u32,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl FrequencyCapState {
    /// Session count as seen from `session_id`; zero after a rotation.
    pub fn session_count(&self, session_id: &str) -> u32 {
        if self.session_id == session_id {
            self.session_impressions
        } else {
            0
        }
    }

    /// Daily count as seen on `today`; zero after midnight.
    pub fn daily_count(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.daily_impressions
        } else {
            0
        }
    }
}

/// Admission verdict with the first violated constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapDecision {
    Allowed,
    SessionLimit,
    DailyLimit,
    Cooldown,
}

impl CapDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CapDecision::Allowed)
    }
}

pub struct FrequencyCapStore {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl FrequencyCapStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, campaign_id: &str) -> String {
        format!("{}:fcap:{}", self.key_prefix, campaign_id)
    }

    pub fn state(&self, campaign_id: &str) -> FrequencyCapState {
        read_json(self.store.as_ref(), &self.key(campaign_id)).unwrap_or_default()
    }

    pub fn check(
        &self,
        campaign_id: &str,
        caps: &FrequencyCapping,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> CapDecision {
        let state = self.state(campaign_id);

        if let Some(max) = caps.max_triggers_per_session {
            if state.session_count(session_id) >= max {
                return CapDecision::SessionLimit;
            }
        }
        if let Some(max) = caps.max_triggers_per_day {
            if state.daily_count(now.date_naive()) >= max {
                return CapDecision::DailyLimit;
            }
        }
        if let (Some(cooldown), Some(last)) = (caps.cooldown_between_triggers, state.last_fired_at) {
            let elapsed = now.signed_duration_since(last).num_milliseconds();
            let required = i64::try_from(cooldown.saturating_mul(1000)).unwrap_or(i64::MAX);
            if elapsed < required {
                return CapDecision::Cooldown;
            }
        }
        CapDecision::Allowed
    }

    pub fn can_show(
        &self,
        campaign_id: &str,
        caps: &FrequencyCapping,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.check(campaign_id, caps, session_id, now).is_allowed()
    }

    /// Count one actual display. Call exactly once per show.
    pub fn record_show(
        &self,
        campaign_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> PopupResult<FrequencyCapState> {
        let previous = self.state(campaign_id);
        let today = now.date_naive();
        let next = FrequencyCapState {
            session_id: session_id.to_string(),
            session_impressions: previous.session_count(session_id) + 1,
            day: Some(today),
            daily_impressions: previous.daily_count(today) + 1,
            last_fired_at: Some(now),
        };
        write_json(self.store.as_ref(), &self.key(campaign_id), &next)?;
        debug!(
            campaign_id,
            session_impressions = next.session_impressions,
            daily_impressions = next.daily_impressions,
            "recorded campaign impression"
        );
        Ok(next)
    }
}
