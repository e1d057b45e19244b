//! Page runtime: one instance per page view.
//!
//! Startup runs the experiment filter and the targeting filter to completion
//! before any watcher is armed. Afterwards every page event is dispatched to
//! each campaign's trigger combinator, newly ready campaigns are handed to
//! the selector, and a winning campaign disarms every competitor within the
//! same dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use popup_core::event_bus::{DismissReason, EngineEvent, EngineSink};
use popup_core::feed::FeedResponse;
use popup_core::types::{Campaign, DiscountConfig, VisitorContext};
use popup_core::AppConfig;
use popup_delivery::{FrequencyCapStore, KeyValueStore};
use popup_targeting::TargetingFilter;
use popup_triggers::{ArmContext, Millis, PageEvent, TriggerCombinator, TriggerSet};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::experiments::ExperimentAssigner;
use crate::selector::{CampaignSelector, ReadyCampaign};
use crate::state_machine::SelectorState;

/// The single "show campaign X" signal handed to rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowDecision {
    pub campaign_id: String,
    pub variant_key: Option<String>,
    pub template_type: String,
    pub content: serde_json::Value,
    pub discount: Option<DiscountConfig>,
    pub at_ms: Millis,
}

impl ShowDecision {
    fn from_campaign(campaign: &Campaign, at_ms: Millis) -> Self {
        Self {
            campaign_id: campaign.id.clone(),
            variant_key: campaign.experiment.as_ref().map(|e| e.variant_key.clone()),
            template_type: campaign.template_type.clone(),
            content: campaign.content_config.clone(),
            discount: campaign.discount_config.clone(),
            at_ms,
        }
    }
}

pub struct PageRuntime {
    context: VisitorContext,
    campaigns: HashMap<String, Campaign>,
    combinators: Vec<TriggerCombinator>,
    selector: CampaignSelector,
    sink: Arc<dyn EngineSink>,
    last_event_ms: Millis,
}

impl PageRuntime {
    /// Filter the feed for this visitor and arm the surviving campaigns.
    pub fn start(
        feed: FeedResponse,
        context: VisitorContext,
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn EngineSink>,
    ) -> Self {
        let key_prefix = config.storage.key_prefix.as_str();

        let assigner = if config.experiments.persist_assignments {
            ExperimentAssigner::with_cache(store.clone(), key_prefix)
        } else {
            ExperimentAssigner::new()
        };
        let candidates =
            assigner.filter_variants(feed.campaigns, &feed.experiments, &context.visitor_id);

        let outcome = TargetingFilter::new().filter(candidates, &context);
        sink.emit(EngineEvent::CampaignsFiltered {
            eligible: outcome.eligible.iter().map(|c| c.id.clone()).collect(),
            excluded: outcome.excluded.iter().map(|(id, _)| id.clone()).collect(),
        });

        let arm_context = ArmContext::new(&context, &config.triggers, 0);
        let mut combinators = Vec::new();
        let mut campaigns = HashMap::new();
        let mut seen = HashSet::new();
        for campaign in outcome.eligible {
            if !seen.insert(campaign.id.clone()) {
                warn!(campaign_id = %campaign.id, "duplicate campaign id in feed, keeping the first");
                continue;
            }
            let set = TriggerSet::from_rules(&campaign.id, &campaign.target_rules.enhanced_triggers);
            if set.is_empty() {
                debug!(campaign_id = %campaign.id, "no trigger enabled, not arming");
                continue;
            }
            combinators.push(TriggerCombinator::arm(&campaign.id, &set, &arm_context));
            campaigns.insert(campaign.id.clone(), campaign);
        }

        let mut selector = CampaignSelector::new(
            FrequencyCapStore::new(store, key_prefix),
            context.session_id.clone(),
            sink.clone(),
        );
        if !combinators.is_empty() {
            if let Err(e) = selector.arm() {
                error!(error = %e, "selector invariant violated on arm");
            }
        }
        info!(
            visitor_id = %context.visitor_id,
            armed = combinators.len(),
            state = ?selector.state(),
            "page runtime started"
        );

        Self {
            context,
            campaigns,
            combinators,
            selector,
            sink,
            last_event_ms: 0,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.selector.state()
    }

    pub fn context(&self) -> &VisitorContext {
        &self.context
    }

    /// Ids of campaigns whose triggers are still live.
    pub fn armed_campaigns(&self) -> Vec<&str> {
        self.combinators
            .iter()
            .filter(|c| !c.is_disposed() && !c.is_ready())
            .map(|c| c.campaign_id())
            .collect()
    }

    pub fn presented(&self) -> Option<&str> {
        self.selector.presented()
    }

    /// Feed one page event. Returns the show decision on the event that
    /// moved the page to `Presenting`.
    pub fn dispatch(&mut self, event: &PageEvent) -> Option<ShowDecision> {
        if self.selector.state() != SelectorState::Armed {
            return None;
        }
        self.last_event_ms = self.last_event_ms.max(event.at_ms);

        for combinator in &mut self.combinators {
            let observation = combinator.observe(event);
            for kind in &observation.fired {
                self.sink.emit(EngineEvent::TriggerFired {
                    campaign_id: combinator.campaign_id().to_string(),
                    kind: kind.as_str().to_string(),
                    at_ms: event.at_ms,
                });
            }
            if !observation.ready {
                continue;
            }
            self.sink.emit(EngineEvent::CampaignReady {
                campaign_id: combinator.campaign_id().to_string(),
                at_ms: event.at_ms,
            });
            if let Some(campaign) = self.campaigns.get(combinator.campaign_id()) {
                self.selector.mark_ready(ReadyCampaign {
                    campaign_id: campaign.id.clone(),
                    priority: campaign.priority,
                    ready_at: combinator.ready_at().unwrap_or(event.at_ms),
                    caps: campaign.target_rules.enhanced_triggers.frequency_capping,
                });
            }
        }

        let campaign_id = self.selector.select(self.wall_clock(event.at_ms))?;
        for combinator in &mut self.combinators {
            combinator.dispose();
        }

        let campaign = self.campaigns.get(&campaign_id)?;
        let decision = ShowDecision::from_campaign(campaign, event.at_ms);
        info!(
            campaign_id = %decision.campaign_id,
            template = %decision.template_type,
            variant = ?decision.variant_key,
            at_ms = event.at_ms,
            "campaign shown"
        );
        metrics::counter!("popup_campaigns_shown_total", "template" => decision.template_type.clone())
            .increment(1);
        self.sink.emit(EngineEvent::CampaignShown {
            campaign_id: decision.campaign_id.clone(),
            variant_key: decision.variant_key.clone(),
            at_ms: event.at_ms,
        });
        Some(decision)
    }

    /// Close, submit or navigate away from the presented campaign.
    pub fn dismiss(&mut self, reason: DismissReason) -> bool {
        self.selector.dismiss(reason)
    }

    /// Tear the page down. Safe to call repeatedly and after a show.
    pub fn unload(&mut self) {
        for combinator in &mut self.combinators {
            combinator.dispose();
        }
        self.selector.unload();
        debug!(last_event_ms = self.last_event_ms, "page runtime unloaded");
    }

    /// Wall-clock time of a page-relative timestamp.
    fn wall_clock(&self, at_ms: Millis) -> DateTime<Utc> {
        let offset = Duration::milliseconds(i64::try_from(at_ms).unwrap_or(i64::MAX));
        self.context
            .page_loaded_at
            .checked_add_signed(offset)
            .unwrap_or(self.context.page_loaded_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use popup_core::event_bus::capture_sink;
    use popup_delivery::MemoryStore;
    use serde_json::json;

    fn context() -> VisitorContext {
        let mut ctx = VisitorContext::new("v-1", "s-1");
        ctx.page_url = "https://shop.example/products/mug".into();
        ctx.page_loaded_at = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
        ctx
    }

    fn campaign(value: serde_json::Value) -> Campaign {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_campaign_without_triggers_is_not_armed() {
        let feed = FeedResponse {
            campaigns: vec![campaign(json!({
                "id": "silent",
                "templateType": "banner",
                "targetRules": {"enhancedTriggers": {"page_load": {"enabled": false}}}
            }))],
            experiments: vec![],
        };
        let runtime = PageRuntime::start(
            feed,
            context(),
            &AppConfig::default(),
            Arc::new(MemoryStore::new()),
            capture_sink(),
        );
        assert_eq!(runtime.state(), SelectorState::Idle);
        assert!(runtime.armed_campaigns().is_empty());
    }

    #[test]
    fn test_default_page_load_shows_immediately() {
        let sink = capture_sink();
        let feed = FeedResponse {
            campaigns: vec![campaign(json!({
                "id": "welcome",
                "templateType": "newsletter",
                "contentConfig": {"headline": "Hi"},
                "discountConfig": {"enabled": true, "discountType": "percentage", "value": 10}
            }))],
            experiments: vec![],
        };
        let mut runtime = PageRuntime::start(
            feed,
            context(),
            &AppConfig::default(),
            Arc::new(MemoryStore::new()),
            sink.clone(),
        );
        assert_eq!(runtime.state(), SelectorState::Armed);

        let decision = runtime.dispatch(&PageEvent::tick(0)).unwrap();
        assert_eq!(decision.campaign_id, "welcome");
        assert_eq!(decision.content["headline"], "Hi");
        assert_eq!(decision.discount.as_ref().and_then(|d| d.value), Some(10.0));
        assert_eq!(runtime.state(), SelectorState::Presenting);

        assert!(runtime.dismiss(DismissReason::Submitted));
        assert_eq!(runtime.state(), SelectorState::Cooldown);
        assert!(runtime.dispatch(&PageEvent::tick(500)).is_none());

        let names: Vec<&str> = sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "campaigns_filtered",
                "trigger_fired",
                "campaign_ready",
                "campaign_shown",
                "campaign_dismissed"
            ]
        );
    }

    fn start(campaigns: Vec<Campaign>) -> PageRuntime {
        PageRuntime::start(
            FeedResponse {
                campaigns,
                experiments: vec![],
            },
            context(),
            &AppConfig::default(),
            Arc::new(MemoryStore::new()),
            capture_sink(),
        )
    }

    #[test]
    fn test_rejected_triggers_never_show() {
        for triggers in [
            json!({"exit_intnet": {"sensitivity": "high"}}),
            json!({"time_delay": {"seconds": "soon"}}),
        ] {
            let mut runtime = start(vec![campaign(json!({
                "id": "typo",
                "templateType": "banner",
                "targetRules": {"enhancedTriggers": triggers}
            }))]);
            assert!(runtime.armed_campaigns().is_empty());
            assert_eq!(runtime.state(), SelectorState::Idle);
            assert!(runtime.dispatch(&PageEvent::tick(0)).is_none());
            assert!(runtime.dispatch(&PageEvent::tick(60_000)).is_none());
            assert_eq!(runtime.presented(), None);
        }
    }

    #[test]
    fn test_duplicate_campaign_ids_arm_once() {
        let mut runtime = start(vec![
            campaign(json!({
                "id": "dup",
                "templateType": "banner",
                "targetRules": {"enhancedTriggers": {"time_delay": {"seconds": 2}}}
            })),
            campaign(json!({
                "id": "dup",
                "templateType": "spin_wheel",
                "targetRules": {"enhancedTriggers": {"time_delay": {"seconds": 1}}}
            })),
        ]);
        assert_eq!(runtime.armed_campaigns(), vec!["dup"]);
        assert!(runtime.dispatch(&PageEvent::tick(1000)).is_none());
        let decision = runtime.dispatch(&PageEvent::tick(2000)).unwrap();
        assert_eq!(decision.template_type, "banner");
    }

    #[test]
    fn test_draft_campaign_in_direct_feed_is_not_armed() {
        let mut runtime = start(vec![campaign(json!({
            "id": "draft",
            "status": "draft",
            "templateType": "banner"
        }))]);
        assert!(runtime.armed_campaigns().is_empty());
        assert!(runtime.dispatch(&PageEvent::tick(0)).is_none());
    }

    #[test]
    fn test_unload_is_idempotent() {
        let feed = FeedResponse {
            campaigns: vec![campaign(json!({
                "id": "later",
                "templateType": "banner",
                "targetRules": {"enhancedTriggers": {"time_delay": {"seconds": 5}}}
            }))],
            experiments: vec![],
        };
        let mut runtime = PageRuntime::start(
            feed,
            context(),
            &AppConfig::default(),
            Arc::new(MemoryStore::new()),
            capture_sink(),
        );
        assert_eq!(runtime.armed_campaigns(), vec!["later"]);
        runtime.unload();
        runtime.unload();
        assert!(runtime.armed_campaigns().is_empty());
        assert_eq!(runtime.state(), SelectorState::Idle);
        assert!(runtime.dispatch(&PageEvent::tick(6000)).is_none());
    }
}
