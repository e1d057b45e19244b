//! Trigger watchers: one small state machine per (campaign, trigger kind).
//!
//! A watcher starts `Armed` (or `Disabled` when it can never apply on this
//! page), moves to `Fired` exactly once, and ends `Disabled` when disposed.
//! A fired watcher never fires again; re-arming builds a new watcher.

use popup_core::config::{ExitIntentConfig, ExitIntentThresholds, TriggerConfig};
use popup_core::types::{PageType, VisitorContext};
use serde::Serialize;
use tracing::debug;

use crate::events::{Millis, PageEvent, PageEventKind};
use crate::spec::{
    AddToCartConfig, CartValueConfig, ScrollDirection, Sensitivity, TriggerKind, TriggerSpec,
};

/// Pointer samples older than this do not count toward exit velocity.
pub const EXIT_VELOCITY_WINDOW_MS: Millis = 500;

const SCROLL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Armed,
    Fired,
    Disabled,
}

/// Page facts a watcher needs at arm time.
#[derive(Debug, Clone)]
pub struct ArmContext {
    pub armed_at_ms: Millis,
    pub page_type: PageType,
    pub product_id: Option<String>,
    pub cart_total: f64,
    pub scroll_debounce_ms: u64,
    pub exit_intent: ExitIntentConfig,
}

impl ArmContext {
    pub fn new(context: &VisitorContext, config: &TriggerConfig, armed_at_ms: Millis) -> Self {
        Self {
            armed_at_ms,
            page_type: context.page_type,
            product_id: context.product_id.clone(),
            cart_total: context.cart.total_value,
            scroll_debounce_ms: config.scroll_debounce_ms,
            exit_intent: config.exit_intent,
        }
    }

    fn thresholds(&self, sensitivity: Sensitivity) -> ExitIntentThresholds {
        match sensitivity {
            Sensitivity::Low => self.exit_intent.low,
            Sensitivity::Medium => self.exit_intent.medium,
            Sensitivity::High => self.exit_intent.high,
        }
    }
}

#[derive(Debug, Clone)]
struct ScrollDetector {
    threshold: f64,
    direction: ScrollDirection,
    debounce_ms: u64,
    pending: Option<(f64, Millis)>,
    deepest: f64,
}

impl ScrollDetector {
    fn observe(&mut self, event: &PageEvent) -> bool {
        // A sample that settled before this event is judged before the new
        // position replaces it.
        if self.settle(event.at_ms) {
            return true;
        }
        if let Some(pct) = event.scroll_percent() {
            self.pending = Some((pct, event.at_ms));
        }
        self.settle(event.at_ms)
    }

    fn settle(&mut self, now: Millis) -> bool {
        let Some((pct, at)) = self.pending else {
            return false;
        };
        if now < at.saturating_add(self.debounce_ms) {
            return false;
        }
        self.pending = None;
        let crossed = match self.direction {
            ScrollDirection::Down => pct + SCROLL_EPSILON >= self.threshold,
            ScrollDirection::Up => {
                self.deepest > self.threshold && pct <= self.threshold + SCROLL_EPSILON
            }
        };
        self.deepest = self.deepest.max(pct);
        crossed
    }
}

#[derive(Debug, Clone)]
struct ExitIntentDetector {
    thresholds: ExitIntentThresholds,
    last_pointer: Option<(f64, Millis)>,
    upward_velocity: f64,
}

impl ExitIntentDetector {
    fn observe(&mut self, event: &PageEvent) -> bool {
        match event.kind {
            PageEventKind::MouseMove { y, .. } => {
                if let Some((last_y, last_at)) = self.last_pointer {
                    let dt = event.at_ms.saturating_sub(last_at);
                    if dt > 0 {
                        self.upward_velocity = (last_y - y) / dt as f64;
                    }
                }
                self.last_pointer = Some((y, event.at_ms));
                false
            }
            PageEventKind::MouseLeave { client_y } => {
                let recent = self
                    .last_pointer
                    .is_some_and(|(_, at)| event.at_ms.saturating_sub(at) <= EXIT_VELOCITY_WINDOW_MS);
                let velocity = if recent { self.upward_velocity } else { 0.0 };
                client_y <= self.thresholds.max_client_y
                    && velocity >= self.thresholds.min_velocity_px_per_ms
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct AddToCartDetector {
    config: AddToCartConfig,
    due_at: Option<Millis>,
}

impl AddToCartDetector {
    fn qualifies(&self, product_id: &Option<String>, collection_ids: &[String]) -> bool {
        let product_ok = self.config.product_ids.is_empty()
            || product_id
                .as_ref()
                .is_some_and(|p| self.config.product_ids.contains(p));
        let collection_ok = self.config.collection_ids.is_empty()
            || collection_ids
                .iter()
                .any(|c| self.config.collection_ids.contains(c));
        product_ok && collection_ok
    }

    fn observe(&mut self, event: &PageEvent) -> bool {
        if let PageEventKind::AddToCart {
            product_id,
            collection_ids,
        } = &event.kind
        {
            if self.due_at.is_none() && self.qualifies(product_id, collection_ids) {
                self.due_at = Some(event.at_ms.saturating_add(self.config.delay));
            }
        }
        self.due_at.is_some_and(|due| event.at_ms >= due)
    }
}

#[derive(Debug, Clone)]
struct CartValueDetector {
    config: CartValueConfig,
    total: f64,
}

impl CartValueDetector {
    fn observe(&mut self, event: &PageEvent) -> bool {
        if let PageEventKind::CartUpdated { total_value, .. } = event.kind {
            self.total = total_value;
        }
        self.total > 0.0
            && self.total >= self.config.min_value
            && self.config.max_value.map_or(true, |max| self.total <= max)
    }
}

#[derive(Debug, Clone)]
struct ProductViewDetector {
    due_at: Millis,
    min_scroll: Option<f64>,
    deepest: f64,
}

impl ProductViewDetector {
    fn observe(&mut self, event: &PageEvent) -> bool {
        if let Some(pct) = event.scroll_percent() {
            self.deepest = self.deepest.max(pct);
        }
        event.at_ms >= self.due_at
            && self
                .min_scroll
                .map_or(true, |min| self.deepest + SCROLL_EPSILON >= min)
    }
}

#[derive(Debug, Clone)]
enum Detector {
    /// Fires once the page clock reaches the deadline.
    Deadline(Millis),
    Scroll(ScrollDetector),
    ExitIntent(ExitIntentDetector),
    Idle { idle_ms: Millis, last_activity: Millis },
    AddToCart(AddToCartDetector),
    CartValue(CartValueDetector),
    ProductView(ProductViewDetector),
    CustomEvent(String),
    /// Can never fire on this page.
    Inert,
}

impl Detector {
    fn observe(&mut self, event: &PageEvent) -> bool {
        match self {
            Detector::Deadline(due) => event.at_ms >= *due,
            Detector::Scroll(d) => d.observe(event),
            Detector::ExitIntent(d) => d.observe(event),
            Detector::Idle {
                idle_ms,
                last_activity,
            } => {
                if event.is_activity() {
                    *last_activity = event.at_ms;
                    return false;
                }
                event.at_ms.saturating_sub(*last_activity) >= *idle_ms
            }
            Detector::AddToCart(d) => d.observe(event),
            Detector::CartValue(d) => d.observe(event),
            Detector::ProductView(d) => d.observe(event),
            Detector::CustomEvent(name) => {
                matches!(&event.kind, PageEventKind::Custom { name: fired } if *fired == *name)
            }
            Detector::Inert => false,
        }
    }
}

/// Single-fire watcher for one trigger of one campaign.
#[derive(Debug, Clone)]
pub struct TriggerWatcher {
    kind: TriggerKind,
    state: WatcherState,
    detector: Detector,
}

impl TriggerWatcher {
    /// Arm a fresh watcher for `spec`.
    pub fn arm(spec: &TriggerSpec, ctx: &ArmContext) -> Self {
        let armed_at = ctx.armed_at_ms;
        let detector = match spec {
            TriggerSpec::PageLoad(c) => Detector::Deadline(armed_at.saturating_add(c.delay)),
            TriggerSpec::ScrollDepth(c) => Detector::Scroll(ScrollDetector {
                threshold: c.percentage,
                direction: c.direction,
                debounce_ms: c.debounce_ms.unwrap_or(ctx.scroll_debounce_ms),
                pending: None,
                deepest: 0.0,
            }),
            TriggerSpec::ExitIntent(c) => Detector::ExitIntent(ExitIntentDetector {
                thresholds: ctx.thresholds(c.sensitivity),
                last_pointer: None,
                upward_velocity: 0.0,
            }),
            TriggerSpec::TimeOnPage(c) => Detector::Deadline(c.seconds.saturating_mul(1000)),
            TriggerSpec::TimeDelay(c) => {
                Detector::Deadline(armed_at.saturating_add(c.seconds.saturating_mul(1000)))
            }
            TriggerSpec::IdleTimer(c) => Detector::Idle {
                idle_ms: c.idle_duration.saturating_mul(1000),
                last_activity: armed_at,
            },
            TriggerSpec::AddToCart(c) => Detector::AddToCart(AddToCartDetector {
                config: c.clone(),
                due_at: None,
            }),
            TriggerSpec::CartValue(c) => Detector::CartValue(CartValueDetector {
                config: *c,
                total: ctx.cart_total,
            }),
            TriggerSpec::ProductView(c) => {
                let product_ok = c.product_ids.is_empty()
                    || ctx
                        .product_id
                        .as_ref()
                        .is_some_and(|p| c.product_ids.contains(p));
                if ctx.page_type == PageType::Product && product_ok {
                    Detector::ProductView(ProductViewDetector {
                        due_at: c.time_on_page_seconds.saturating_mul(1000),
                        min_scroll: c.min_scroll_percentage,
                        deepest: 0.0,
                    })
                } else {
                    Detector::Inert
                }
            }
            TriggerSpec::CustomEvent(c) => Detector::CustomEvent(c.event_name.clone()),
        };

        let state = if matches!(detector, Detector::Inert) {
            WatcherState::Disabled
        } else {
            WatcherState::Armed
        };
        debug!(kind = spec.kind().as_str(), state = ?state, armed_at, "trigger watcher armed");

        Self {
            kind: spec.kind(),
            state,
            detector,
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Feed one event. Returns `true` exactly once, on the transition from
    /// `Armed` to `Fired`.
    pub fn observe(&mut self, event: &PageEvent) -> bool {
        if self.state != WatcherState::Armed {
            return false;
        }
        if self.detector.observe(event) {
            self.state = WatcherState::Fired;
            metrics::counter!("popup_triggers_fired_total", "kind" => self.kind.as_str())
                .increment(1);
            true
        } else {
            false
        }
    }

    /// Detach the watcher. Safe to call any number of times.
    pub fn dispose(&mut self) {
        self.state = WatcherState::Disabled;
        self.detector = Detector::Inert;
    }
}
