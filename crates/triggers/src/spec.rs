//! Typed trigger configuration.
//!
//! Campaign rules carry triggers as a string-keyed JSON map. [`TriggerSet`]
//! turns that map into one [`TriggerSpec`] per enabled kind; unknown kinds and
//! configs that fail to parse are logged and left out, which disables them.

use popup_core::types::{EnhancedTriggers, LogicOperator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PageLoad,
    ScrollDepth,
    ExitIntent,
    TimeOnPage,
    TimeDelay,
    IdleTimer,
    AddToCart,
    CartValue,
    ProductView,
    CustomEvent,
}

impl TriggerKind {
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "page_load" => TriggerKind::PageLoad,
            "scroll_percentage" | "scroll_depth" => TriggerKind::ScrollDepth,
            "exit_intent" => TriggerKind::ExitIntent,
            "time_on_page" => TriggerKind::TimeOnPage,
            "time_delay" => TriggerKind::TimeDelay,
            "idle_timer" => TriggerKind::IdleTimer,
            "add_to_cart" => TriggerKind::AddToCart,
            "cart_value" => TriggerKind::CartValue,
            "product_view" => TriggerKind::ProductView,
            "custom_event" => TriggerKind::CustomEvent,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PageLoad => "page_load",
            TriggerKind::ScrollDepth => "scroll_depth",
            TriggerKind::ExitIntent => "exit_intent",
            TriggerKind::TimeOnPage => "time_on_page",
            TriggerKind::TimeDelay => "time_delay",
            TriggerKind::IdleTimer => "idle_timer",
            TriggerKind::AddToCart => "add_to_cart",
            TriggerKind::CartValue => "cart_value",
            TriggerKind::ProductView => "product_view",
            TriggerKind::CustomEvent => "custom_event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLoadConfig {
    #[serde(alias = "delay_ms")]
    pub delay: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub percentage: f64,
    pub direction: ScrollDirection,
    /// Overrides the engine-wide scroll debounce.
    pub debounce_ms: Option<u64>,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            percentage: 50.0,
            direction: ScrollDirection::Down,
            debounce_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitIntentTrigger {
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationConfig {
    #[serde(alias = "duration", alias = "delay_seconds")]
    pub seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Seconds.
    #[serde(alias = "idle_duration_seconds")]
    pub idle_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddToCartConfig {
    pub product_ids: Vec<String>,
    pub collection_ids: Vec<String>,
    #[serde(alias = "delay_ms")]
    pub delay: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CartValueConfig {
    pub min_value: f64,
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductViewConfig {
    pub product_ids: Vec<String>,
    pub time_on_page_seconds: u64,
    pub min_scroll_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEventConfig {
    pub event_name: String,
}

/// One enabled trigger with its own typed config.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    PageLoad(PageLoadConfig),
    ScrollDepth(ScrollConfig),
    ExitIntent(ExitIntentTrigger),
    TimeOnPage(DurationConfig),
    TimeDelay(DurationConfig),
    IdleTimer(IdleConfig),
    AddToCart(AddToCartConfig),
    CartValue(CartValueConfig),
    ProductView(ProductViewConfig),
    CustomEvent(CustomEventConfig),
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::PageLoad(_) => TriggerKind::PageLoad,
            TriggerSpec::ScrollDepth(_) => TriggerKind::ScrollDepth,
            TriggerSpec::ExitIntent(_) => TriggerKind::ExitIntent,
            TriggerSpec::TimeOnPage(_) => TriggerKind::TimeOnPage,
            TriggerSpec::TimeDelay(_) => TriggerKind::TimeDelay,
            TriggerSpec::IdleTimer(_) => TriggerKind::IdleTimer,
            TriggerSpec::AddToCart(_) => TriggerKind::AddToCart,
            TriggerSpec::CartValue(_) => TriggerKind::CartValue,
            TriggerSpec::ProductView(_) => TriggerKind::ProductView,
            TriggerSpec::CustomEvent(_) => TriggerKind::CustomEvent,
        }
    }

    /// Parse the config of one trigger kind. `value` has already been
    /// checked for `enabled`.
    pub fn parse(kind: TriggerKind, value: Value) -> Result<Self, serde_json::Error> {
        let spec = match kind {
            TriggerKind::PageLoad => TriggerSpec::PageLoad(serde_json::from_value(value)?),
            TriggerKind::ScrollDepth => TriggerSpec::ScrollDepth(serde_json::from_value(value)?),
            TriggerKind::ExitIntent => TriggerSpec::ExitIntent(serde_json::from_value(value)?),
            TriggerKind::TimeOnPage => TriggerSpec::TimeOnPage(serde_json::from_value(value)?),
            TriggerKind::TimeDelay => TriggerSpec::TimeDelay(serde_json::from_value(value)?),
            TriggerKind::IdleTimer => TriggerSpec::IdleTimer(serde_json::from_value(value)?),
            TriggerKind::AddToCart => TriggerSpec::AddToCart(serde_json::from_value(value)?),
            TriggerKind::CartValue => TriggerSpec::CartValue(serde_json::from_value(value)?),
            TriggerKind::ProductView => TriggerSpec::ProductView(serde_json::from_value(value)?),
            TriggerKind::CustomEvent => TriggerSpec::CustomEvent(serde_json::from_value(value)?),
        };
        Ok(spec)
    }
}

/// The enabled triggers of one campaign and how they combine.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSet {
    pub specs: Vec<TriggerSpec>,
    pub operator: LogicOperator,
}

impl TriggerSet {
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            operator: LogicOperator::Or,
        }
    }

    /// Build the trigger set for a campaign. When nothing is enabled,
    /// `page_load` was not explicitly switched off and no configured trigger
    /// was rejected, an immediate `page_load` is used. A campaign whose
    /// triggers were all unknown or malformed gets an empty set.
    pub fn from_rules(campaign_id: &str, rules: &EnhancedTriggers) -> Self {
        if !rules.enabled {
            return Self::empty();
        }

        let mut specs = Vec::new();
        let mut page_load_disabled = false;
        let mut rejected = false;

        for (name, raw) in &rules.triggers {
            let Some(kind) = TriggerKind::parse(name) else {
                warn!(campaign_id, trigger = %name, "unknown trigger kind, ignoring");
                rejected = true;
                continue;
            };
            let Some(config) = enabled_config(raw) else {
                if kind == TriggerKind::PageLoad {
                    page_load_disabled = true;
                }
                continue;
            };
            if specs.iter().any(|s: &TriggerSpec| s.kind() == kind) {
                warn!(campaign_id, trigger = %name, "duplicate trigger kind, keeping the first");
                continue;
            }
            match TriggerSpec::parse(kind, config) {
                Ok(spec) => specs.push(spec),
                Err(e) => {
                    warn!(campaign_id, trigger = %name, error = %e, "malformed trigger config, disabling");
                    rejected = true;
                }
            }
        }

        if specs.is_empty() && !page_load_disabled && !rejected {
            specs.push(TriggerSpec::PageLoad(PageLoadConfig::default()));
        }

        Self {
            specs,
            operator: rules
                .trigger_combination
                .operator
                .unwrap_or(LogicOperator::Or),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn kinds(&self) -> Vec<TriggerKind> {
        self.specs.iter().map(TriggerSpec::kind).collect()
    }
}

/// `true` / `{...}` / `{"enabled": true, ...}` are enabled; `false`, `null`
/// and `{"enabled": false}` are not.
fn enabled_config(raw: &Value) -> Option<Value> {
    match raw {
        Value::Bool(true) => Some(Value::Object(Default::default())),
        Value::Object(map) => {
            let enabled = map.get("enabled").and_then(Value::as_bool).unwrap_or(true);
            enabled.then(|| {
                let mut config = map.clone();
                config.remove("enabled");
                Value::Object(config)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(value: Value) -> EnhancedTriggers {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parses_typed_specs() {
        let set = TriggerSet::from_rules(
            "c",
            &rules(json!({
                "trigger_combination": {"operator": "AND"},
                "scroll_depth": {"percentage": 30, "direction": "down"},
                "time_delay": {"seconds": 3},
                "exit_intent": {"enabled": true, "sensitivity": "high"}
            })),
        );
        assert_eq!(set.operator, LogicOperator::And);
        assert_eq!(
            set.kinds(),
            vec![TriggerKind::ExitIntent, TriggerKind::ScrollDepth, TriggerKind::TimeDelay]
        );
        assert!(set.specs.contains(&TriggerSpec::TimeDelay(DurationConfig { seconds: 3 })));
    }

    #[test]
    fn test_default_page_load_when_nothing_enabled() {
        let set = TriggerSet::from_rules("c", &rules(json!({})));
        assert_eq!(set.specs, vec![TriggerSpec::PageLoad(PageLoadConfig { delay: 0 })]);
        assert_eq!(set.operator, LogicOperator::Or);
    }

    #[test]
    fn test_explicitly_disabled_page_load_suppresses_default() {
        let set = TriggerSet::from_rules("c", &rules(json!({"page_load": {"enabled": false}})));
        assert!(set.is_empty());
    }

    #[test]
    fn test_page_load_not_implicit_when_other_trigger_enabled() {
        let set = TriggerSet::from_rules(
            "c",
            &rules(json!({"custom_event": {"event_name": "quiz:done"}})),
        );
        assert_eq!(set.kinds(), vec![TriggerKind::CustomEvent]);
    }

    #[test]
    fn test_unknown_and_malformed_kinds_are_disabled() {
        let set = TriggerSet::from_rules(
            "c",
            &rules(json!({
                "moon_phase": {"phase": "full"},
                "time_delay": {"seconds": "soon"},
                "idle_timer": {"idle_duration": 20}
            })),
        );
        assert_eq!(set.kinds(), vec![TriggerKind::IdleTimer]);
    }

    #[test]
    fn test_rejected_triggers_do_not_fall_back_to_page_load() {
        let typo = TriggerSet::from_rules("c", &rules(json!({"exit_intnet": {"sensitivity": "high"}})));
        assert!(typo.is_empty());

        let malformed = TriggerSet::from_rules("c", &rules(json!({"time_delay": {"seconds": "soon"}})));
        assert!(malformed.is_empty());

        let both = TriggerSet::from_rules(
            "c",
            &rules(json!({"moon_phase": true, "idle_timer": {"idle_duration": "long"}})),
        );
        assert!(both.is_empty());
    }

    #[test]
    fn test_disabled_known_kind_still_gets_default_page_load() {
        let set = TriggerSet::from_rules("c", &rules(json!({"exit_intent": false})));
        assert_eq!(set.kinds(), vec![TriggerKind::PageLoad]);
    }

    #[test]
    fn test_scroll_aliases_collapse() {
        let set = TriggerSet::from_rules(
            "c",
            &rules(json!({
                "scroll_depth": {"percentage": 40},
                "scroll_percentage": {"percentage": 70}
            })),
        );
        assert_eq!(set.kinds(), vec![TriggerKind::ScrollDepth]);
    }

    #[test]
    fn test_disabled_section_yields_empty_set() {
        let mut triggers = rules(json!({"time_delay": {"seconds": 1}}));
        triggers.enabled = false;
        assert!(TriggerSet::from_rules("c", &triggers).is_empty());
    }

    #[test]
    fn test_bool_shorthand() {
        let set = TriggerSet::from_rules("c", &rules(json!({"exit_intent": true})));
        assert_eq!(
            set.specs,
            vec![TriggerSpec::ExitIntent(ExitIntentTrigger {
                sensitivity: Sensitivity::Medium
            })]
        );
    }
}
