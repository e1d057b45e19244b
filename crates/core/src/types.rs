use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Device class reported by the storefront runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Tablet,
    Mobile,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Mobile => "mobile",
        }
    }
}

/// Storefront page template the visitor is currently on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Home,
    Collection,
    Product,
    Cart,
    Search,
    Blog,
    #[default]
    #[serde(other)]
    Other,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Home => "home",
            PageType::Collection => "collection",
            PageType::Product => "product",
            PageType::Cart => "cart",
            PageType::Search => "search",
            PageType::Blog => "blog",
            PageType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CartSnapshot {
    pub total_value: f64,
    pub item_ids: Vec<String>,
}

impl CartSnapshot {
    pub fn item_count(&self) -> usize {
        self.item_ids.len()
    }
}

/// Everything the targeting core knows about the visitor on this page load.
/// Rebuilt on every navigation; only frequency-cap counters and the visitor
/// identity outlive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorContext {
    #[serde(default)]
    pub visitor_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub device: DeviceClass,
    /// ISO 3166-1 alpha-2, taken from the edge geo header.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub page_type: PageType,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub collection_handles: Vec<String>,
    #[serde(default)]
    pub product_tags: Vec<String>,
    #[serde(default)]
    pub cart: CartSnapshot,
    #[serde(default)]
    pub is_returning_visitor: bool,
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub session_page_views: u32,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub segment_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    pub page_loaded_at: DateTime<Utc>,
}

impl VisitorContext {
    pub fn new(visitor_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            session_id: session_id.into(),
            device: DeviceClass::default(),
            country: None,
            page_type: PageType::default(),
            page_url: String::new(),
            product_id: None,
            collection_handles: Vec::new(),
            product_tags: Vec::new(),
            cart: CartSnapshot::default(),
            is_returning_visitor: false,
            is_logged_in: false,
            session_page_views: 0,
            referrer: None,
            utm_source: None,
            segment_ids: Vec::new(),
            page_loaded_at: Utc::now(),
        }
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Active,
    Draft,
    Paused,
    #[serde(other)]
    Archived,
}

/// A popup campaign as served by the campaign read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Higher wins.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub goal: Option<String>,
    pub template_type: String,
    #[serde(default)]
    pub target_rules: TargetRules,
    /// Template-specific and opaque to targeting.
    #[serde(default)]
    pub content_config: serde_json::Value,
    #[serde(default)]
    pub discount_config: Option<DiscountConfig>,
    #[serde(default)]
    pub experiment: Option<ExperimentMembership>,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscountConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub discount_type: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub code_prefix: Option<String>,
}

/// Marks a campaign as one variant of an A/B experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentMembership {
    pub experiment_id: String,
    pub variant_key: String,
}

/// Experiment definition: variant key → integer weight. Weights are
/// normalized, they need not sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    #[serde(default)]
    pub traffic_allocation: BTreeMap<String, u32>,
}

// ─── Target rules ───────────────────────────────────────────────────────────

/// Targeting document attached to a campaign. Every section is optional and
/// absent sections do not restrict anything. A section that fails to parse is
/// logged and dropped so one bad field cannot take the whole campaign down.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetRules {
    #[serde(default, deserialize_with = "lenient_section")]
    pub page_targeting: Option<PageTargeting>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub device_targeting: Option<DeviceTargeting>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub geo_targeting: Option<GeoTargeting>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub audience_targeting: Option<AudienceTargeting>,
    #[serde(default, deserialize_with = "lenient_triggers")]
    pub enhanced_triggers: EnhancedTriggers,
}

fn lenient_section<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match serde_json::from_value(value) {
        Ok(section) => Some(section),
        Err(e) => {
            warn!(error = %e, "malformed targeting section, treating as unrestricted");
            None
        }
    }))
}

fn lenient_triggers<'de, D>(deserializer: D) -> Result<EnhancedTriggers, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => EnhancedTriggers::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "malformed enhancedTriggers, disabling triggers");
            EnhancedTriggers::disabled()
        }),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrlMatch {
    Exact,
    #[default]
    Contains,
    StartsWith,
    Wildcard,
}

/// A URL rule, either a bare string (substring match) or a typed pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UrlRule {
    Bare(String),
    Pattern {
        pattern: String,
        #[serde(default, alias = "matchType")]
        match_type: UrlMatch,
    },
}

impl UrlRule {
    pub fn pattern(&self) -> &str {
        match self {
            UrlRule::Bare(p) => p,
            UrlRule::Pattern { pattern, .. } => pattern,
        }
    }

    pub fn match_type(&self) -> UrlMatch {
        match self {
            UrlRule::Bare(_) => UrlMatch::Contains,
            UrlRule::Pattern { match_type, .. } => *match_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PageTargeting {
    pub include: Vec<UrlRule>,
    pub exclude: Vec<UrlRule>,
    pub page_types: Vec<PageType>,
    pub collection_handles: Vec<String>,
    pub product_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceTargeting {
    pub devices: Vec<DeviceClass>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeoMode {
    #[default]
    Include,
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoTargeting {
    pub mode: GeoMode,
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    #[serde(other)]
    Unknown,
}

/// `{field, operator, value}` predicate over the visitor context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Flat rule set: every condition joined by one operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_rule_logic")]
    pub logic_operator: LogicOperator,
}

fn default_rule_logic() -> LogicOperator {
    LogicOperator::And
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            logic_operator: default_rule_logic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AudienceTargeting {
    pub session_rules: Option<RuleSet>,
    #[serde(alias = "shopifySegmentIds")]
    pub segment_ids: Vec<String>,
}

// ─── Enhanced triggers ──────────────────────────────────────────────────────

/// Raw trigger section. Trigger kinds stay as untyped JSON here and are
/// parsed into typed specs by the trigger crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedTriggers {
    #[serde(default = "default_triggers_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub frequency_capping: FrequencyCapping,
    #[serde(default)]
    pub trigger_combination: TriggerCombination,
    #[serde(flatten)]
    pub triggers: BTreeMap<String, serde_json::Value>,
}

fn default_triggers_enabled() -> bool {
    true
}

impl EnhancedTriggers {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for EnhancedTriggers {
    fn default() -> Self {
        Self {
            enabled: default_triggers_enabled(),
            frequency_capping: FrequencyCapping::default(),
            trigger_combination: TriggerCombination::default(),
            triggers: BTreeMap::new(),
        }
    }
}

/// Per-campaign impression limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FrequencyCapping {
    pub max_triggers_per_session: Option<u32>,
    pub max_triggers_per_day: Option<u32>,
    /// Seconds.
    pub cooldown_between_triggers: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TriggerCombination {
    pub operator: Option<LogicOperator>,
}
