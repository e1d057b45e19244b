//! Targeting filter: narrows the campaign feed to the campaigns this
//! visitor can ever qualify for on this page, before any watcher is armed.
//!
//! Campaigns that are not active are dropped first. Sections are then
//! checked in a fixed order and the first failure excludes the campaign:
//! page, device, geo, audience. A missing section is unrestricted.

use popup_core::types::{
    AudienceTargeting, Campaign, DeviceTargeting, GeoMode, GeoTargeting, PageTargeting, UrlMatch,
    UrlRule, VisitorContext,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::conditions::evaluate_rule_set;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    Inactive,
    PageNotIncluded,
    PageExcluded,
    PageType,
    Collection,
    ProductTag,
    Device,
    Geo,
    Audience,
    Segment,
    TriggersDisabled,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::Inactive => "inactive",
            ExclusionReason::PageNotIncluded => "page_not_included",
            ExclusionReason::PageExcluded => "page_excluded",
            ExclusionReason::PageType => "page_type",
            ExclusionReason::Collection => "collection",
            ExclusionReason::ProductTag => "product_tag",
            ExclusionReason::Device => "device",
            ExclusionReason::Geo => "geo",
            ExclusionReason::Audience => "audience",
            ExclusionReason::Segment => "segment",
            ExclusionReason::TriggersDisabled => "triggers_disabled",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub eligible: Vec<Campaign>,
    pub excluded: Vec<(String, ExclusionReason)>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetingFilter;

impl TargetingFilter {
    pub fn new() -> Self {
        Self
    }

    /// Split `campaigns` into eligible and excluded for this context.
    pub fn filter(&self, campaigns: Vec<Campaign>, context: &VisitorContext) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for campaign in campaigns {
            match self.check(&campaign, context) {
                Ok(()) => outcome.eligible.push(campaign),
                Err(reason) => {
                    debug!(campaign_id = %campaign.id, reason = reason.as_str(), "campaign excluded by targeting");
                    metrics::counter!("popup_campaigns_filtered_total", "reason" => reason.as_str())
                        .increment(1);
                    outcome.excluded.push((campaign.id, reason));
                }
            }
        }
        info!(
            eligible = outcome.eligible.len(),
            excluded = outcome.excluded.len(),
            "targeting filter pass complete"
        );
        outcome
    }

    /// Check one campaign. `Err` carries the first failing section.
    pub fn check(&self, campaign: &Campaign, context: &VisitorContext) -> Result<(), ExclusionReason> {
        if !campaign.is_active() {
            return Err(ExclusionReason::Inactive);
        }
        let rules = &campaign.target_rules;
        if let Some(page) = &rules.page_targeting {
            check_page(page, context)?;
        }
        if let Some(device) = &rules.device_targeting {
            check_device(device, context)?;
        }
        if let Some(geo) = &rules.geo_targeting {
            check_geo(geo, context)?;
        }
        if let Some(audience) = &rules.audience_targeting {
            check_audience(audience, context)?;
        }
        if !rules.enhanced_triggers.enabled {
            return Err(ExclusionReason::TriggersDisabled);
        }
        Ok(())
    }
}

fn check_page(page: &PageTargeting, context: &VisitorContext) -> Result<(), ExclusionReason> {
    let path = page_path(&context.page_url);

    if !page.include.is_empty() && !page.include.iter().any(|r| url_matches(r, &path)) {
        return Err(ExclusionReason::PageNotIncluded);
    }
    if page.exclude.iter().any(|r| url_matches(r, &path)) {
        return Err(ExclusionReason::PageExcluded);
    }
    if !page.page_types.is_empty() && !page.page_types.contains(&context.page_type) {
        return Err(ExclusionReason::PageType);
    }
    if !page.collection_handles.is_empty()
        && !intersects(&page.collection_handles, &context.collection_handles)
    {
        return Err(ExclusionReason::Collection);
    }
    if !page.product_tags.is_empty() && !intersects(&page.product_tags, &context.product_tags) {
        return Err(ExclusionReason::ProductTag);
    }
    Ok(())
}

fn check_device(device: &DeviceTargeting, context: &VisitorContext) -> Result<(), ExclusionReason> {
    if device.devices.is_empty() || device.devices.contains(&context.device) {
        Ok(())
    } else {
        Err(ExclusionReason::Device)
    }
}

fn check_geo(geo: &GeoTargeting, context: &VisitorContext) -> Result<(), ExclusionReason> {
    if geo.countries.is_empty() {
        return Ok(());
    }
    let listed = context
        .country
        .as_deref()
        .is_some_and(|c| geo.countries.iter().any(|g| g.eq_ignore_ascii_case(c)));
    let allowed = match geo.mode {
        GeoMode::Include => listed,
        GeoMode::Exclude => !listed,
    };
    if allowed {
        Ok(())
    } else {
        Err(ExclusionReason::Geo)
    }
}

fn check_audience(
    audience: &AudienceTargeting,
    context: &VisitorContext,
) -> Result<(), ExclusionReason> {
    if let Some(rules) = &audience.session_rules {
        if !evaluate_rule_set(rules, context) {
            return Err(ExclusionReason::Audience);
        }
    }
    if !audience.segment_ids.is_empty() && !intersects(&audience.segment_ids, &context.segment_ids)
    {
        return Err(ExclusionReason::Segment);
    }
    Ok(())
}

fn intersects(wanted: &[String], have: &[String]) -> bool {
    wanted
        .iter()
        .any(|w| have.iter().any(|h| h.eq_ignore_ascii_case(w)))
}

/// Path component of the page URL. Relative URLs are used as-is minus any
/// query or fragment.
fn page_path(page_url: &str) -> String {
    match url::Url::parse(page_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => page_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

pub fn url_matches(rule: &UrlRule, path: &str) -> bool {
    let pattern = rule.pattern();
    match rule.match_type() {
        UrlMatch::Exact => normalize(pattern) == normalize(path),
        UrlMatch::Contains => path.contains(pattern),
        UrlMatch::StartsWith => path.starts_with(pattern),
        UrlMatch::Wildcard => wildcard_match(pattern.as_bytes(), path.as_bytes()),
    }
}

/// `*` matches any run of characters, everything else matches literally.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&b| b == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use popup_core::types::{
        CampaignStatus, Condition, ConditionOperator, DeviceClass, EnhancedTriggers, LogicOperator, PageType,
        RuleSet, TargetRules,
    };
    use serde_json::json;

    fn campaign(id: &str, rules: TargetRules) -> Campaign {
        Campaign {
            id: id.into(),
            name: id.into(),
            priority: 0,
            status: Default::default(),
            goal: None,
            template_type: "banner".into(),
            target_rules: rules,
            content_config: json!({}),
            discount_config: None,
            experiment: None,
        }
    }

    fn context() -> VisitorContext {
        let mut ctx = VisitorContext::new("v-1", "s-1");
        ctx.page_url = "https://shop.example/products/blue-mug?variant=3".into();
        ctx.page_type = PageType::Product;
        ctx.country = Some("FR".into());
        ctx.collection_handles = vec!["mugs".into()];
        ctx
    }

    #[test]
    fn test_unrestricted_campaign_is_eligible() {
        let filter = TargetingFilter::new();
        assert_eq!(filter.check(&campaign("a", TargetRules::default()), &context()), Ok(()));
    }

    #[test]
    fn test_non_active_campaigns_are_excluded() {
        let filter = TargetingFilter::new();
        for status in [CampaignStatus::Draft, CampaignStatus::Paused, CampaignStatus::Archived] {
            let mut draft = campaign("d", TargetRules::default());
            draft.status = status;
            assert_eq!(filter.check(&draft, &context()), Err(ExclusionReason::Inactive));
        }
    }

    #[test]
    fn test_geo_include_excludes_other_country() {
        let rules = TargetRules {
            geo_targeting: Some(GeoTargeting {
                mode: GeoMode::Include,
                countries: vec!["US".into()],
            }),
            ..Default::default()
        };
        let outcome = TargetingFilter::new().filter(vec![campaign("us-only", rules)], &context());
        assert!(outcome.eligible.is_empty());
        assert_eq!(outcome.excluded, vec![("us-only".to_string(), ExclusionReason::Geo)]);
    }

    #[test]
    fn test_geo_exclude_and_unknown_country() {
        let exclude_fr = GeoTargeting {
            mode: GeoMode::Exclude,
            countries: vec!["fr".into()],
        };
        let mut ctx = context();
        assert_eq!(check_geo(&exclude_fr, &ctx), Err(ExclusionReason::Geo));
        ctx.country = None;
        assert_eq!(check_geo(&exclude_fr, &ctx), Ok(()));
        let include_us = GeoTargeting {
            mode: GeoMode::Include,
            countries: vec!["US".into()],
        };
        assert_eq!(check_geo(&include_us, &ctx), Err(ExclusionReason::Geo));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let page = PageTargeting {
            include: vec![UrlRule::Bare("/products".into())],
            exclude: vec![UrlRule::Pattern {
                pattern: "/products/blue-*".into(),
                match_type: UrlMatch::Wildcard,
            }],
            ..Default::default()
        };
        assert_eq!(check_page(&page, &context()), Err(ExclusionReason::PageExcluded));
    }

    #[test]
    fn test_include_list_and_page_filters() {
        let mut page = PageTargeting {
            include: vec![UrlRule::Pattern {
                pattern: "/collections/".into(),
                match_type: UrlMatch::StartsWith,
            }],
            ..Default::default()
        };
        assert_eq!(check_page(&page, &context()), Err(ExclusionReason::PageNotIncluded));

        page.include = vec![UrlRule::Pattern {
            pattern: "/products/blue-mug/".into(),
            match_type: UrlMatch::Exact,
        }];
        page.page_types = vec![PageType::Product];
        page.collection_handles = vec!["MUGS".into()];
        assert_eq!(check_page(&page, &context()), Ok(()));

        page.product_tags = vec!["sale".into()];
        assert_eq!(check_page(&page, &context()), Err(ExclusionReason::ProductTag));
    }

    #[test]
    fn test_device_targeting() {
        let device = DeviceTargeting {
            devices: vec![DeviceClass::Mobile, DeviceClass::Tablet],
        };
        assert_eq!(check_device(&device, &context()), Err(ExclusionReason::Device));
    }

    #[test]
    fn test_audience_rules_and_segments() {
        let audience = AudienceTargeting {
            session_rules: Some(RuleSet {
                conditions: vec![Condition {
                    field: "isReturningVisitor".into(),
                    operator: ConditionOperator::Eq,
                    value: json!(true),
                }],
                logic_operator: LogicOperator::And,
            }),
            segment_ids: vec![],
        };
        let mut ctx = context();
        assert_eq!(check_audience(&audience, &ctx), Err(ExclusionReason::Audience));
        ctx.is_returning_visitor = true;
        assert_eq!(check_audience(&audience, &ctx), Ok(()));

        let segments = AudienceTargeting {
            session_rules: None,
            segment_ids: vec!["vip".into()],
        };
        assert_eq!(check_audience(&segments, &ctx), Err(ExclusionReason::Segment));
        ctx.segment_ids = vec!["vip".into()];
        assert_eq!(check_audience(&segments, &ctx), Ok(()));
    }

    #[test]
    fn test_page_failure_short_circuits_before_geo() {
        let rules = TargetRules {
            page_targeting: Some(PageTargeting {
                include: vec![UrlRule::Bare("/cart".into())],
                ..Default::default()
            }),
            geo_targeting: Some(GeoTargeting {
                mode: GeoMode::Include,
                countries: vec!["US".into()],
            }),
            ..Default::default()
        };
        assert_eq!(
            TargetingFilter::new().check(&campaign("a", rules), &context()),
            Err(ExclusionReason::PageNotIncluded)
        );
    }

    #[test]
    fn test_disabled_triggers_are_excluded() {
        let rules = TargetRules {
            enhanced_triggers: EnhancedTriggers::disabled(),
            ..Default::default()
        };
        assert_eq!(
            TargetingFilter::new().check(&campaign("a", rules), &context()),
            Err(ExclusionReason::TriggersDisabled)
        );
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match(b"/products/*", b"/products/mug"));
        assert!(wildcard_match(b"*/mug", b"/products/mug"));
        assert!(wildcard_match(b"/a*b*c", b"/axxbyyc"));
        assert!(!wildcard_match(b"/a*b*c", b"/axxbyy"));
        assert!(wildcard_match(b"*", b""));
    }

    #[test]
    fn test_relative_page_url() {
        assert_eq!(page_path("/pages/about?ref=x"), "/pages/about");
    }
}
