//! Campaign read API boundary: request shape, response decoding, and the
//! fail-safe policy: any transport or decoding failure means "no campaigns"
//! for this page view, never a retry.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PopupResult;
use crate::types::{Campaign, DeviceClass, Experiment};

/// Parameters sent to the campaign read API once per page load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRequest {
    pub page_url: String,
    pub device: DeviceClass,
    pub country: Option<String>,
    pub visitor_id: String,
    pub session_id: String,
}

/// Undecoded HTTP response from the campaign API.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedResponse {
    pub campaigns: Vec<Campaign>,
    pub experiments: Vec<Experiment>,
}

impl FeedResponse {
    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

/// Transport to the campaign API. Implementations perform exactly one
/// request per call.
pub trait CampaignApi {
    fn fetch(&self, request: &CampaignRequest) -> PopupResult<RawResponse>;
}

/// Fetch and decode the active campaigns for this page view. Transport
/// errors collapse into an empty feed.
pub fn load_campaigns(api: &dyn CampaignApi, request: &CampaignRequest) -> FeedResponse {
    match api.fetch(request) {
        Ok(raw) => decode_feed(raw.status, &raw.body),
        Err(e) => {
            warn!(error = %e, page_url = %request.page_url, "campaign fetch failed, no campaigns this page view");
            FeedResponse::default()
        }
    }
}

/// Decode a campaign API response. Non-2xx statuses and unparsable bodies
/// yield an empty feed; individually malformed or inactive campaigns are
/// skipped.
pub fn decode_feed(status: u16, body: &[u8]) -> FeedResponse {
    if !(200..300).contains(&status) {
        warn!(status, "campaign API returned non-success status");
        return FeedResponse::default();
    }

    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "campaign API body is not valid JSON");
            return FeedResponse::default();
        }
    };

    let (raw_campaigns, raw_experiments) = match value {
        serde_json::Value::Array(items) => (items, Vec::new()),
        serde_json::Value::Object(mut obj) => {
            let campaigns = match obj.remove("campaigns") {
                Some(serde_json::Value::Array(items)) => items,
                _ => {
                    warn!("campaign API body has no campaigns array");
                    return FeedResponse::default();
                }
            };
            let experiments = match obj.remove("experiments") {
                Some(serde_json::Value::Array(items)) => items,
                _ => Vec::new(),
            };
            (campaigns, experiments)
        }
        _ => {
            warn!("campaign API body has unexpected shape");
            return FeedResponse::default();
        }
    };

    let campaigns: Vec<Campaign> = raw_campaigns
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Campaign>(raw) {
            Ok(c) if c.is_active() => Some(c),
            Ok(c) => {
                debug!(campaign_id = %c.id, status = ?c.status, "skipping inactive campaign");
                None
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed campaign");
                None
            }
        })
        .collect();

    let experiments = raw_experiments
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Experiment>(raw) {
            Ok(exp) => Some(exp),
            Err(e) => {
                warn!(error = %e, "skipping malformed experiment");
                None
            }
        })
        .collect();

    FeedResponse {
        campaigns,
        experiments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PopupError;
    use serde_json::json;

    fn request() -> CampaignRequest {
        CampaignRequest {
            page_url: "https://shop.example/products/mug".into(),
            device: DeviceClass::Desktop,
            country: Some("US".into()),
            visitor_id: "v-1".into(),
            session_id: "s-1".into(),
        }
    }

    struct FailingApi;

    impl CampaignApi for FailingApi {
        fn fetch(&self, _request: &CampaignRequest) -> PopupResult<RawResponse> {
            Err(PopupError::Transport("connection reset".into()))
        }
    }

    struct FixedApi(RawResponse);

    impl CampaignApi for FixedApi {
        fn fetch(&self, _request: &CampaignRequest) -> PopupResult<RawResponse> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_decode_skips_bad_and_inactive_campaigns() {
        let body = json!({
            "campaigns": [
                {"id": "a", "templateType": "banner"},
                {"id": "b", "templateType": "banner", "status": "draft"},
                {"id": 7},
            ],
            "experiments": [
                {"id": "exp-1", "trafficAllocation": {"A": 50, "B": 50}}
            ]
        });
        let feed = decode_feed(200, body.to_string().as_bytes());
        assert_eq!(feed.campaigns.len(), 1);
        assert_eq!(feed.campaigns[0].id, "a");
        assert_eq!(feed.experiments.len(), 1);
    }

    #[test]
    fn test_decode_accepts_bare_array() {
        let body = json!([{"id": "a", "templateType": "banner"}]);
        let feed = decode_feed(200, body.to_string().as_bytes());
        assert_eq!(feed.campaigns.len(), 1);
    }

    #[test]
    fn test_non_success_status_is_empty() {
        let body = json!([{"id": "a", "templateType": "banner"}]);
        assert!(decode_feed(503, body.to_string().as_bytes()).is_empty());
    }

    #[test]
    fn test_malformed_body_is_empty() {
        assert!(decode_feed(200, b"<html>oops</html>").is_empty());
        assert!(decode_feed(200, b"{\"campaigns\": 4}").is_empty());
    }

    #[test]
    fn test_transport_failure_is_empty() {
        assert!(load_campaigns(&FailingApi, &request()).is_empty());
    }

    #[test]
    fn test_load_campaigns_decodes() {
        let api = FixedApi(RawResponse::ok(
            json!([{"id": "a", "templateType": "banner"}]).to_string(),
        ));
        assert_eq!(load_campaigns(&api, &request()).campaigns.len(), 1);
    }
}
