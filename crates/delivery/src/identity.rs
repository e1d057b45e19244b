//! Visitor identity: a stable anonymous visitor id plus a session id that
//! rotates after a period of inactivity.

use chrono::{DateTime, Duration, Utc};
use popup_core::PopupResult;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::store::{read_json, write_json, KeyValueStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    visitor_id: String,
    session_id: String,
    session_expires_at: DateTime<Utc>,
    first_seen_at: DateTime<Utc>,
    session_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorIdentity {
    pub visitor_id: String,
    pub session_id: String,
    pub session_count: u32,
    /// Session started on this page load.
    pub is_new_session: bool,
}

impl VisitorIdentity {
    /// Load the identity from the store, rotating the session when it has
    /// expired, and push the expiry `session_timeout` past `now`.
    pub fn resume(
        store: &dyn KeyValueStore,
        key_prefix: &str,
        now: DateTime<Utc>,
        session_timeout: Duration,
    ) -> PopupResult<Self> {
        let key = format!("{key_prefix}:identity");
        let stored: Option<StoredIdentity> = read_json(store, &key);

        let (record, is_new_session) = match stored {
            Some(mut record) if now < record.session_expires_at => {
                record.session_expires_at = now + session_timeout;
                (record, false)
            }
            Some(mut record) => {
                record.session_id = Uuid::new_v4().to_string();
                record.session_count += 1;
                record.session_expires_at = now + session_timeout;
                info!(visitor_id = %record.visitor_id, session_count = record.session_count, "session rotated");
                (record, true)
            }
            None => {
                let record = StoredIdentity {
                    visitor_id: Uuid::new_v4().to_string(),
                    session_id: Uuid::new_v4().to_string(),
                    session_expires_at: now + session_timeout,
                    first_seen_at: now,
                    session_count: 1,
                };
                info!(visitor_id = %record.visitor_id, "new visitor");
                (record, true)
            }
        };

        write_json(store, &key, &record)?;

        Ok(Self {
            visitor_id: record.visitor_id,
            session_id: record.session_id,
            session_count: record.session_count,
            is_new_session,
        })
    }

    /// The visitor had at least one earlier session.
    pub fn is_returning(&self) -> bool {
        self.session_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_first_visit_creates_identity() {
        let store = MemoryStore::new();
        let id = VisitorIdentity::resume(&store, "popup", t0(), Duration::minutes(30)).unwrap();
        assert!(id.is_new_session);
        assert!(!id.is_returning());
        assert!(store.get("popup:identity").is_some());
    }

    #[test]
    fn test_session_continues_within_timeout() {
        let store = MemoryStore::new();
        let first = VisitorIdentity::resume(&store, "popup", t0(), Duration::minutes(30)).unwrap();
        let later = t0() + Duration::minutes(20);
        let second = VisitorIdentity::resume(&store, "popup", later, Duration::minutes(30)).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert!(!second.is_new_session);

        // Expiry slid forward on the previous resume.
        let third = VisitorIdentity::resume(
            &store,
            "popup",
            later + Duration::minutes(25),
            Duration::minutes(30),
        )
        .unwrap();
        assert_eq!(first.session_id, third.session_id);
    }

    #[test]
    fn test_session_rotates_after_timeout() {
        let store = MemoryStore::new();
        let first = VisitorIdentity::resume(&store, "popup", t0(), Duration::minutes(30)).unwrap();
        let second = VisitorIdentity::resume(
            &store,
            "popup",
            t0() + Duration::minutes(31),
            Duration::minutes(30),
        )
        .unwrap();
        assert_eq!(first.visitor_id, second.visitor_id);
        assert_ne!(first.session_id, second.session_id);
        assert!(second.is_new_session);
        assert!(second.is_returning());
    }
}
