//! Presence and unread aggregation.
//!
//! Both snapshots are pure request/replace operations: the server is
//! authoritative, nothing is merged client-side. The one exception is
//! `mark_read`, which zeroes a conversation locally before the round-trip
//! completes so the UI does not wait on the network, and is reconciled by
//! the next refresh.

use crate::api::Api;
use crate::error::ClientError;
use crate::types::UserId;
use crate::types::events::{EventBus, PresenceSnapshot, UnreadSnapshot};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Unread counters, replaced wholesale on each fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    pub direct_total: u32,
    pub by_sender: HashMap<UserId, u32>,
    pub community_total: u32,
    pub by_community: HashMap<i64, u32>,
    pub friend_requests: u32,
}

pub struct PresenceTracker {
    api: Arc<Api>,
    bus: Arc<EventBus>,
    me: UserId,
    online: RwLock<HashSet<UserId>>,
    unread: RwLock<UnreadCounts>,
}

impl PresenceTracker {
    pub fn new(api: Arc<Api>, bus: Arc<EventBus>, me: UserId) -> Self {
        Self {
            api,
            bus,
            me,
            online: RwLock::new(HashSet::new()),
            unread: RwLock::new(UnreadCounts::default()),
        }
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.read().expect("online lock poisoned").contains(&user)
    }

    pub fn online_snapshot(&self) -> HashSet<UserId> {
        self.online.read().expect("online lock poisoned").clone()
    }

    pub fn unread_snapshot(&self) -> UnreadCounts {
        self.unread.read().expect("unread lock poisoned").clone()
    }

    /// Replace the online-user set from the server.
    pub async fn refresh_presence(&self) -> Result<(), ClientError> {
        let users = self.api.online_users().await?;
        let set: HashSet<UserId> = users.into_iter().collect();
        debug!(target: "Presence", "{} users online", set.len());
        *self.online.write().expect("online lock poisoned") = set.clone();
        let _ = self
            .bus
            .presence
            .send(Arc::new(PresenceSnapshot { online: set }));
        Ok(())
    }

    /// Replace the unread counters from the server.
    pub async fn refresh_unread(&self) -> Result<(), ClientError> {
        let wire = self.api.notifications().await?;
        let counts = UnreadCounts {
            direct_total: wire.dms.total,
            by_sender: wire
                .dms
                .by_sender
                .iter()
                .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (UserId(id), *v)))
                .collect(),
            community_total: wire.comms.total,
            by_community: wire
                .comms
                .by_comm
                .iter()
                .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (id, *v)))
                .collect(),
            friend_requests: wire.friend_reqs,
        };
        *self.unread.write().expect("unread lock poisoned") = counts.clone();
        let _ = self.bus.unread.send(Arc::new(UnreadSnapshot { counts }));
        Ok(())
    }

    /// Refresh both snapshots; used by the heartbeat sync tick. Transient
    /// failures are logged, auth failures propagate.
    pub async fn refresh_all(&self) -> Result<(), ClientError> {
        for result in [self.refresh_presence().await, self.refresh_unread().await] {
            match result {
                Ok(()) => {}
                Err(ClientError::AuthExpired) => return Err(ClientError::AuthExpired),
                Err(e) => warn!(target: "Presence", "Refresh failed: {e}"),
            }
        }
        Ok(())
    }

    /// Mark a direct conversation read: zero the local counter immediately,
    /// then tell the server. The next `refresh_unread` reconciles.
    pub async fn mark_read(&self, sender: UserId) -> Result<(), ClientError> {
        {
            let mut unread = self.unread.write().expect("unread lock poisoned");
            if let Some(count) = unread.by_sender.remove(&sender) {
                unread.direct_total = unread.direct_total.saturating_sub(count);
            }
            let counts = unread.clone();
            let _ = self.bus.unread.send(Arc::new(UnreadSnapshot { counts }));
        }
        self.api.mark_read(sender, self.me).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpClient, HttpRequest, HttpResponse};
    use crate::types::events::EventBus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingHttpClient {
        responses: Mutex<Vec<(String, String)>>,
        requests: Mutex<Vec<String>>,
    }

    impl RecordingHttpClient {
        fn respond(self, path_part: &str, body: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((path_part.to_string(), body.to_string()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for RecordingHttpClient {
        async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.url.clone());
            let responses = self.responses.lock().unwrap();
            let body = responses
                .iter()
                .find(|(part, _)| request.url.contains(part))
                .map(|(_, body)| body.clone())
                .unwrap_or_else(|| "{}".to_string());
            Ok(HttpResponse {
                status_code: 200,
                body: body.into_bytes(),
            })
        }
    }

    fn tracker(http: RecordingHttpClient) -> (PresenceTracker, Arc<RecordingHttpClient>) {
        let http = Arc::new(http);
        let api = Arc::new(Api::new(http.clone(), "https://test", "tok".to_string()));
        (
            PresenceTracker::new(api, Arc::new(EventBus::new()), UserId(1)),
            http,
        )
    }

    #[tokio::test]
    async fn test_presence_replaced_wholesale() {
        let (tracker, _) =
            tracker(RecordingHttpClient::default().respond("/users/online", "[2,3,5]"));

        tracker.refresh_presence().await.unwrap();
        assert!(tracker.is_online(UserId(2)));
        assert!(!tracker.is_online(UserId(9)));
        assert_eq!(tracker.online_snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_unread_parsed_from_notifications() {
        let (tracker, _) = tracker(RecordingHttpClient::default().respond(
            "/notifications",
            r#"{"dms":{"total":3,"by_sender":{"7":2,"9":1}},
                "comms":{"total":1,"by_comm":{"4":1}},
                "friend_reqs":2}"#,
        ));

        tracker.refresh_unread().await.unwrap();
        let counts = tracker.unread_snapshot();
        assert_eq!(counts.direct_total, 3);
        assert_eq!(counts.by_sender.get(&UserId(7)), Some(&2));
        assert_eq!(counts.by_community.get(&4), Some(&1));
        assert_eq!(counts.friend_requests, 2);
    }

    #[tokio::test]
    async fn test_mark_read_zeroes_before_round_trip() {
        let (tracker, http) = tracker(RecordingHttpClient::default().respond(
            "/notifications",
            r#"{"dms":{"total":5,"by_sender":{"7":2,"9":3}},"comms":{},"friend_reqs":0}"#,
        ));

        tracker.refresh_unread().await.unwrap();
        tracker.mark_read(UserId(7)).await.unwrap();

        // Local counter dropped immediately, independent of the server reply.
        let counts = tracker.unread_snapshot();
        assert_eq!(counts.direct_total, 3);
        assert!(!counts.by_sender.contains_key(&UserId(7)));

        let requests = http.requests.lock().unwrap();
        assert!(requests.iter().any(|u| u.contains("/inbox/read/7")));
    }
}
