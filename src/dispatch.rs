//! Event dispatcher and per-conversation dedup log.
//!
//! Live push and catch-up fetches funnel through the same `ingest` path, so
//! overlap between the two is inherently deduplicated: an event id is
//! materialized into a conversation at most once, no matter how often or in
//! which order the network delivers it. Consumers are notified in insertion
//! order (the order events entered the local log), not server-id order.

use crate::api::Api;
use crate::error::ClientError;
use crate::protocol::ChatFrame;
use crate::types::ConversationId;
use crate::types::events::{ConversationUpdate, EventBus};
use crate::types::message::{ChatEvent, EventBody};
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// One materialized entry. Tombstoning mutates the rendered representation
/// but never removes the entry from the log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub event: ChatEvent,
    pub tombstoned: bool,
}

#[derive(Default)]
struct ConversationLog {
    seen: HashSet<i64>,
    entries: Vec<LogEntry>,
    /// Deletions that arrived before the event they reference. The buffer is
    /// dropped when the conversation's next catch-up cycle completes.
    pending_deletes: HashSet<i64>,
}

pub struct Dispatcher {
    api: Arc<Api>,
    bus: Arc<EventBus>,
    logs: DashMap<ConversationId, ConversationLog>,
    active: RwLock<Option<ConversationId>>,
}

impl Dispatcher {
    pub fn new(api: Arc<Api>, bus: Arc<EventBus>) -> Self {
        Self {
            api,
            bus,
            logs: DashMap::new(),
            active: RwLock::new(None),
        }
    }

    /// The conversation currently open in the client, if any. Owned here as
    /// an explicit field; reconnect decisions query it by value.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        *self.active.read().expect("active lock poisoned")
    }

    pub fn set_active_conversation(&self, conversation: Option<ConversationId>) {
        *self.active.write().expect("active lock poisoned") = conversation;
    }

    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.active_conversation().as_ref() == Some(conversation)
    }

    /// Merge one event into the conversation log. Returns `true` if the
    /// event was materialized, `false` if its id had already been seen.
    ///
    /// Catch-up and live delivery for the same conversation serialize on the
    /// log entry, so the at-most-once invariant holds under any
    /// interleaving.
    pub fn ingest(&self, event: ChatEvent) -> bool {
        let conversation = event.conversation;
        let mut log = self.logs.entry(conversation).or_default();

        if !log.seen.insert(event.id) {
            debug!(target: "Dispatcher", "Duplicate event {} in {conversation}, skipping", event.id);
            return false;
        }

        // A deletion may have raced ahead of its event; apply it in the same
        // ingest pass.
        let buffered_delete = log.pending_deletes.remove(&event.id);
        let tombstoned = buffered_delete || event.body == EventBody::Tombstone;

        log.entries.push(LogEntry {
            event: event.clone(),
            tombstoned,
        });

        let _ = self
            .bus
            .conversation
            .send(Arc::new(ConversationUpdate::Message(event.clone())));
        if buffered_delete {
            let _ = self
                .bus
                .conversation
                .send(Arc::new(ConversationUpdate::Deletion {
                    conversation,
                    event_id: event.id,
                }));
        }
        true
    }

    /// Apply a deletion directive that names its conversation. If the
    /// referenced event is not materialized yet, the deletion is buffered
    /// until the current catch-up window closes.
    pub fn apply_deletion(&self, conversation: ConversationId, event_id: i64) {
        let mut log = self.logs.entry(conversation).or_default();

        if !log.seen.contains(&event_id) {
            debug!(target: "Dispatcher", "Deletion for unmaterialized event {event_id} in {conversation}, buffering");
            log.pending_deletes.insert(event_id);
            return;
        }

        let entry = log
            .entries
            .iter_mut()
            .find(|e| e.event.id == event_id && !e.tombstoned);
        if let Some(entry) = entry {
            entry.tombstoned = true;
            let _ = self
                .bus
                .conversation
                .send(Arc::new(ConversationUpdate::Deletion {
                    conversation,
                    event_id,
                }));
        }
    }

    /// Apply a deletion that arrived without conversation context (global
    /// channel). Tombstones the event wherever it was materialized; unknown
    /// ids are dropped, since there is no conversation to buffer them under.
    pub fn apply_deletion_anywhere(&self, event_id: i64) {
        let mut found = None;
        for log in self.logs.iter() {
            if log.value().seen.contains(&event_id) {
                found = Some(*log.key());
                break;
            }
        }
        match found {
            Some(conversation) => self.apply_deletion(conversation, event_id),
            None => {
                debug!(target: "Dispatcher", "Deletion for unknown event {event_id}, dropping")
            }
        }
    }

    /// Fetch the recent history window for a conversation and merge it
    /// through `ingest`. Invoked on initial open and after every reconnect,
    /// before live delivery resumes. Returns how many events were newly
    /// materialized.
    pub async fn catch_up(&self, conversation: ConversationId) -> Result<usize, ClientError> {
        let events = self.api.fetch_history(conversation).await?;
        let mut materialized = 0;
        for event in events {
            if self.ingest(event) {
                materialized += 1;
            }
        }

        // The catch-up window closes here: deletions still waiting for an
        // event that this fetch did not return are dropped.
        if let Some(mut log) = self.logs.get_mut(&conversation) {
            let dropped = log.pending_deletes.len();
            if dropped > 0 {
                warn!(target: "Dispatcher", "Dropping {dropped} orphaned deletions for {conversation}");
                log.pending_deletes.clear();
            }
        }

        debug!(target: "Dispatcher", "Catch-up for {conversation}: {materialized} new events");
        Ok(materialized)
    }

    /// Route one classified conversation frame.
    pub fn handle_chat_frame(&self, conversation: ConversationId, frame: ChatFrame) {
        match frame {
            ChatFrame::Message(event) => {
                self.ingest(event);
            }
            ChatFrame::Deleted { msg_id } => self.apply_deletion(conversation, msg_id),
            ChatFrame::Ping | ChatFrame::Pong => {}
            ChatFrame::ServerError { detail } => {
                warn!(target: "Dispatcher", "Server error on {conversation}: {detail}")
            }
        }
    }

    /// Snapshot of the materialized log for a conversation, in insertion
    /// order.
    pub fn entries(&self, conversation: &ConversationId) -> Vec<LogEntry> {
        self.logs
            .get(conversation)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    /// Ids materialized for a conversation.
    pub fn materialized_ids(&self, conversation: &ConversationId) -> HashSet<i64> {
        self.logs
            .get(conversation)
            .map(|log| log.seen.clone())
            .unwrap_or_default()
    }
}
