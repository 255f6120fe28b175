//! The materialized log for a conversation must come out identical for any
//! interleaving of catch-up and live delivery covering the same event set.

use async_trait::async_trait;
use forglory_client::api::Api;
use forglory_client::dispatch::Dispatcher;
use forglory_client::http::{HttpClient, HttpRequest, HttpResponse};
use forglory_client::types::events::{ConversationUpdate, EventBus};
use forglory_client::types::message::{ChatEvent, EventBody};
use forglory_client::types::{ConversationId, UserId};
use std::collections::HashSet;
use std::sync::Arc;

const HISTORY: &str = r#"[
    {"id":41,"user_id":3,"content":"first","timestamp":"2025-06-01T10:00:00+00:00"},
    {"id":42,"user_id":3,"content":"second","timestamp":"2025-06-01T10:00:10+00:00"},
    {"id":43,"user_id":3,"content":"third","timestamp":"2025-06-01T10:00:20+00:00"}
]"#;

#[derive(Debug)]
struct HistoryServer;

#[async_trait]
impl HttpClient for HistoryServer {
    async fn execute(&self, _request: HttpRequest) -> anyhow::Result<HttpResponse> {
        Ok(HttpResponse {
            status_code: 200,
            body: HISTORY.as_bytes().to_vec(),
        })
    }
}

fn fresh_dispatcher() -> (Dispatcher, Arc<EventBus>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = Arc::new(EventBus::new());
    let api = Arc::new(Api::new(
        Arc::new(HistoryServer),
        "https://test",
        "tok".to_string(),
    ));
    (Dispatcher::new(api, bus.clone()), bus)
}

fn live(conversation: ConversationId, id: i64) -> ChatEvent {
    ChatEvent {
        id,
        sender: UserId(3),
        conversation,
        body: EventBody::Text(format!("live {id}")),
        timestamp: None,
    }
}

fn fanned_out_ids(
    rx: &mut tokio::sync::broadcast::Receiver<Arc<ConversationUpdate>>,
) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if let ConversationUpdate::Message(event) = &*update {
            ids.push(event.id);
        }
    }
    ids
}

#[tokio::test]
async fn test_all_interleavings_converge() {
    let conversation = ConversationId::Direct(UserId(3));
    let expected: HashSet<i64> = HashSet::from([41, 42, 43]);

    // Each step is either a live push of one id or the full catch-up fetch.
    type Step = Option<i64>; // None = catch-up
    let interleavings: Vec<Vec<Step>> = vec![
        vec![None, Some(42)],
        vec![Some(42), None],
        vec![Some(42), Some(43), None],
        vec![Some(43), None, Some(42)],
        vec![None, Some(41), Some(42), Some(43)],
    ];

    for steps in interleavings {
        let (dispatcher, bus) = fresh_dispatcher();
        let mut rx = bus.conversation.subscribe();

        for step in &steps {
            match step {
                Some(id) => {
                    dispatcher.ingest(live(conversation, *id));
                }
                None => {
                    dispatcher.catch_up(conversation).await.unwrap();
                }
            }
        }

        let materialized = dispatcher.materialized_ids(&conversation);
        assert_eq!(
            materialized, expected,
            "interleaving {steps:?} diverged from the expected set"
        );

        // One fan-out per materialized event, no matter how many times the
        // network delivered it.
        let ids = fanned_out_ids(&mut rx);
        let unique: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len(), "duplicate fan-out in {steps:?}");
        assert_eq!(unique, expected);
    }
}

#[tokio::test]
async fn test_deletion_racing_catch_up() {
    let conversation = ConversationId::Direct(UserId(3));
    let (dispatcher, bus) = fresh_dispatcher();
    let mut rx = bus.conversation.subscribe();

    // The deletion outruns its event over the live path; the event then
    // arrives through catch-up in the same cycle.
    dispatcher.apply_deletion(conversation, 42);
    dispatcher.catch_up(conversation).await.unwrap();

    let entries = dispatcher.entries(&conversation);
    let target = entries.iter().find(|e| e.event.id == 42).unwrap();
    assert!(target.tombstoned);

    // Consumers saw the materialization before the tombstone.
    let mut saw_message = false;
    let mut saw_deletion_after = false;
    while let Ok(update) = rx.try_recv() {
        match &*update {
            ConversationUpdate::Message(event) if event.id == 42 => saw_message = true,
            ConversationUpdate::Deletion { event_id: 42, .. } => {
                assert!(saw_message);
                saw_deletion_after = true;
            }
            _ => {}
        }
    }
    assert!(saw_deletion_after);
}
