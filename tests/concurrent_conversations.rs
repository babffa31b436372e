mod common;

use common::*;
use futures::future::join_all;
use hestia::backend::ScriptedBackend;
use hestia::config::HestiaConfig;
use hestia::dispatcher::TurnRequest;
use hestia::service::Service;
use std::collections::HashSet;
use std::sync::Arc;

const ANSWER: &str = r#"{"action": "answer", "answer": "It is sunny."}"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_conversations_do_not_interfere() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("answer"),
        ScriptedBackend::always(ANSWER),
    );
    let dispatcher = Arc::new(h.dispatcher);

    let turns = (0..16).map(|i| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            dispatcher
                .process_turn(TurnRequest::new(format!("weather report {i}")))
                .await
        }
    });
    let responses = join_all(turns).await;

    let ids: HashSet<_> = responses
        .iter()
        .map(|response| response.conversation_id.clone())
        .collect();
    assert_eq!(ids.len(), 16);
    assert_eq!(dispatcher.store().len(), 16);

    for response in &responses {
        assert_eq!(response.text(), "It is sunny.");
        let stored = dispatcher.store().peek(&response.conversation_id).unwrap();
        assert_eq!(stored.messages.len(), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_serialises_turns_per_conversation() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("answer"),
        ScriptedBackend::always(ANSWER),
    );
    let service = Service::new(Arc::new(h.dispatcher));

    let first = service.process_turn(TurnRequest::new("hello")).await;
    let id = first.conversation_id.clone();

    let turns = (0..8).map(|i| {
        let service = service.clone();
        let id = id.clone();
        tokio::spawn(async move {
            service
                .process_turn(TurnRequest::in_conversation(id, format!("again {i}")))
                .await
        })
    });
    for result in join_all(turns).await {
        assert_eq!(result.unwrap().conversation_id, id);
    }

    let stored = service.dispatcher().store().peek(&id).unwrap();
    assert_eq!(stored.messages.len(), 3 + 8 * 2);
}
