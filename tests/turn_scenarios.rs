mod common;

use common::*;
use hestia::backend::ScriptedBackend;
use hestia::config::{HestiaConfig, QueryPolicy};
use hestia::conversation::{ConversationId, Role};
use hestia::dispatcher::{
    QUERY_NOT_SUPPORTED_MESSAGE, REPHRASE_MESSAGE, SET_NOT_SUPPORTED_MESSAGE, TurnRequest,
};
use hestia::error::ErrorCode;
use hestia::intent::Intent;
use hestia::payload::ScriptRef;

#[tokio::test]
async fn kitchen_light_command_dispatches_and_replies_with_comment() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always(TURN_OFF_KITCHEN_LIGHT),
    );

    let first = h
        .dispatcher
        .process_turn(TurnRequest::new("turn off kitchen light"))
        .await;
    assert_eq!(first.text(), "Kitchen light is off.");
    let before = h.dispatcher.store().peek(&first.conversation_id).unwrap();
    assert_eq!(before.messages.len(), 3);

    let second = h
        .dispatcher
        .process_turn(TurnRequest::in_conversation(
            first.conversation_id.clone(),
            "turn off kitchen light",
        ))
        .await;
    assert_eq!(second.text(), "Kitchen light is off.");

    let after = h.dispatcher.store().peek(&second.conversation_id).unwrap();
    assert_eq!(after.messages.len(), before.messages.len() + 2);
    assert_eq!(after.messages[3].role, Role::User);
    assert_eq!(after.messages[4].role, Role::Assistant);
    assert_eq!(after.messages[4].content, "Kitchen light is off.");
    assert_eq!(after.intent, Some(Intent::Command));

    let script = ScriptRef::parse("script.turn_off_kitchen_light").unwrap();
    assert_eq!(h.registry.invocations(), vec![script.clone(), script]);
}

#[tokio::test]
async fn unknown_script_is_named_in_clarification() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always(LOCK_XYZ),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("lock the xyz"))
        .await;

    assert!(response.error_code().is_none());
    assert!(response.text().contains("xyz"));
    assert!(response.text().ends_with('?'));
    assert!(h.registry.invocations().is_empty());

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    let retry = &requests[1].messages;
    let note = &retry[retry.len() - 2];
    assert_eq!(note.role, Role::System);
    assert!(note.content.contains("script.xyz"));
    assert!(note.content.contains("do not suggest it again"));
    assert_eq!(retry.last().unwrap().content, "lock the xyz");

    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    assert_eq!(stored.intent, None);
}

#[tokio::test]
async fn failed_clarification_reclassifies_next_turn() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::with_replies(["command", "answer"]),
        ScriptedBackend::with_replies([
            LOCK_XYZ,
            LOCK_XYZ,
            r#"{"action": "answer", "answer": "It is 21 degrees."}"#,
        ]),
    );

    let first = h
        .dispatcher
        .process_turn(TurnRequest::new("lock the xyz"))
        .await;
    assert!(first.text().contains("xyz"));
    assert_eq!(h.classifier.call_count(), 1);

    let second = h
        .dispatcher
        .process_turn(TurnRequest::in_conversation(
            first.conversation_id.clone(),
            "how warm is it outside?",
        ))
        .await;

    assert_eq!(second.text(), "It is 21 degrees.");
    assert_eq!(h.classifier.call_count(), 2);
    let stored = h.dispatcher.store().peek(&second.conversation_id).unwrap();
    assert_eq!(stored.intent, Some(Intent::Answer));
    assert!(h.registry.invocations().is_empty());
}

#[tokio::test]
async fn missing_comment_asks_for_rephrase() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always(r#"{"action": "command", "script_id": "script.lock_front_door"}"#),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("lock the front door"))
        .await;

    assert_eq!(response.text(), REPHRASE_MESSAGE);
    assert_eq!(h.backend.call_count(), 2);
    assert!(h.registry.invocations().is_empty());
}

#[tokio::test]
async fn clarification_retry_can_recover() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::with_replies([LOCK_XYZ, LOCK_FRONT_DOOR]),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("lock the xyz"))
        .await;

    assert_eq!(response.text(), "Front door locked.");
    assert_eq!(
        h.registry.invocations(),
        vec![ScriptRef::parse("script.lock_front_door").unwrap()]
    );

    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    let roles: Vec<Role> = stored.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::System,
            Role::User,
            Role::Assistant
        ]
    );
    assert_eq!(stored.messages[2].content, LOCK_XYZ);
}

#[tokio::test]
async fn query_never_dispatches() {
    for policy in [QueryPolicy::NotSupported, QueryPolicy::Summarize] {
        let mut config = HestiaConfig::default();
        config.policy.query = policy;
        let h = harness(
            &config,
            ScriptedBackend::always("query"),
            ScriptedBackend::always(QUERY_KITCHEN_LIGHT),
        );

        let response = h
            .dispatcher
            .process_turn(TurnRequest::new("is the kitchen light on?"))
            .await;

        match policy {
            QueryPolicy::NotSupported => assert_eq!(response.text(), QUERY_NOT_SUPPORTED_MESSAGE),
            QueryPolicy::Summarize => assert_eq!(response.text(), "Kitchen Light is on."),
        }
        assert!(h.registry.invocations().is_empty());
    }
}

#[tokio::test]
async fn unparseable_replies_stop_after_two_calls() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always("Sure, I can help with that!"),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("do the thing"))
        .await;

    assert_eq!(h.backend.call_count(), 2);
    assert_eq!(response.text(), REPHRASE_MESSAGE);
    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    assert_eq!(stored.intent, None);
}

#[tokio::test]
async fn set_is_gated_but_recorded() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("set"),
        ScriptedBackend::always(SET_KITCHEN_LIGHT),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("turn the kitchen light off"))
        .await;

    assert_eq!(response.text(), SET_NOT_SUPPORTED_MESSAGE);
    assert!(h.registry.invocations().is_empty());
    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    assert_eq!(stored.messages.len(), 3);
    assert_eq!(stored.messages[2].content, SET_NOT_SUPPORTED_MESSAGE);
}

#[tokio::test]
async fn unknown_intent_resets_and_reclassifies() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::with_replies(["banana", "command"]),
        ScriptedBackend::always(TURN_OFF_KITCHEN_LIGHT),
    );

    let first = h.dispatcher.process_turn(TurnRequest::new("flibber")).await;
    assert_eq!(first.text(), REPHRASE_MESSAGE);
    assert_eq!(h.backend.call_count(), 0);
    let stored = h.dispatcher.store().peek(&first.conversation_id).unwrap();
    assert_eq!(stored.intent, None);
    assert_eq!(stored.messages[0].role, Role::System);

    let second = h
        .dispatcher
        .process_turn(TurnRequest::in_conversation(
            first.conversation_id.clone(),
            "turn off kitchen light",
        ))
        .await;
    assert_eq!(second.text(), "Kitchen light is off.");
    assert_eq!(h.classifier.call_count(), 2);
    let stored = h.dispatcher.store().peek(&second.conversation_id).unwrap();
    assert_eq!(stored.intent, Some(Intent::Command));
    assert_eq!(stored.messages.len(), 5);
}

#[tokio::test]
async fn backend_failure_leaves_history_untouched() {
    let backend = ScriptedBackend::with_replies([TURN_OFF_KITCHEN_LIGHT]);
    backend.push_failure();
    let h = harness(&HestiaConfig::default(), ScriptedBackend::always("command"), backend);

    let first = h
        .dispatcher
        .process_turn(TurnRequest::new("turn off kitchen light"))
        .await;
    let before = h.dispatcher.store().peek(&first.conversation_id).unwrap();

    let second = h
        .dispatcher
        .process_turn(TurnRequest::in_conversation(
            first.conversation_id.clone(),
            "and again",
        ))
        .await;

    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.error_code(), Some(ErrorCode::BackendUnavailable));
    assert!(second.text().contains("trouble talking"));
    assert_eq!(
        h.dispatcher.store().peek(&first.conversation_id).unwrap(),
        before
    );
}

#[tokio::test]
async fn backend_failure_on_new_conversation_still_returns_an_id() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::failing(),
        ScriptedBackend::failing(),
    );

    let response = h.dispatcher.process_turn(TurnRequest::new("hello")).await;

    assert_eq!(response.error_code(), Some(ErrorCode::BackendUnavailable));
    assert!(!response.conversation_id.as_str().is_empty());
    assert!(h.dispatcher.store().is_empty());
}

#[tokio::test]
async fn broken_template_is_reported_verbatim() {
    let mut config = HestiaConfig::default();
    config.prompt.live_state_template = Some("{% for area in areas %}".into());
    let h = harness(
        &config,
        ScriptedBackend::always("command"),
        ScriptedBackend::always(TURN_OFF_KITCHEN_LIGHT),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("turn off kitchen light"))
        .await;

    assert_eq!(response.error_code(), Some(ErrorCode::TemplateError));
    assert!(response.text().starts_with("Sorry, I had a problem with my template:"));
    assert_eq!(h.backend.call_count(), 0);
    assert!(h.dispatcher.store().is_empty());
}

#[tokio::test]
async fn rejected_dispatch_is_recorded_for_audit() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always(TURN_OFF_KITCHEN_LIGHT),
    );
    h.registry.reject_invocations(Some("maintenance mode".into()));

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("turn off kitchen light"))
        .await;

    assert_eq!(response.error_code(), Some(ErrorCode::DispatchFailed));
    assert!(!response.text().contains("maintenance"));
    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    assert_eq!(stored.messages.last().unwrap().content, TURN_OFF_KITCHEN_LIGHT);
}

#[tokio::test]
async fn help_reply_passes_through() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("help"),
        ScriptedBackend::always(
            r#"{"action": "help", "answer": "I can run scripts like locking the front door."}"#,
        ),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("what can you do?"))
        .await;

    assert_eq!(response.text(), "I can run scripts like locking the front door.");
    assert_eq!(h.backend.call_count(), 1);
    assert!(h.registry.invocations().is_empty());

    let stored = h.dispatcher.store().peek(&response.conversation_id).unwrap();
    assert_eq!(stored.intent, Some(Intent::Help));
    assert!(stored.messages[0].content.contains(r#""action": "help""#));
    assert_eq!(stored.messages.len(), 3);
}

#[tokio::test]
async fn model_question_passes_through() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("command"),
        ScriptedBackend::always(
            r#"{"action": "clarify", "question": "Which room do you mean?"}"#,
        ),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("turn off the light"))
        .await;

    assert_eq!(response.text(), "Which room do you mean?");
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn backend_receives_conversation_id_as_user_tag() {
    let h = harness(
        &HestiaConfig::default(),
        ScriptedBackend::always("answer"),
        ScriptedBackend::always(r#"{"action": "answer", "answer": "Paris."}"#),
    );

    let response = h
        .dispatcher
        .process_turn(TurnRequest::new("capital of France?"))
        .await;

    let tag = h.backend.last_request().unwrap().user_tag;
    assert_eq!(ConversationId::from_string(tag), response.conversation_id);
}
