use super::*;
use shared::{
    domain::{ConversationKind, UserId},
    protocol::HistoryMessage,
};

use crate::types::CurrentUser;

fn me() -> CurrentUser {
    CurrentUser {
        id: UserId::from("1"),
        name: "Me".to_string(),
        avatar: String::new(),
    }
}

fn history(conversation_id: &str, messages: Vec<HistoryMessage>) -> ChatHistoryResponse {
    ChatHistoryResponse {
        chat_info: ChatInfo {
            id: ConversationId::from(conversation_id),
            kind: ConversationKind::Private,
            name: "Bob".to_string(),
            status: "online".to_string(),
            avatar: String::new(),
        },
        messages,
    }
}

fn said(sender: &str, content: &str, timestamp: &str) -> HistoryMessage {
    HistoryMessage {
        sender_id: UserId::from(sender),
        sender_name: sender.to_string(),
        avatar: String::new(),
        content: content.to_string(),
        timestamp: timestamp.to_string(),
        is_me: sender == "1",
        client_msg_id: None,
    }
}

fn pending(conversation_id: &str, content: &str, correlation_id: &str) -> Message {
    Message::local_pending(
        ConversationId::from(conversation_id),
        &me(),
        content.to_string(),
        "09:59 AM".to_string(),
        CorrelationId::from(correlation_id),
    )
}

#[test]
fn switch_clears_list_and_marks_loading() {
    let mut view = ConversationView::new();
    let first = view.switch_to(ConversationId::from("42"));
    view.append(pending("42", "hi", "c-1"));

    let second = view.switch_to(ConversationId::from("7"));
    assert!(view.messages().is_empty());
    assert!(view.is_loading());
    assert!(view.is_active(&ConversationId::from("7")));
    assert!(second.seq() > first.seq());
}

#[test]
fn load_for_previous_conversation_is_stale() {
    let mut view = ConversationView::new();
    let first = view.switch_to(ConversationId::from("A"));
    let _second = view.switch_to(ConversationId::from("B"));

    let outcome = view.complete_load(&first, history("A", vec![said("2", "old", "10:00 AM")]));
    assert_eq!(outcome, LoadOutcome::Stale);
    assert!(view.messages().is_empty());
    assert!(view.info().is_none());
}

#[test]
fn superseded_reload_of_same_conversation_is_stale() {
    let mut view = ConversationView::new();
    let first = view.switch_to(ConversationId::from("A"));
    let second = view.begin_reload().expect("active conversation");

    assert_eq!(view.complete_load(&first, history("A", Vec::new())), LoadOutcome::Stale);
    assert!(matches!(
        view.complete_load(&second, history("A", Vec::new())),
        LoadOutcome::Applied { .. }
    ));
    assert!(!view.is_loading());
}

#[test]
fn load_replaces_list_and_sets_header() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    let outcome = view.complete_load(
        &ticket,
        history(
            "42",
            vec![said("2", "one", "10:00 AM"), said("1", "two", "10:01 AM")],
        ),
    );

    assert_eq!(outcome, LoadOutcome::Applied { settled: Vec::new() });
    let contents: Vec<_> = view.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["one", "two"]);
    assert!(view.messages()[1].is_me);
    assert_eq!(view.info().map(|info| info.name.as_str()), Some("Bob"));
}

fn loaded(conversation_id: &str, messages: Vec<HistoryMessage>) -> ConversationView {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from(conversation_id));
    view.complete_load(&ticket, history(conversation_id, messages));
    view
}

fn contents(view: &ConversationView) -> Vec<&str> {
    view.messages().iter().map(|m| m.content.as_str()).collect()
}

#[test]
fn pending_send_already_in_history_is_settled_not_duplicated() {
    let mut view = loaded("42", vec![said("2", "hey", "09:58 AM")]);
    view.append(pending("42", "hi", "c-1"));
    let ticket = view.begin_reload().expect("active conversation");

    let outcome = view.complete_load(
        &ticket,
        history(
            "42",
            vec![said("2", "hey", "09:58 AM"), said("1", "hi", "10:00 AM")],
        ),
    );

    assert_eq!(
        outcome,
        LoadOutcome::Applied {
            settled: vec![CorrelationId::from("c-1")]
        }
    );
    assert_eq!(contents(&view), ["hey", "hi"]);
    assert_eq!(view.messages()[1].origin, MessageOrigin::Confirmed);
}

#[test]
fn send_during_load_is_not_claimed_by_older_message_with_same_text() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    view.append(pending("42", "hi", "c-1"));

    let outcome = view.complete_load(&ticket, history("42", vec![said("1", "hi", "09:00 AM")]));

    assert_eq!(outcome, LoadOutcome::Applied { settled: Vec::new() });
    assert_eq!(contents(&view), ["hi", "hi"]);
    assert!(view.messages()[1].is_pending());
    assert!(view.find_local(&CorrelationId::from("c-1")).is_some());
}

#[test]
fn peer_repeat_during_load_is_kept() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    view.append(Message::from_history(
        ConversationId::from("42"),
        said("2", "ok", "10:00 AM"),
    ));

    view.complete_load(&ticket, history("42", vec![said("2", "ok", "10:00 AM")]));

    assert_eq!(contents(&view), ["ok", "ok"]);
}

#[test]
fn reload_claims_repeated_texts_in_order() {
    let mut view = loaded(
        "42",
        vec![said("2", "ok", "10:00 AM"), said("1", "ok", "10:00 AM")],
    );
    view.append(pending("42", "ok", "c-1"));
    let ticket = view.begin_reload().expect("active conversation");

    let outcome = view.complete_load(
        &ticket,
        history(
            "42",
            vec![
                said("2", "ok", "10:00 AM"),
                said("1", "ok", "10:00 AM"),
                said("2", "ok", "10:01 AM"),
            ],
        ),
    );

    // The older self-authored "ok" is already accounted for, so the pending
    // send has no row left and waits for its echo.
    assert_eq!(outcome, LoadOutcome::Applied { settled: Vec::new() });
    assert_eq!(contents(&view), ["ok", "ok", "ok", "ok"]);
    assert!(view.messages()[3].is_pending());
}

#[test]
fn history_row_with_correlation_id_settles_entry_shown_during_load() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    view.append(pending("42", "hi", "c-1"));
    let mut stored = said("1", "hi", "10:00 AM");
    stored.client_msg_id = Some(CorrelationId::from("c-1"));
    let mut other_session = said("1", "from phone", "10:01 AM");
    other_session.client_msg_id = Some(CorrelationId::from("p-7"));

    let outcome = view.complete_load(&ticket, history("42", vec![stored, other_session]));

    assert_eq!(
        outcome,
        LoadOutcome::Applied {
            settled: vec![CorrelationId::from("c-1"), CorrelationId::from("p-7")]
        }
    );
    assert_eq!(contents(&view), ["hi", "from phone"]);
}

#[test]
fn unmatched_local_entries_survive_the_load() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    view.append(pending("42", "still sending", "c-1"));
    let mut failed = pending("42", "lost", "c-2");
    failed.origin = MessageOrigin::Failed;
    view.append(failed);

    view.complete_load(&ticket, history("42", vec![said("2", "earlier", "09:00 AM")]));

    let origins: Vec<_> = view.messages().iter().map(|m| m.origin).collect();
    assert_eq!(
        origins,
        [
            MessageOrigin::Confirmed,
            MessageOrigin::LocalPending,
            MessageOrigin::Failed
        ]
    );
}

#[test]
fn failed_entry_is_kept_even_when_history_has_same_text() {
    let mut view = ConversationView::new();
    let ticket = view.switch_to(ConversationId::from("42"));
    let mut failed = pending("42", "ok", "c-9");
    failed.origin = MessageOrigin::Failed;
    view.append(failed);

    let outcome = view.complete_load(&ticket, history("42", vec![said("1", "ok", "08:00 AM")]));

    assert_eq!(outcome, LoadOutcome::Applied { settled: Vec::new() });
    assert_eq!(view.messages().len(), 2);
    assert!(view.messages()[1].is_failed());
}

#[test]
fn identical_pending_texts_claim_distinct_history_rows() {
    let mut view = loaded("42", Vec::new());
    view.append(pending("42", "ping", "c-1"));
    view.append(pending("42", "ping", "c-2"));
    let ticket = view.begin_reload().expect("active conversation");

    let outcome = view.complete_load(&ticket, history("42", vec![said("1", "ping", "10:00 AM")]));

    assert_eq!(
        outcome,
        LoadOutcome::Applied {
            settled: vec![CorrelationId::from("c-1")]
        }
    );
    assert_eq!(view.messages().len(), 2);
    assert!(view.messages()[1].is_pending());
}

#[test]
fn remove_local_only_touches_matching_entry() {
    let mut view = ConversationView::new();
    view.switch_to(ConversationId::from("42"));
    view.append(pending("42", "a", "c-1"));
    view.append(pending("42", "b", "c-2"));

    let removed = view.remove_local(&CorrelationId::from("c-1")).expect("present");
    assert_eq!(removed.content, "a");
    assert!(view.find_local(&CorrelationId::from("c-1")).is_none());
    assert_eq!(view.messages().len(), 1);
}

#[test]
fn snapshot_is_none_until_a_conversation_is_active() {
    let mut view = ConversationView::new();
    assert!(view.snapshot().is_none());

    view.switch_to(ConversationId::from("42"));
    let snapshot = view.snapshot().expect("snapshot");
    assert_eq!(snapshot.conversation_id.as_str(), "42");
    assert!(snapshot.loading);
}

#[test]
fn abandon_clears_loading_only_for_current_ticket() {
    let mut view = ConversationView::new();
    let first = view.switch_to(ConversationId::from("A"));
    let second = view.switch_to(ConversationId::from("B"));

    assert!(!view.abandon_load(&first));
    assert!(view.is_loading());
    assert!(view.abandon_load(&second));
    assert!(!view.is_loading());
    assert_eq!(view.complete_load(&second, history("B", Vec::new())), LoadOutcome::Stale);
}
