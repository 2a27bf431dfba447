use std::sync::Arc;

use talkcoach::config::Config;
use talkcoach::llm::CompletionClient;
use talkcoach::protocol::{InboundPayload, Sender};
use talkcoach::state::AppState;
use talkcoach::ws::relay_chat;
use tokio::sync::broadcast::error::TryRecvError;

/// State without an API key: the completion client answers with its
/// configuration error string and never touches the network.
fn keyless_state() -> Arc<AppState> {
    let config = Config::default();
    Arc::new(AppState::new(CompletionClient::new(&config)))
}

#[tokio::test]
async fn test_relay_broadcasts_user_then_bot_turn() {
    let state = keyless_state();
    let mut rx = state.broadcast.subscribe();

    let payload: InboundPayload =
        serde_json::from_str(r#"{"text":"I go to school yesterday","mode":"practice"}"#)
            .expect("payload should parse");
    relay_chat(state.clone(), "conn-1".to_string(), payload).await;

    let user_turn = rx.recv().await.expect("user turn should be broadcast");
    assert_eq!(user_turn.from, Sender::User);
    assert_eq!(user_turn.id, "conn-1");
    assert_eq!(user_turn.text, "I go to school yesterday");

    let bot_turn = rx.recv().await.expect("bot turn should be broadcast");
    assert_eq!(bot_turn.from, Sender::Bot);
    assert_eq!(bot_turn.id, "bot");
    assert!(!bot_turn.text.is_empty());

    // Exactly two turns per inbound message
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_legacy_string_payload_relays_in_free_mode() {
    let state = keyless_state();
    let mut rx = state.broadcast.subscribe();

    let payload: InboundPayload = serde_json::from_str(r#""Hello""#).expect("payload should parse");
    relay_chat(state.clone(), "conn-2".to_string(), payload).await;

    let user_turn = rx.recv().await.expect("user turn should be broadcast");
    assert_eq!(user_turn.text, "Hello");
    assert_eq!(user_turn.id, "conn-2");

    let bot_turn = rx.recv().await.expect("bot turn should be broadcast");
    assert_eq!(bot_turn.from, Sender::Bot);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_all_subscribers_receive_both_turns() {
    let state = keyless_state();
    let mut sender_rx = state.broadcast.subscribe();
    let mut other_rx = state.broadcast.subscribe();

    let payload: InboundPayload =
        serde_json::from_str(r#"{"text":"Good morning"}"#).expect("payload should parse");
    relay_chat(state.clone(), "conn-3".to_string(), payload).await;

    // The sender's own subscription sees the echo too
    for rx in [&mut sender_rx, &mut other_rx] {
        let user_turn = rx.recv().await.expect("user turn should be broadcast");
        assert_eq!(user_turn.from, Sender::User);
        assert_eq!(user_turn.text, "Good morning");

        let bot_turn = rx.recv().await.expect("bot turn should be broadcast");
        assert_eq!(bot_turn.from, Sender::Bot);
    }
}

#[tokio::test]
async fn test_keyless_relay_reports_config_error_in_band() {
    let state = keyless_state();
    let mut rx = state.broadcast.subscribe();

    let payload: InboundPayload = serde_json::from_str(r#""Hi""#).expect("payload should parse");
    relay_chat(state.clone(), "conn-4".to_string(), payload).await;

    let _user_turn = rx.recv().await.expect("user turn should be broadcast");
    let bot_turn = rx.recv().await.expect("bot turn should be broadcast");
    assert_eq!(bot_turn.text, "AI config error (no API key)");
}

#[tokio::test]
async fn test_concurrent_relays_each_produce_a_turn_pair() {
    let state = keyless_state();
    let mut rx = state.broadcast.subscribe();

    let first: InboundPayload =
        serde_json::from_str(r#""one""#).expect("payload should parse");
    let second: InboundPayload =
        serde_json::from_str(r#"{"text":"two","mode":"practice"}"#).expect("payload should parse");

    let a = tokio::spawn(relay_chat(state.clone(), "conn-a".to_string(), first));
    let b = tokio::spawn(relay_chat(state.clone(), "conn-b".to_string(), second));
    a.await.expect("relay task should not panic");
    b.await.expect("relay task should not panic");

    let mut turns = Vec::new();
    for _ in 0..4 {
        turns.push(rx.recv().await.expect("turn should be broadcast"));
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(turns.iter().filter(|t| t.from == Sender::User).count(), 2);
    assert_eq!(turns.iter().filter(|t| t.from == Sender::Bot).count(), 2);

    // Every bot turn follows its user turn, whatever the interleaving
    // across connections: no prefix holds more bot than user turns.
    let mut users = 0;
    let mut bots = 0;
    for turn in &turns {
        match turn.from {
            Sender::User => users += 1,
            Sender::Bot => bots += 1,
        }
        assert!(bots <= users, "bot turn broadcast before its user turn");
    }
}
