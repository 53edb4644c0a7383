//! Session lifecycle through the full client: sync, reconnect, teardown.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use chatwire::app::ChatStore;
use chatwire::client::test_utils::{MockConnector, MockOpen};
use chatwire::client::SessionState;
use chatwire::core::names;

use super::harness::{client, wait_for, Service};

fn message(id: &str, room_id: &str, content: &str) -> Value {
    json!({
        "id": id,
        "roomId": room_id,
        "senderId": "u2",
        "content": content,
        "timestamp": "2024-05-01T12:00:00Z"
    })
}

#[tokio::test(start_paused = true)]
async fn test_store_follows_the_session_across_a_reconnect() {
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, Service::new().backend());

    client.login("alice", "secret").await.unwrap();
    let mut first = connector.next_server().await;
    wait_for(&client, SessionState::Ready).await;

    client.join_room("r1");
    client.join_room("r2");
    client.leave_room("r2");
    first.push(names::NEW_MESSAGE, message("m1", "r1", "before"));
    first.push(names::TYPING_START, json!({ "roomId": "r1", "userId": "u2" }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.store().messages("r1").len(), 1);
    assert!(client.store().typing("r1").contains("u2"));
    first.drain_frames();

    first.close("server restart");
    wait_for(&client, SessionState::Reconnecting).await;

    let mut second = connector.next_server().await;
    wait_for(&client, SessionState::Ready).await;
    let joins: Vec<Value> = second
        .drain_frames()
        .into_iter()
        .filter(|f| f.event == names::JOIN_ROOM)
        .map(|f| f.data)
        .collect();
    assert_eq!(joins, vec![json!("r1")]);

    second.push(names::NEW_MESSAGE, message("m2", "r1", "after"));
    second.push(names::TYPING_STOP, json!({ "roomId": "r1", "userId": "u2" }));
    second.push(
        names::MESSAGE_EDITED,
        json!({ "messageId": "m1", "roomId": "r1", "content": "before (edited)" }),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    let contents: Vec<String> = client
        .store()
        .messages("r1")
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["before (edited)", "after"]);
    assert!(client.store().typing("r1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_ends_in_failed() {
    let connector = MockConnector::new().auto_authenticate();
    connector.script([
        MockOpen::Accept,
        MockOpen::Fail("refused".into()),
        MockOpen::Fail("refused".into()),
        MockOpen::Fail("refused".into()),
        MockOpen::Fail("refused".into()),
        MockOpen::Fail("refused".into()),
    ]);
    let client = client(&connector, Service::new().backend());

    client.login("alice", "secret").await.unwrap();
    let first = connector.next_server().await;
    wait_for(&client, SessionState::Ready).await;

    let mut states = client.watch_state();
    let started = Instant::now();
    drop(first);

    // When each numbered backoff wait begins, and when the session gives up.
    let mut waits = Vec::new();
    let gave_up = loop {
        states.changed().await.unwrap();
        let snapshot = states.borrow_and_update().clone();
        match snapshot.state {
            SessionState::Reconnecting => waits.push((snapshot.attempt, started.elapsed())),
            SessionState::Failed => break started.elapsed(),
            _ => {}
        }
    };

    let numbers: Vec<u32> = waits.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    // Cumulative delays of 1, 2, 4, 8 and 10 seconds.
    let expected = [0, 1, 3, 7, 15];
    for ((_, elapsed), secs) in waits.iter().zip(expected) {
        assert!(
            *elapsed >= Duration::from_secs(secs),
            "wait began after {elapsed:?}, expected at least {secs}s"
        );
    }
    assert!(gave_up >= Duration::from_secs(25));
    assert_eq!(connector.opens(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_with_pending_typing_timer_is_silent() {
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, Service::new().backend());

    client.login("alice", "secret").await.unwrap();
    let mut server = connector.next_server().await;
    wait_for(&client, SessionState::Ready).await;

    client.join_room("r1");
    client.typing("r1");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let frames = server.drain_frames();
    assert!(frames.iter().any(|f| f.event == names::TYPING_START));

    client.disconnect();
    let revision = client.store().revision();

    server.push(names::NEW_MESSAGE, message("m1", "r1", "late"));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(server.drain_frames().is_empty());
    assert_eq!(client.store().revision(), revision);
    assert!(client.store().messages("r1").is_empty());
    assert_eq!(client.state(), SessionState::Disconnected);
    assert_eq!(connector.opens(), 1);
}
