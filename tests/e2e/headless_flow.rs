//! Headless driver loop against the mock service.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use chatwire::client::test_utils::{MockConnector, MockOpen};
use chatwire::client::{Credential, SessionState};
use chatwire::core::{names, Error};
use chatwire::headless::command::Command;
use chatwire::headless::runner::drive;

use super::harness::{client, wait_for, Service};

#[tokio::test(start_paused = true)]
async fn test_commands_reach_the_wire_and_quit_logs_out() {
    let backend = Service::new().backend();
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, backend.clone());
    client.login("alice", "secret").await.unwrap();
    wait_for(&client, SessionState::Ready).await;

    let (tx, rx) = mpsc::channel(8);
    let rooms = vec!["r1".to_string()];

    let (result, frames) = tokio::join!(drive(&client, &rooms, rx), async {
        let mut server = connector.next_server().await;
        server.push(
            names::ROOMS_LIST,
            json!({ "rooms": [{ "id": "r1", "name": "General" }] }),
        );
        tx.send(Command::Say {
            room_id: "r1".to_string(),
            text: "hello".to_string(),
        })
        .await
        .unwrap();
        tx.send(Command::Leave("r1".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let frames = server.drain_frames();
        tx.send(Command::Quit).await.unwrap();
        frames
    });

    result.unwrap();
    let sent: Vec<(&str, &Value)> = frames
        .iter()
        .filter(|f| f.event != names::UPDATE_STATUS && !f.event.starts_with("get_"))
        .map(|f| (f.event.as_str(), &f.data))
        .collect();
    assert_eq!(sent[0], (names::JOIN_ROOM, &json!("r1")));
    assert_eq!(sent[1].0, names::SEND_MESSAGE);
    assert_eq!(sent[1].1["content"], "hello");
    assert_eq!(sent[2], (names::LEAVE_ROOM, &json!("r1")));

    assert_eq!(backend.calls_to("/auth/logout"), 1);
    assert!(!client.credentials().is_signed_in());
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(client.store().rooms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_closed_command_channel_keeps_the_session_running() {
    let service = Service::new();
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, service.backend());
    client.resume(Credential::new("t1").with_refresh_token("r1"));

    let (tx, rx) = mpsc::channel::<Command>(1);
    drop(tx);

    let (result, ()) = tokio::join!(drive(&client, &[], rx), async {
        let _server = connector.next_server().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.state(), SessionState::Ready);

        service.expire_token();
        service.deny_refresh();
        assert!(client.load_rooms().await.is_err());
    });

    assert!(matches!(result, Err(Error::RefreshFailed { .. })));
    assert!(!client.credentials().is_signed_in());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnects_end_the_run_with_an_error() {
    let connector = MockConnector::new().auto_authenticate();
    connector.script(
        std::iter::once(MockOpen::Accept)
            .chain(std::iter::repeat(MockOpen::Fail("refused".into())).take(5)),
    );
    let client = client(&connector, Service::new().backend());
    client.resume(Credential::new("t1"));

    let (_tx, rx) = mpsc::channel::<Command>(1);
    let (result, ()) = tokio::join!(drive(&client, &[], rx), async {
        let first = connector.next_server().await;
        wait_for(&client, SessionState::Ready).await;
        drop(first);
    });

    match result {
        Err(Error::Transport { message }) => assert_eq!(message, "Transport error: refused"),
        other => panic!("expected transport failure, got {other:?}"),
    }
    assert_eq!(connector.opens(), 6);
}
