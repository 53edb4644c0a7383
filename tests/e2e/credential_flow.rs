//! Expired credentials: single-flight refresh, replay, and revocation.

use std::time::Duration;

use chatwire::client::SessionState;
use chatwire::core::Error;

use super::harness::{client, wait_for, Service};
use chatwire::client::test_utils::MockConnector;

#[tokio::test(start_paused = true)]
async fn test_concurrent_rejections_share_one_refresh() {
    let service = Service::new();
    let backend = service.backend();
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, backend.clone());

    client.login("alice", "secret").await.unwrap();
    let first = connector.next_server().await;
    assert_eq!(first.token, "t1");
    wait_for(&client, SessionState::Ready).await;

    service.expire_token();

    let gateway = client.gateway();
    let (rooms, a, b) = tokio::join!(
        client.load_rooms(),
        gateway.get("/chat/search"),
        gateway.get("/user/settings"),
    );

    assert_eq!(rooms.unwrap().len(), 1);
    assert_eq!(a.unwrap()["path"], "/chat/search");
    assert_eq!(b.unwrap()["path"], "/user/settings");
    assert_eq!(backend.calls_to("/auth/refresh"), 1);
    assert_eq!(client.credentials().access_token().as_deref(), Some("t2"));

    // Every replay carried the refreshed token.
    let replays: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| c.request.retried && !c.request.path.starts_with("/auth/"))
        .collect();
    assert_eq!(replays.len(), 3);
    assert!(replays.iter().all(|c| c.bearer.as_deref() == Some("t2")));

    // The session picks the refreshed token up on its next connection.
    drop(first);
    let second = connector.next_server().await;
    assert_eq!(second.token, "t2");
    wait_for(&client, SessionState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn test_revoked_refresh_signs_everything_out() {
    let service = Service::new();
    let backend = service.backend();
    let connector = MockConnector::new().auto_authenticate();
    let client = client(&connector, backend.clone());
    let mut signed_out = client.signed_out();

    client.login("alice", "secret").await.unwrap();
    let _server = connector.next_server().await;
    wait_for(&client, SessionState::Ready).await;

    service.expire_token();
    service.deny_refresh();

    let (a, b) = tokio::join!(client.load_rooms(), client.gateway().get("/chat/search"));
    assert!(matches!(a, Err(Error::RefreshFailed { .. })));
    assert!(matches!(b, Err(Error::RefreshFailed { .. })));
    assert_eq!(backend.calls_to("/auth/refresh"), 1);

    let reason = signed_out.recv().await.unwrap();
    assert!(reason.to_string().starts_with("refresh failed"));

    wait_for(&client, SessionState::Disconnected).await;
    assert!(!client.credentials().is_signed_in());
    assert!(!client.store().is_authenticated());

    // No reconnect without a credential.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.opens(), 1);
}
