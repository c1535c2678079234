//! Integration tests for presence, cursors and typing indicators.
//!
//! These tests start a real server and connect several clients,
//! verifying participant lists, colour assignment and ephemeral signal
//! ordering through the full network stack.

use quill_collab::client::{RelayClient, RelayEvent};
use quill_collab::protocol::{ServerEvent, DEFAULT_CURSOR_COLOR};
use quill_collab::registry::PALETTE;
use quill_collab::server::RelayServer;
use quill_collab::ServerConfig;
use serde_json::json;
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};

async fn start_test_server(config: ServerConfig) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = RelayServer::new(config);
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://127.0.0.1:{port}")
}

/// Connect a client to the test server, draining the initial Connected event.
async fn connect_client(url: &str) -> (RelayClient, Receiver<RelayEvent>) {
    let mut client = RelayClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    let _ = timeout(Duration::from_secs(1), events.recv()).await;
    (client, events)
}

async fn next_event(events: &mut Receiver<RelayEvent>) -> ServerEvent {
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(RelayEvent::Received(event))) => event,
        other => panic!("Expected server event, got {other:?}"),
    }
}

/// Join and return the joiner's own participant colour.
async fn join_as(
    client: &RelayClient,
    events: &mut Receiver<RelayEvent>,
    user: &str,
    color: Option<&str>,
) -> String {
    client.join("doc1", Some(user), Some(user), color).await.unwrap();
    match next_event(events).await {
        ServerEvent::ActiveUsers(active) => active
            .users
            .into_iter()
            .find(|u| u.user_id == user)
            .map(|u| u.user_color)
            .expect("joiner listed"),
        other => panic!("Expected active-users, got {other:?}"),
    }
}

// ─── Presence ────────────────────────────────────────────────────

#[tokio::test]
async fn test_join_broadcasts_full_list() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;

    join_as(&x, &mut x_rx, "x", Some("#10b981")).await;
    join_as(&y, &mut y_rx, "y", None).await;

    match next_event(&mut x_rx).await {
        ServerEvent::UserJoined(joined) => {
            assert_eq!(joined.user_id, "y");
            assert_eq!(joined.user_name, "y");
            let ids: Vec<&str> = joined.users.iter().map(|u| u.user_id.as_str()).collect();
            assert_eq!(ids, vec!["x", "y"]);
            assert_eq!(joined.users[0].user_color, "#10b981");
        }
        other => panic!("Expected user-joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_assigned_color_from_palette_and_stable() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;

    let color = join_as(&x, &mut x_rx, "x", None).await;
    assert!(PALETTE.contains(&color.as_str()), "{color} not in palette");

    for _ in 0..3 {
        let again = join_as(&x, &mut x_rx, "x", None).await;
        assert_eq!(again, color);
    }
}

#[tokio::test]
async fn test_rejoin_does_not_duplicate() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;

    join_as(&x, &mut x_rx, "x", None).await;
    x.join("doc1", Some("x"), Some("Renamed"), None).await.unwrap();
    match next_event(&mut x_rx).await {
        ServerEvent::ActiveUsers(active) => {
            assert_eq!(active.users.len(), 1);
            assert_eq!(active.users[0].user_name, "Renamed");
        }
        other => panic!("Expected active-users, got {other:?}"),
    }
}

#[tokio::test]
async fn test_leave_notifies_remaining() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;
    join_as(&x, &mut x_rx, "x", None).await;
    join_as(&y, &mut y_rx, "y", None).await;
    let _ = next_event(&mut x_rx).await;

    y.leave("doc1", Some("y")).await.unwrap();

    match next_event(&mut x_rx).await {
        ServerEvent::UserLeft(left) => {
            assert_eq!(left.user_id, "y");
            assert_eq!(left.users.len(), 1);
        }
        other => panic!("Expected user-left, got {other:?}"),
    }

    // y no longer receives doc1 traffic.
    x.change("doc1", json!("after"), None, None).await.unwrap();
    let quiet = timeout(Duration::from_millis(200), y_rx.recv()).await;
    assert!(quiet.is_err(), "Expected silence, got {quiet:?}");
}

#[tokio::test]
async fn test_full_session_refuses_join() {
    let config = ServerConfig {
        max_peers_per_room: 1,
        ..ServerConfig::default()
    };
    let url = start_test_server(config).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;

    join_as(&x, &mut x_rx, "x", None).await;
    y.join("doc1", Some("y"), None, None).await.unwrap();

    let refused = timeout(Duration::from_millis(200), y_rx.recv()).await;
    assert!(refused.is_err(), "Expected no reply, got {refused:?}");
    let unnoticed = timeout(Duration::from_millis(50), x_rx.recv()).await;
    assert!(unnoticed.is_err());
}

// ─── Signals ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_typing_start_then_stop_in_order() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;
    join_as(&x, &mut x_rx, "x", None).await;
    join_as(&y, &mut y_rx, "y", None).await;

    x.typing("doc1", true, Some("x")).await.unwrap();
    x.typing("doc1", false, Some("x")).await.unwrap();

    let mut flags = Vec::new();
    for _ in 0..2 {
        match next_event(&mut y_rx).await {
            ServerEvent::UserTyping(typing) => {
                assert_eq!(typing.user_id, "x");
                flags.push(typing.is_typing);
            }
            other => panic!("Expected user-typing, got {other:?}"),
        }
    }
    assert_eq!(flags, vec![true, false]);
}

#[tokio::test]
async fn test_typing_flag_visible_to_later_joiner() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;
    join_as(&x, &mut x_rx, "x", None).await;
    x.typing("doc1", true, None).await.unwrap();

    y.join("doc1", Some("y"), None, None).await.unwrap();
    match next_event(&mut y_rx).await {
        ServerEvent::ActiveUsers(active) => {
            let x_view = active.users.iter().find(|u| u.user_id == "x").unwrap();
            assert!(x_view.is_typing);
        }
        other => panic!("Expected active-users, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cursor_update_relayed() {
    let url = start_test_server(ServerConfig::default()).await;
    let (x, mut x_rx) = connect_client(&url).await;
    let (y, mut y_rx) = connect_client(&url).await;
    join_as(&x, &mut x_rx, "x", None).await;
    join_as(&y, &mut y_rx, "y", None).await;
    let _ = next_event(&mut x_rx).await;

    let range = json!({"index": 4, "length": 0});
    x.cursor("doc1", range.clone(), Some("x"), None).await.unwrap();

    match next_event(&mut y_rx).await {
        ServerEvent::CursorUpdate(cursor) => {
            assert_eq!(cursor.user_id, "x");
            assert_eq!(cursor.range, range);
            assert_eq!(cursor.user_color, DEFAULT_CURSOR_COLOR);
        }
        other => panic!("Expected cursor-update, got {other:?}"),
    }
    let quiet = timeout(Duration::from_millis(200), x_rx.recv()).await;
    assert!(quiet.is_err(), "sender must not see its own cursor");
}
