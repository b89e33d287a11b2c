use super::*;
use crate::protocol::DrawRecord;
use crate::state::test_helpers::{self, TEST_PASSWORD};
use serde_json::json;
use tokio::time::{Duration, timeout};

/// A simulated connection: dispatch state plus the outbound channel that a
/// live session would drain into its socket.
struct TestClient {
    id: Uuid,
    room: Option<String>,
    tx: mpsc::Sender<Outbound>,
    rx: mpsc::Receiver<Outbound>,
}

impl TestClient {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(32);
        Self { id: Uuid::new_v4(), room: None, tx, rx }
    }

    async fn send(&mut self, state: &AppState, value: serde_json::Value) -> Vec<ServerMessage> {
        self.send_text(state, &value.to_string()).await
    }

    async fn send_text(&mut self, state: &AppState, text: &str) -> Vec<ServerMessage> {
        process_inbound_text(state, &mut self.room, self.id, &self.tx, text).await
    }

    async fn recv(&mut self) -> ServerMessage {
        let directive = timeout(Duration::from_millis(500), self.rx.recv())
            .await
            .expect("outbound receive timed out")
            .expect("outbound channel closed unexpectedly");
        match directive {
            Outbound::Message(message) => message,
            other => panic!("expected application message, got {other:?}"),
        }
    }

    async fn assert_silent(&mut self) {
        assert!(
            timeout(Duration::from_millis(80), self.rx.recv()).await.is_err(),
            "expected no outbound message"
        );
    }
}

fn join(room_id: &str) -> serde_json::Value {
    json!({"type": "join", "roomId": room_id})
}

fn admin(password: &str) -> serde_json::Value {
    json!({"type": "admin", "password": password})
}

fn draw() -> serde_json::Value {
    json!({"type": "draw", "x0": 0.0, "y0": 0.0, "x1": 5.0, "y1": 5.0, "color": "#000", "size": 2.0, "tool": "pen"})
}

// =============================================================================
// DECODE ERRORS
// =============================================================================

#[tokio::test]
async fn malformed_json_gets_error_reply_and_session_survives() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();

    let replies = client.send_text(&state, "{not json").await;
    assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));

    // The connection is still usable afterwards.
    let replies = client.send(&state, join("r1")).await;
    assert!(matches!(replies.as_slice(), [ServerMessage::History { .. }]));
}

#[tokio::test]
async fn unknown_command_type_is_a_decode_error() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();

    let replies = client.send(&state, json!({"type": "shout", "volume": 11})).await;
    assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));
}

// =============================================================================
// JOIN
// =============================================================================

#[tokio::test]
async fn join_replies_empty_history_and_queues_roster() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();

    let replies = client.send(&state, join("r1")).await;
    assert_eq!(replies, vec![ServerMessage::History { history: Vec::new() }]);
    assert_eq!(client.room.as_deref(), Some("r1"));

    let ServerMessage::Users { users } = client.recv().await else {
        panic!("expected roster after join");
    };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, client.id);
}

#[tokio::test]
async fn hopping_rooms_leaves_the_first_room() {
    let state = test_helpers::test_app_state();
    let mut mover = TestClient::new();
    let mut stayer = TestClient::new();
    mover.send(&state, join("r1")).await;
    stayer.send(&state, join("r1")).await;
    mover.recv().await; // own join roster
    mover.recv().await; // stayer's join roster

    mover.send(&state, join("r2")).await;

    assert_eq!(mover.room.as_deref(), Some("r2"));
    let rooms = state.rooms.read().await;
    assert_eq!(rooms["r1"].members.len(), 1);
    assert!(rooms["r2"].members.contains_key(&mover.id));
    drop(rooms);

    stayer.recv().await; // stayer's own join roster
    let ServerMessage::Users { users } = stayer.recv().await else {
        panic!("expected roster after departure");
    };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, stayer.id);
}

// =============================================================================
// ADMIN
// =============================================================================

#[tokio::test]
async fn admin_claim_before_any_join_is_missing_room() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();

    let replies = client.send(&state, admin(TEST_PASSWORD)).await;
    assert_eq!(replies, vec![ServerMessage::Error { message: "room not found".into() }]);
}

#[tokio::test]
async fn wrong_password_gets_error_and_no_authority() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();
    client.send(&state, join("r1")).await;
    client.recv().await;

    let replies = client.send(&state, admin("letmein")).await;
    assert_eq!(replies, vec![ServerMessage::Error { message: "invalid password".into() }]);
    assert!(state.rooms.read().await["r1"].admin.is_none());
    client.assert_silent().await;
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn admin_draws_then_late_joiner_replays_the_record() {
    let state = test_helpers::test_app_state();
    let mut artist = TestClient::new();
    artist.send(&state, join("r1")).await;
    artist.recv().await;

    let replies = artist.send(&state, admin(TEST_PASSWORD)).await;
    assert_eq!(replies, vec![ServerMessage::AdminOk]);
    artist.recv().await; // claim roster

    let replies = artist.send(&state, draw()).await;
    assert!(replies.is_empty());
    let ServerMessage::Draw(stroke) = artist.recv().await else {
        panic!("expected relayed draw");
    };
    assert_eq!(stroke.x1, 5.0);
    assert_eq!(stroke.color, "#000");

    let mut late = TestClient::new();
    let replies = late.send(&state, join("r1")).await;
    let [ServerMessage::History { history }] = replies.as_slice() else {
        panic!("expected history reply");
    };
    let [DrawRecord { stroke: replayed, timestamp }] = history.as_slice() else {
        panic!("expected exactly one record");
    };
    assert_eq!(replayed, &stroke);
    assert!(*timestamp > 0);
}

#[tokio::test]
async fn non_admin_draw_has_no_effect_and_no_reply() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();
    client.send(&state, join("r1")).await;
    client.recv().await;

    let replies = client.send(&state, draw()).await;
    assert!(replies.is_empty());
    assert!(state.rooms.read().await["r1"].history.is_empty());
    client.assert_silent().await;
}

#[tokio::test]
async fn draw_before_join_is_ignored() {
    let state = test_helpers::test_app_state();
    let mut client = TestClient::new();

    let replies = client.send(&state, draw()).await;
    assert!(replies.is_empty());
    assert!(state.rooms.read().await.is_empty());
    client.assert_silent().await;
}

#[tokio::test]
async fn clear_broadcasts_and_resets_replay() {
    let state = test_helpers::test_app_state();
    let mut artist = TestClient::new();
    artist.send(&state, join("r1")).await;
    artist.recv().await;
    artist.send(&state, admin(TEST_PASSWORD)).await;
    artist.recv().await;
    artist.send(&state, draw()).await;
    artist.recv().await;

    let replies = artist.send(&state, json!({"type": "clear"})).await;
    assert!(replies.is_empty());
    assert_eq!(artist.recv().await, ServerMessage::Clear);

    let mut late = TestClient::new();
    let replies = late.send(&state, join("r1")).await;
    assert_eq!(replies, vec![ServerMessage::History { history: Vec::new() }]);
}

// =============================================================================
// END TO END
// =============================================================================

mod end_to_end {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use tokio_tungstenite::tungstenite;

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, crate::routes::app(state)).await.expect("serve");
        });
        addr
    }

    async fn connect(addr: SocketAddr) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("websocket connect");
        ws
    }

    async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
        ws.send(tungstenite::Message::Text(value.to_string().into()))
            .await
            .expect("websocket send");
    }

    /// Next application message, skipping transport frames.
    async fn next_message(ws: &mut WsClient) -> ServerMessage {
        loop {
            let msg = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("receive timed out")
                .expect("stream ended unexpectedly")
                .expect("websocket error");
            if let tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).expect("parse server message");
            }
        }
    }

    #[tokio::test]
    async fn join_admin_draw_relay_over_real_sockets() {
        let state = test_helpers::test_app_state();
        let addr = spawn_server(state).await;

        let mut artist = connect(addr).await;
        send_json(&mut artist, join("r1")).await;
        assert_eq!(next_message(&mut artist).await, ServerMessage::History { history: Vec::new() });
        let ServerMessage::Users { users } = next_message(&mut artist).await else {
            panic!("expected roster after join");
        };
        assert_eq!(users.len(), 1);

        send_json(&mut artist, admin(TEST_PASSWORD)).await;
        assert_eq!(next_message(&mut artist).await, ServerMessage::AdminOk);
        let ServerMessage::Users { users } = next_message(&mut artist).await else {
            panic!("expected roster after claim");
        };
        assert!(users[0].is_admin);

        send_json(&mut artist, draw()).await;
        let ServerMessage::Draw(stroke) = next_message(&mut artist).await else {
            panic!("expected relayed draw");
        };
        assert_eq!(stroke.tool, "pen");

        // A late joiner replays the one record before seeing anything live.
        let mut viewer = connect(addr).await;
        send_json(&mut viewer, join("r1")).await;
        let ServerMessage::History { history } = next_message(&mut viewer).await else {
            panic!("expected history reply");
        };
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].stroke, stroke);
        assert!(history[0].timestamp > 0);
        let ServerMessage::Users { users } = next_message(&mut viewer).await else {
            panic!("expected roster after join");
        };
        assert_eq!(users.len(), 2);

        // The artist sees the viewer arrive, then the next relayed draw.
        let ServerMessage::Users { users } = next_message(&mut artist).await else {
            panic!("expected roster after viewer join");
        };
        assert_eq!(users.len(), 2);

        // A non-admin draw from the viewer relays nothing; the artist's next
        // message is the artist's own later stroke.
        send_json(&mut viewer, draw()).await;
        send_json(&mut artist, draw()).await;
        assert!(matches!(next_message(&mut artist).await, ServerMessage::Draw(_)));
        assert!(matches!(next_message(&mut viewer).await, ServerMessage::Draw(_)));
    }
}
