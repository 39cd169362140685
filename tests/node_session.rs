//! End-to-end tests against an in-process mock audio node

use futures_util::{SinkExt, StreamExt};
use nodelink::{
    Client, FilterChain, NodeConfig, PlayOptions, PlayerEvent, PlayerState, Timescale, Track,
    TrackInfo,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const PASSWORD: &str = "youshallnotpass";
const USER_ID: u64 = 1234;
const GUILD: u64 = 123;

#[derive(Debug, Clone, Default)]
struct SeenHeaders {
    authorization: Option<String>,
    user_id: Option<String>,
    client_name: Option<String>,
}

/// A fake node: accepts websocket connections, records inbound command
/// frames, and plays back whatever JSON the test pushes
struct MockNode {
    port: u16,
    frames: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<Value>,
    headers: Arc<Mutex<SeenHeaders>>,
    task: JoinHandle<()>,
}

impl MockNode {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<Value>();
        let headers = Arc::new(Mutex::new(SeenHeaders::default()));
        let seen = headers.clone();

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };

                let seen = seen.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    let mut seen = seen.lock().unwrap();
                    seen.authorization = header("Authorization");
                    seen.user_id = header("User-Id");
                    seen.client_name = header("Client-Name");
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let value: Value = serde_json::from_str(&text).unwrap();
                                if frame_tx.send(value).is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        pushed = push_rx.recv() => match pushed {
                            Some(value) => {
                                let _ = ws.send(Message::Text(value.to_string())).await;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self { port, frames, push, headers, task }
    }

    fn config(&self, identifier: &str) -> NodeConfig {
        NodeConfig {
            identifier: identifier.to_string(),
            host: "127.0.0.1".to_string(),
            port: self.port,
            password: PASSWORD.to_string(),
            user_id: USER_ID,
        }
    }

    fn send(&self, value: Value) {
        self.push.send(value).unwrap();
    }

    /// Next command frame, in arrival order
    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a command frame")
            .expect("mock node stopped")
    }

    async fn expect_op(&mut self, op: &str) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["op"], op, "unexpected command frame: {frame}");
        frame
    }

    /// Drop the listener and any live connection, as if the process died
    fn kill(&self) {
        self.task.abort();
    }
}

fn track() -> Track {
    Track {
        id: "QAAAjQIAJFJpY2sgQXN0bGV5".to_string(),
        info: TrackInfo {
            title: "Never Gonna Give You Up".to_string(),
            author: "Rick Astley".to_string(),
            length: 212_000,
            identifier: "dQw4w9WgXcQ".to_string(),
            uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            is_stream: false,
            is_seekable: true,
            position: 0,
            source_name: Some("youtube".to_string()),
        },
    }
}

async fn wait_connected(client: &Client, identifier: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if client.get_node(identifier).map(|n| n.is_connected()).unwrap_or(false) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "node {identifier} never connected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn next_player_event(events: &mut nodelink::EventReceiver<PlayerEvent>) -> PlayerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no player event")
        .unwrap()
}

#[tokio::test]
async fn handshake_play_and_events() {
    init_tracing();
    let mut mock = MockNode::start().await;
    let client = Client::new();
    let mut player_events = client.subscribe_players();

    client.add_node(mock.config("main")).unwrap();
    wait_connected(&client, "main").await;

    {
        let seen = mock.headers.lock().unwrap().clone();
        assert_eq!(seen.authorization.as_deref(), Some(PASSWORD));
        assert_eq!(seen.user_id.as_deref(), Some("1234"));
        assert!(seen.client_name.is_some());
    }

    let player = client.create_player(GUILD).unwrap();
    assert_eq!(player.state(), PlayerState::Idle);

    // Voice handshake is sent only once both halves have arrived.
    player.voice_state_update("sess-1", Some(42)).unwrap();
    player
        .voice_server_update(nodelink::VoiceServerUpdate {
            token: "tok".to_string(),
            guild_id: GUILD.to_string(),
            endpoint: Some("us-west.example".to_string()),
        })
        .unwrap();
    let frame = mock.expect_op("voiceUpdate").await;
    assert_eq!(frame["guildId"], GUILD.to_string());
    assert_eq!(frame["sessionId"], "sess-1");
    assert_eq!(frame["event"]["token"], "tok");

    player.play(track(), PlayOptions::default()).unwrap();
    let frame = mock.expect_op("play").await;
    assert_eq!(frame["track"], track().id);
    assert_eq!(frame["guildId"], GUILD.to_string());

    mock.send(json!({
        "op": "event",
        "type": "TrackStartEvent",
        "guildId": GUILD.to_string(),
        "track": track().id,
    }));
    let event = tokio::time::timeout(Duration::from_secs(5), player_events.recv())
        .await
        .expect("no player event")
        .unwrap();
    assert!(matches!(event, PlayerEvent::TrackStart { guild_id: GUILD, .. }));
    assert_eq!(player.state(), PlayerState::Playing);

    // An authoritative position report overwrites the local estimate.
    mock.send(json!({
        "op": "playerUpdate",
        "guildId": GUILD.to_string(),
        "state": { "time": 1_700_000_000_000u64, "position": 42_000, "connected": true },
    }));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while player.position() < 42_000 {
        assert!(tokio::time::Instant::now() < deadline, "playerUpdate never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(player.is_connected());

    mock.send(json!({
        "op": "event",
        "type": "TrackEndEvent",
        "guildId": GUILD.to_string(),
        "track": track().id,
        "reason": "FINISHED",
    }));
    let event = tokio::time::timeout(Duration::from_secs(5), player_events.recv())
        .await
        .expect("no player event")
        .unwrap();
    assert!(matches!(event, PlayerEvent::TrackEnd { guild_id: GUILD, .. }));
    assert_eq!(player.state(), PlayerState::Idle);

    client.shutdown().await;
}

#[tokio::test]
async fn track_trouble_is_republished() {
    init_tracing();
    let mut mock = MockNode::start().await;
    let client = Client::new();
    let mut player_events = client.subscribe_players();

    client.add_node(mock.config("main")).unwrap();
    wait_connected(&client, "main").await;

    let player = client.create_player(GUILD).unwrap();
    player.play(track(), PlayOptions::default()).unwrap();
    mock.expect_op("play").await;

    mock.send(json!({
        "op": "event",
        "type": "TrackStuckEvent",
        "guildId": GUILD.to_string(),
        "track": track().id,
        "thresholdMs": 10_000,
    }));
    match next_player_event(&mut player_events).await {
        PlayerEvent::TrackStuck { guild_id, threshold_ms, .. } => {
            assert_eq!(guild_id, GUILD);
            assert_eq!(threshold_ms, 10_000);
        }
        other => panic!("expected a stuck notice, got {other:?}"),
    }

    // Current nodes report failures as a structured exception block.
    mock.send(json!({
        "op": "event",
        "type": "TrackExceptionEvent",
        "guildId": GUILD.to_string(),
        "track": track().id,
        "exception": {
            "message": "The decoder gave up",
            "severity": "FAULT",
            "cause": "com.sedmelluq.discord.lavaplayer.tools.FriendlyException",
        },
    }));
    match next_player_event(&mut player_events).await {
        PlayerEvent::TrackException { guild_id, message, severity, cause, .. } => {
            assert_eq!(guild_id, GUILD);
            assert_eq!(message.as_deref(), Some("The decoder gave up"));
            assert_eq!(severity.as_deref(), Some("FAULT"));
            assert!(cause.is_some());
        }
        other => panic!("expected an exception notice, got {other:?}"),
    }

    // Older nodes only send a bare error string; it fills the message.
    mock.send(json!({
        "op": "event",
        "type": "TrackExceptionEvent",
        "guildId": GUILD.to_string(),
        "track": track().id,
        "error": "This video is unavailable.",
    }));
    match next_player_event(&mut player_events).await {
        PlayerEvent::TrackException { message, severity, cause, .. } => {
            assert_eq!(message.as_deref(), Some("This video is unavailable."));
            assert_eq!(severity, None);
            assert_eq!(cause, None);
        }
        other => panic!("expected an exception notice, got {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn stats_update_node_selection() {
    init_tracing();
    let mut first = MockNode::start().await;
    let mut second = MockNode::start().await;
    let client = Client::new();

    client.add_node(first.config("first")).unwrap();
    client.add_node(second.config("second")).unwrap();
    wait_connected(&client, "first").await;
    wait_connected(&client, "second").await;

    // Load up the first node so selection prefers the second.
    first.send(json!({
        "op": "stats",
        "players": 10,
        "playingPlayers": 10,
        "uptime": 60_000,
    }));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.get_node("first").unwrap().stats().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "stats never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let player = client.create_player(GUILD).unwrap();
    assert_eq!(player.node().as_deref(), Some("second"));

    // The second node's queue received nothing yet; prove commands land there.
    player.set_volume(250).unwrap();
    let frame = second.expect_op("volume").await;
    assert_eq!(frame["volume"], 250);
    assert!(first.frames.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test]
async fn dead_node_fails_players_over() {
    init_tracing();
    let mut first = MockNode::start().await;
    let mut second = MockNode::start().await;
    let client = Client::new();
    let mut player_events = client.subscribe_players();

    client.add_node(first.config("first")).unwrap();
    client.add_node(second.config("second")).unwrap();
    wait_connected(&client, "first").await;
    wait_connected(&client, "second").await;

    // Equal penalties; registration order places the player on "first".
    let player = client.create_player(GUILD).unwrap();
    assert_eq!(player.node().as_deref(), Some("first"));

    player.voice_state_update("sess-1", Some(42)).unwrap();
    player
        .voice_server_update(nodelink::VoiceServerUpdate {
            token: "tok".to_string(),
            guild_id: GUILD.to_string(),
            endpoint: Some("us-west.example".to_string()),
        })
        .unwrap();
    player.play(track(), PlayOptions::default()).unwrap();
    player
        .set_filters(FilterChain::new().with_timescale(Timescale {
            speed: 1.25,
            ..Timescale::default()
        }))
        .unwrap();

    first.expect_op("voiceUpdate").await;
    first.expect_op("play").await;
    first.expect_op("filters").await;

    first.kill();

    // Exactly one synthesized closure notice for the affected player.
    let event = tokio::time::timeout(Duration::from_secs(10), player_events.recv())
        .await
        .expect("no closure notice")
        .unwrap();
    match event {
        PlayerEvent::WebsocketClosed { guild_id, by_remote, .. } => {
            assert_eq!(guild_id, GUILD);
            assert!(by_remote);
        }
        other => panic!("expected a closure notice, got {other:?}"),
    }

    // The session is replayed on the surviving node: voice credentials,
    // volume, filters, then the track at its last known position.
    let frame = second.expect_op("voiceUpdate").await;
    assert_eq!(frame["sessionId"], "sess-1");
    let frame = second.expect_op("volume").await;
    assert_eq!(frame["volume"], 100);
    let frame = second.expect_op("filters").await;
    assert_eq!(frame["timescale"]["speed"], 1.25);
    let frame = second.expect_op("play").await;
    assert_eq!(frame["track"], track().id);
    assert!(frame["startTime"].is_u64());

    assert_eq!(player.node().as_deref(), Some("second"));

    // The resume frames above were sent after any closure notice would
    // have been published, so a duplicate would already be buffered here.
    assert!(player_events.try_recv().unwrap().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn pause_races_with_position_reports() {
    init_tracing();
    let mut mock = MockNode::start().await;
    let client = Client::new();

    client.add_node(mock.config("main")).unwrap();
    wait_connected(&client, "main").await;

    let player = client.create_player(GUILD).unwrap();
    player.play(track(), PlayOptions::default()).unwrap();
    mock.expect_op("play").await;

    // Hammer pause toggles while the node streams position reports; the
    // shared lock must keep the flag and estimate consistent throughout.
    for i in 0..50u64 {
        mock.send(json!({
            "op": "playerUpdate",
            "guildId": GUILD.to_string(),
            "state": { "time": i, "position": i * 1000, "connected": true },
        }));
        player.pause(i % 2 == 0).unwrap();
    }
    player.pause(true).unwrap();
    // Let every in-flight report land before sampling the frozen estimate.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(player.is_paused());
    let frozen = player.position();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(player.position(), frozen);
    assert!(player.position() <= track().info.length);

    client.shutdown().await;
}
