//! Per-node dispatch task
//!
//! Each registered node gets one task that consumes its connection
//! signals, routes inbound messages to the owning player, republishes
//! them as typed events, and drives failover when the node goes down.

use crate::client::ClientInner;
use crate::connection::{ConnectionSignal, ConnectionState};
use crate::events::{NodeEvent, PlayerEvent};
use crate::node::Node;
use crate::player::Player;
use crate::protocol::{EventPayload, IncomingMessage};
use crate::types::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Close code reported to players when the node itself dropped the
/// transport without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

pub(crate) fn spawn(node: Arc<Node>, shared: Arc<ClientInner>) -> JoinHandle<()> {
    tokio::spawn(run(node, shared))
}

async fn run(node: Arc<Node>, shared: Arc<ClientInner>) {
    let mut signals = node.subscribe();
    let mut state = node.watch_state();
    let mut shutdown = node.watch_shutdown();
    // Lifecycle edges arrive both as signals and as state transitions.
    // Signals carry the close details but can be dropped when the
    // channel lags; the state watch always holds the latest value. The
    // flag keeps each edge handled exactly once no matter which source
    // reports it first.
    let mut live = false;
    loop {
        tokio::select! {
            biased;
            signal = signals.recv() => match signal {
                Ok(ConnectionSignal::Connected) => mark_up(&node, &shared, &mut live),
                Ok(ConnectionSignal::Message(message)) => handle_message(&node, &shared, message),
                Ok(ConnectionSignal::Closed { code, reason, by_remote }) => {
                    mark_down(&node, &shared, &mut live, code, &reason, by_remote);
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(node = node.identifier(), missed, "dispatcher lagged, dropped signals");
                }
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                match *state.borrow_and_update() {
                    ConnectionState::Connected => mark_up(&node, &shared, &mut live),
                    ConnectionState::Disconnected => {
                        mark_down(&node, &shared, &mut live, None, "connection lost", true);
                    }
                    _ => {}
                }
            },
            _ = shutdown.changed() => {
                // Explicit removal. The connection emits a final Closed
                // signal while tearing down; wait briefly for it so
                // assigned players still get failed over.
                while let Ok(Ok(signal)) =
                    timeout(Duration::from_secs(1), signals.recv()).await
                {
                    match signal {
                        ConnectionSignal::Connected => mark_up(&node, &shared, &mut live),
                        ConnectionSignal::Message(message) => {
                            handle_message(&node, &shared, message);
                        }
                        ConnectionSignal::Closed { code, reason, by_remote } => {
                            mark_down(&node, &shared, &mut live, code, &reason, by_remote);
                            break;
                        }
                    }
                }
                mark_down(&node, &shared, &mut live, None, "node removed", false);
                break;
            }
        }
    }
    tracing::debug!(node = node.identifier(), "dispatcher stopped");
}

/// Handle the up edge of a connection cycle
fn mark_up(node: &Arc<Node>, shared: &Arc<ClientInner>, live: &mut bool) {
    if *live {
        return;
    }
    *live = true;
    shared.events.publish_node(NodeEvent::Connected {
        node: node.identifier().to_string(),
    });
}

/// Handle the down edge of a connection cycle
///
/// The same outage can be reported twice, once per source; the second
/// report is a no-op so players see a single closure notice.
fn mark_down(
    node: &Arc<Node>,
    shared: &Arc<ClientInner>,
    live: &mut bool,
    code: Option<u16>,
    reason: &str,
    by_remote: bool,
) {
    if !*live {
        return;
    }
    *live = false;
    node.note_failure();
    shared.events.publish_node(NodeEvent::Disconnected {
        node: node.identifier().to_string(),
        reason: reason.to_string(),
    });
    fail_over(node, shared, code, reason, by_remote);
}

fn handle_message(node: &Arc<Node>, shared: &Arc<ClientInner>, message: IncomingMessage) {
    match message {
        IncomingMessage::PlayerUpdate(update) => {
            let Some(guild_id) = parse_guild(node, &update.guild_id) else { return };
            if let Some(player) = shared.player(guild_id) {
                player.apply_update(&update.state);
            }
        }
        IncomingMessage::Stats(stats) => {
            node.set_stats(stats.clone());
            shared.events.publish_node(NodeEvent::Stats {
                node: node.identifier().to_string(),
                stats,
            });
        }
        IncomingMessage::Event(payload) => handle_event(node, shared, payload),
        IncomingMessage::Unknown { op, .. } => {
            tracing::debug!(node = node.identifier(), op, "ignoring unrecognized message");
        }
    }
}

fn handle_event(node: &Arc<Node>, shared: &Arc<ClientInner>, payload: EventPayload) {
    let Some(guild_id) = parse_guild(node, payload.guild_id()) else { return };
    let player = shared.player(guild_id);

    let event = match payload {
        EventPayload::TrackStart { track, .. } => {
            if let Some(player) = &player {
                player.handle_track_start();
            }
            PlayerEvent::TrackStart { guild_id, track }
        }
        EventPayload::TrackEnd { track, reason, .. } => {
            if let Some(player) = &player {
                player.handle_track_end(reason);
            }
            PlayerEvent::TrackEnd { guild_id, track, reason }
        }
        EventPayload::TrackException { track, error, exception, .. } => {
            let detail = exception.unwrap_or_default();
            PlayerEvent::TrackException {
                guild_id,
                track,
                message: detail.message.or(error),
                severity: detail.severity,
                cause: detail.cause,
            }
        }
        EventPayload::TrackStuck { track, threshold_ms, .. } => {
            PlayerEvent::TrackStuck { guild_id, track, threshold_ms }
        }
        EventPayload::WebsocketClosed { code, reason, by_remote, .. } => {
            if let Some(player) = &player {
                player.handle_voice_closed();
            }
            PlayerEvent::WebsocketClosed { guild_id, code, reason, by_remote }
        }
    };

    shared.events.publish_player(event);
}

/// Move every player off a dead node
///
/// Each affected player sees exactly one synthesized closure notice
/// before it is rebound, so hosts can react to the gap in playback.
fn fail_over(
    node: &Arc<Node>,
    shared: &Arc<ClientInner>,
    code: Option<u16>,
    reason: &str,
    by_remote: bool,
) {
    let guilds = node.drain_guilds();
    if guilds.is_empty() {
        return;
    }
    tracing::info!(
        node = node.identifier(),
        players = guilds.len(),
        "node lost, reassigning players"
    );

    for guild_id in guilds {
        let Some(player) = shared.player(guild_id) else { continue };

        player.handle_voice_closed();
        shared.events.publish_player(PlayerEvent::WebsocketClosed {
            guild_id,
            code: code.unwrap_or(ABNORMAL_CLOSURE),
            reason: reason.to_string(),
            by_remote,
        });

        match shared.pool.reassign(guild_id, node.identifier()) {
            Ok(target) => match player.resume_on(target.clone()) {
                Ok(()) => {
                    tracing::info!(
                        guild_id,
                        from = node.identifier(),
                        to = target.identifier(),
                        "player moved"
                    );
                }
                Err(err) => {
                    tracing::warn!(guild_id, node = target.identifier(), %err, "resume failed");
                    target.unregister_guild(guild_id);
                    strand(node, shared, &player, guild_id);
                }
            },
            Err(_) => strand(node, shared, &player, guild_id),
        }
    }
}

fn strand(node: &Arc<Node>, shared: &Arc<ClientInner>, player: &Arc<Player>, guild_id: GuildId) {
    tracing::warn!(guild_id, "no replacement node, player left without a node");
    player.detach_node();
    shared.events.publish_node(NodeEvent::FailoverFailed {
        node: node.identifier().to_string(),
        guild_id,
    });
}

fn parse_guild(node: &Arc<Node>, raw: &str) -> Option<GuildId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(node = node.identifier(), guild_id = raw, "unparseable guild id");
            None
        }
    }
}
