use crate::error::{NodelinkError, Result};
use crate::protocol::TrackEndReason;
use crate::types::{GuildId, Stats};
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 256;

/// Typed playback event for one guild's player
///
/// Constructed exclusively by the dispatcher from decoded node payloads
/// (or synthesized on node loss) and delivered in node-send order per
/// guild.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart {
        guild_id: GuildId,
        track: String,
    },
    TrackEnd {
        guild_id: GuildId,
        track: String,
        reason: TrackEndReason,
    },
    TrackException {
        guild_id: GuildId,
        track: String,
        message: Option<String>,
        severity: Option<String>,
        cause: Option<String>,
    },
    TrackStuck {
        guild_id: GuildId,
        track: String,
        threshold_ms: u64,
    },
    /// The voice connection for this guild closed; also synthesized once
    /// per assigned player when the node's own connection drops
    WebsocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebsocketClosed { guild_id, .. } => *guild_id,
        }
    }
}

/// Node-level event for process-wide listeners
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Connected {
        node: String,
    },
    Disconnected {
        node: String,
        reason: String,
    },
    /// Fresh stats snapshot from a node
    Stats {
        node: String,
        stats: Stats,
    },
    /// A player lost its node and no other connected node could take it;
    /// the session is over unless the host intervenes
    FailoverFailed {
        node: String,
        guild_id: GuildId,
    },
}

/// Receiver for one event category
///
/// Wraps a broadcast receiver; when a slow listener lags, the oldest
/// undelivered events are dropped and surfaced as a channel error.
pub struct EventReceiver<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> EventReceiver<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next event, waiting until one arrives
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.map_err(|error| match error {
            broadcast::error::RecvError::Closed => NodelinkError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(count) => {
                NodelinkError::ChannelError(format!("lagged by {count} events"))
            }
        })
    }

    /// Receive an event if one is ready
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(NodelinkError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Err(NodelinkError::ChannelError(format!("lagged by {count} events")))
            }
        }
    }
}

/// Per-category publish channels shared by every dispatcher task
pub(crate) struct EventBus {
    players: broadcast::Sender<PlayerEvent>,
    nodes: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (players, _) = broadcast::channel(EVENT_BUFFER);
        let (nodes, _) = broadcast::channel(EVENT_BUFFER);
        Self { players, nodes }
    }

    pub(crate) fn publish_player(&self, event: PlayerEvent) {
        // No listeners is fine; state updates have already been applied.
        let _ = self.players.send(event);
    }

    pub(crate) fn publish_node(&self, event: NodeEvent) {
        let _ = self.nodes.send(event);
    }

    pub(crate) fn subscribe_players(&self) -> EventReceiver<PlayerEvent> {
        EventReceiver::new(self.players.subscribe())
    }

    pub(crate) fn subscribe_nodes(&self) -> EventReceiver<NodeEvent> {
        EventReceiver::new(self.nodes.subscribe())
    }
}
