use crate::error::{NodelinkError, Result};
use crate::filters::FilterChain;
use crate::node::Node;
use crate::protocol::{OutgoingMessage, PlayerUpdateState, TrackEndReason};
use crate::types::{GuildId, Track, VoiceServerUpdate};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Playback lifecycle of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No track; reached again on track end or stop
    Idle,
    Playing,
    Paused,
    /// Terminal; every further operation fails with `PlayerDestroyed`
    Destroyed,
}

/// Optional parameters for [`Player::play`]
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Position to start from, in milliseconds
    pub start_time: Option<u64>,
    /// Position to stop at, in milliseconds; must not precede `start_time`
    pub end_time: Option<u64>,
    /// Ask the node to keep the current track if one is playing; advisory,
    /// never enforced client-side
    pub no_replace: bool,
    /// Start paused
    pub pause: bool,
}

/// Mutable state, guarded by one lock shared between command callers and
/// the dispatcher task; never held across an await point
struct PlayerInner {
    /// Assigned node; cleared when failover exhausts the pool
    node: Option<Arc<Node>>,
    state: PlayerState,
    current: Option<Track>,
    volume: u16,
    paused: bool,
    filters: FilterChain,

    /// Last node-reported position in milliseconds; authoritative
    last_position: u64,
    /// When that report (or a local seek) was taken
    last_update: Option<Instant>,
    /// `connected` flag from the last playerUpdate
    remote_connected: bool,

    session_id: Option<String>,
    server_update: Option<VoiceServerUpdate>,
    channel_id: Option<u64>,
}

/// One guild's playback session, bound to one node at a time
///
/// Commands validate locally, then enqueue on the assigned node's
/// connection; applied state is provisional until the node confirms it
/// through an event or playerUpdate.
pub struct Player {
    guild_id: GuildId,
    inner: Mutex<PlayerInner>,
}

impl Player {
    pub(crate) fn new(guild_id: GuildId, node: Arc<Node>) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            inner: Mutex::new(PlayerInner {
                node: Some(node),
                state: PlayerState::Idle,
                current: None,
                volume: 100,
                paused: false,
                filters: FilterChain::new(),
                last_position: 0,
                last_update: None,
                remote_connected: false,
                session_id: None,
                server_update: None,
                channel_id: None,
            }),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().unwrap().state
    }

    pub fn current(&self) -> Option<Track> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn volume(&self) -> u16 {
        self.inner.lock().unwrap().volume
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }

    pub fn filters(&self) -> FilterChain {
        self.inner.lock().unwrap().filters.clone()
    }

    /// Identifier of the assigned node, if the player still has one
    pub fn node(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .node
            .as_ref()
            .map(|node| node.identifier().to_string())
    }

    /// Whether the node reports its voice connection for this guild as up
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().remote_connected
    }

    /// Estimated playback position in milliseconds
    ///
    /// Extrapolated monotonically from the last node report and clamped to
    /// the track length; frozen while paused. The next playerUpdate
    /// overwrites the estimate.
    pub fn position(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        Self::position_locked(&inner)
    }

    fn position_locked(inner: &PlayerInner) -> u64 {
        let Some(track) = &inner.current else { return 0 };
        let length = track.info.length;

        if inner.paused {
            return inner.last_position.min(length);
        }
        match inner.last_update {
            Some(at) => (inner.last_position + at.elapsed().as_millis() as u64).min(length),
            None => inner.last_position.min(length),
        }
    }

    // ========== Commands ==========

    /// Start playing a track, replacing the current one unless
    /// `options.no_replace` asks the node not to
    pub fn play(&self, track: Track, options: PlayOptions) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        node.send(&OutgoingMessage::Play {
            guild_id: self.guild_id.to_string(),
            track: track.id.clone(),
            start_time: options.start_time,
            end_time: options.end_time,
            no_replace: options.no_replace.then_some(true),
            pause: options.pause.then_some(true),
        })?;

        inner.last_position = options.start_time.unwrap_or(0);
        inner.last_update = None;
        inner.paused = options.pause;
        inner.current = Some(track);
        Ok(())
    }

    /// Stop the current track
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        node.send(&OutgoingMessage::Stop { guild_id: self.guild_id.to_string() })?;

        inner.current = None;
        inner.last_position = 0;
        inner.last_update = None;
        inner.state = PlayerState::Idle;
        Ok(())
    }

    /// Pause or resume playback
    pub fn pause(&self, pause: bool) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        node.send(&OutgoingMessage::Pause { guild_id: self.guild_id.to_string(), pause })?;

        // Freeze (or restart) the local position estimate at the boundary.
        inner.last_position = Self::position_locked(&inner);
        inner.last_update = Some(Instant::now());
        inner.paused = pause;
        inner.state = match (inner.state, pause) {
            (PlayerState::Playing, true) => PlayerState::Paused,
            (PlayerState::Paused, false) => PlayerState::Playing,
            (state, _) => state,
        };
        Ok(())
    }

    /// Seek within the current track
    pub fn seek(&self, position: u64) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        if inner.current.is_none() {
            return Err(NodelinkError::Encoding("cannot seek with no current track".to_string()));
        }

        node.send(&OutgoingMessage::Seek { guild_id: self.guild_id.to_string(), position })?;

        inner.last_position = position;
        inner.last_update = Some(Instant::now());
        Ok(())
    }

    /// Set the player volume, 0..=1000
    pub fn set_volume(&self, volume: u16) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        node.send(&OutgoingMessage::Volume { guild_id: self.guild_id.to_string(), volume })?;

        inner.volume = volume;
        Ok(())
    }

    /// Replace the node-side filter state with this chain
    ///
    /// An empty chain clears all filters. The chain is validated before
    /// anything is sent.
    pub fn set_filters(&self, chain: FilterChain) -> Result<()> {
        chain.validate()?;

        let mut inner = self.lock_alive()?;
        let node = Self::node_of(&inner)?;

        node.send(&OutgoingMessage::Filters {
            guild_id: self.guild_id.to_string(),
            chain: chain.clone(),
        })?;

        inner.filters = chain;
        Ok(())
    }

    /// Tear the session down
    ///
    /// Tells the node to drop its player (best effort if the node is
    /// unreachable), unregisters from the node's guild set, and leaves the
    /// player inert.
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.lock_alive()?;

        if let Some(node) = inner.node.take() {
            let guild_id = self.guild_id.to_string();
            // The node may already be gone; local teardown proceeds anyway.
            let _ = node.send(&OutgoingMessage::Stop { guild_id: guild_id.clone() });
            let _ = node.send(&OutgoingMessage::Destroy { guild_id });
            node.unregister_guild(self.guild_id);
        }

        inner.current = None;
        inner.session_id = None;
        inner.server_update = None;
        inner.channel_id = None;
        inner.state = PlayerState::Destroyed;
        Ok(())
    }

    // ========== Voice handshake (host-forwarded) ==========

    /// Forward a voice-server update from the host's chat gateway
    pub fn voice_server_update(&self, update: VoiceServerUpdate) -> Result<()> {
        let mut inner = self.lock_alive()?;
        inner.server_update = Some(update);
        self.flush_voice_update(&mut inner)
    }

    /// Forward a voice-state update from the host's chat gateway
    ///
    /// A `None` channel means the session left voice; stored credentials
    /// are cleared.
    pub fn voice_state_update(
        &self,
        session_id: impl Into<String>,
        channel_id: Option<u64>,
    ) -> Result<()> {
        let mut inner = self.lock_alive()?;

        let Some(channel_id) = channel_id else {
            inner.session_id = None;
            inner.server_update = None;
            inner.channel_id = None;
            return Ok(());
        };

        inner.session_id = Some(session_id.into());
        inner.channel_id = Some(channel_id);
        self.flush_voice_update(&mut inner)
    }

    /// Send the voice handshake once both halves have arrived
    fn flush_voice_update(&self, inner: &mut PlayerInner) -> Result<()> {
        let (Some(session_id), Some(event)) = (&inner.session_id, &inner.server_update) else {
            return Ok(());
        };
        let node = Self::node_of(inner)?;

        node.send(&OutgoingMessage::VoiceUpdate {
            guild_id: self.guild_id.to_string(),
            session_id: session_id.clone(),
            event: event.clone(),
        })
    }

    // ========== Dispatcher-driven reconciliation ==========

    /// Apply an authoritative playerUpdate; overwrites the local estimate
    pub(crate) fn apply_update(&self, state: &PlayerUpdateState) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_position = state.position.unwrap_or(0);
        inner.last_update = Some(Instant::now());
        inner.remote_connected = state.connected;
    }

    pub(crate) fn handle_track_start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == PlayerState::Destroyed {
            return;
        }
        inner.state = if inner.paused { PlayerState::Paused } else { PlayerState::Playing };
    }

    pub(crate) fn handle_track_end(&self, reason: TrackEndReason) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == PlayerState::Destroyed {
            return;
        }
        // REPLACED means another play command already took over.
        if reason != TrackEndReason::Replaced {
            inner.current = None;
            inner.last_position = 0;
            inner.last_update = None;
            inner.state = PlayerState::Idle;
        }
    }

    pub(crate) fn handle_voice_closed(&self) {
        self.inner.lock().unwrap().remote_connected = false;
    }

    /// Drop the node reference after failover found no replacement;
    /// commands then fail fast until the host intervenes
    pub(crate) fn detach_node(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.node = None;
        inner.remote_connected = false;
    }

    /// Rebind to a replacement node and replay the last-known session
    /// state: voice credentials, volume, filters, and the current track
    /// at its estimated position
    pub(crate) fn resume_on(&self, node: Arc<Node>) -> Result<()> {
        let mut inner = self.lock_alive()?;
        let guild_id = self.guild_id.to_string();

        inner.node = Some(node.clone());
        inner.remote_connected = false;

        if let (Some(session_id), Some(event)) = (&inner.session_id, &inner.server_update) {
            node.send(&OutgoingMessage::VoiceUpdate {
                guild_id: guild_id.clone(),
                session_id: session_id.clone(),
                event: event.clone(),
            })?;
        }

        node.send(&OutgoingMessage::Volume { guild_id: guild_id.clone(), volume: inner.volume })?;

        if !inner.filters.is_empty() {
            node.send(&OutgoingMessage::Filters {
                guild_id: guild_id.clone(),
                chain: inner.filters.clone(),
            })?;
        }

        if let Some(track) = &inner.current {
            let position = Self::position_locked(&inner);
            node.send(&OutgoingMessage::Play {
                guild_id,
                track: track.id.clone(),
                start_time: Some(position),
                end_time: None,
                no_replace: None,
                pause: inner.paused.then_some(true),
            })?;
            inner.last_position = position;
            inner.last_update = Some(Instant::now());
        }

        Ok(())
    }

    // ========== Helpers ==========

    fn lock_alive(&self) -> Result<std::sync::MutexGuard<'_, PlayerInner>> {
        let inner = self.inner.lock().unwrap();
        if inner.state == PlayerState::Destroyed {
            return Err(NodelinkError::PlayerDestroyed { guild_id: self.guild_id });
        }
        Ok(inner)
    }

    fn node_of(inner: &PlayerInner) -> Result<Arc<Node>> {
        inner.node.clone().ok_or(NodelinkError::NoAvailableNode)
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .field("node", &self.node())
            .finish()
    }
}
