use crate::connection::{Connection, ConnectionSignal, ConnectionState};
use crate::error::Result;
use crate::protocol::OutgoingMessage;
use crate::types::{GuildId, Stats};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

/// A node that dropped recently keeps this penalty until the cooldown
/// lapses, so assignment does not flap straight back onto it
const FAILURE_COOLDOWN: Duration = Duration::from_secs(30);
const FAILURE_PENALTY: i32 = 600;

/// Identity and credentials of one external audio node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique name for this node within the pool
    pub identifier: String,
    pub host: String,
    pub port: u16,
    /// Password presented in the `Authorization` handshake header
    pub password: String,
    /// The host application's user id, presented as `User-Id`
    pub user_id: u64,
}

impl NodeConfig {
    pub(crate) fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// One registered audio node: its connection, last stats snapshot, and the
/// set of guilds whose players it currently serves
pub struct Node {
    config: NodeConfig,
    connection: Arc<Connection>,
    stats: Mutex<Option<Stats>>,
    guilds: Mutex<HashSet<GuildId>>,
    last_failure: Mutex<Option<Instant>>,
}

impl Node {
    pub(crate) fn new(config: NodeConfig) -> Arc<Self> {
        let connection = Connection::spawn(config.clone());
        Arc::new(Self {
            config,
            connection,
            stats: Mutex::new(None),
            guilds: Mutex::new(HashSet::new()),
            last_failure: Mutex::new(None),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Last stats snapshot pushed by the node, if any
    pub fn stats(&self) -> Option<Stats> {
        self.stats.lock().unwrap().clone()
    }

    /// Number of guilds assigned to this node
    pub fn player_count(&self) -> usize {
        self.guilds.lock().unwrap().len()
    }

    /// Heuristic load score; lower is better. Connected state is checked
    /// separately by the pool.
    pub fn penalty(&self) -> i32 {
        let mut total = match &*self.stats.lock().unwrap() {
            Some(stats) => penalty_from_stats(stats),
            None => self.player_count() as i32,
        };
        if self.cooldown_active() {
            total = total.saturating_add(FAILURE_PENALTY);
        }
        total
    }

    pub(crate) fn set_stats(&self, stats: Stats) {
        *self.stats.lock().unwrap() = Some(stats);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.connection.subscribe()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub(crate) fn watch_shutdown(&self) -> watch::Receiver<bool> {
        self.connection.watch_shutdown()
    }

    pub(crate) fn send(&self, message: &OutgoingMessage) -> Result<()> {
        self.connection.send(message)
    }

    pub(crate) fn register_guild(&self, guild_id: GuildId) {
        self.guilds.lock().unwrap().insert(guild_id);
    }

    pub(crate) fn unregister_guild(&self, guild_id: GuildId) {
        self.guilds.lock().unwrap().remove(&guild_id);
    }

    /// Take every assigned guild; used when the node goes down and its
    /// players must fail over
    pub(crate) fn drain_guilds(&self) -> Vec<GuildId> {
        self.guilds.lock().unwrap().drain().collect()
    }

    pub(crate) fn note_failure(&self) {
        *self.last_failure.lock().unwrap() = Some(Instant::now());
    }

    pub(crate) async fn close(&self) {
        self.connection.close().await;
    }

    fn cooldown_active(&self) -> bool {
        self.last_failure
            .lock()
            .unwrap()
            .is_some_and(|at| at.elapsed() < FAILURE_COOLDOWN)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.config.identifier)
            .field("connected", &self.is_connected())
            .field("players", &self.player_count())
            .finish()
    }
}

/// Standard Lavalink penalty terms: players playing, CPU pressure, and
/// frame deficit/null pressure when the node reports frame stats
fn penalty_from_stats(stats: &Stats) -> i32 {
    let playing = stats.playing_players as i32;
    let cpu = (1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0) as i32;

    let mut total = playing.saturating_add(cpu);

    if let Some(frames) = &stats.frame_stats {
        if frames.deficit > 0 {
            let deficit =
                (1.03f64.powf(500.0 * frames.deficit as f64 / 3000.0) * 600.0 - 600.0) as i32;
            total = total.saturating_add(deficit);
        }
        if frames.nulled > 0 {
            let nulled =
                ((1.03f64.powf(500.0 * frames.nulled as f64 / 3000.0) * 600.0 - 600.0) * 2.0) as i32;
            total = total.saturating_add(nulled);
        }
    }

    total
}
