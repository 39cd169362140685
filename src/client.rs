use crate::dispatcher;
use crate::error::{NodelinkError, Result};
use crate::events::{EventBus, EventReceiver, NodeEvent, PlayerEvent};
use crate::node::{Node, NodeConfig};
use crate::player::Player;
use crate::pool::NodePool;
use crate::types::GuildId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// State shared between the client handle and the dispatcher tasks
pub(crate) struct ClientInner {
    pub(crate) pool: NodePool,
    pub(crate) players: Mutex<HashMap<GuildId, Arc<Player>>>,
    pub(crate) events: EventBus,
}

impl ClientInner {
    pub(crate) fn player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.lock().unwrap().get(&guild_id).cloned()
    }
}

/// Entry point for coordinating audio nodes and per-guild players
///
/// Cheap to clone; all clones share the same node pool, player registry,
/// and event channels.
///
/// ```no_run
/// use nodelink::{Client, NodeConfig};
///
/// # async fn example() -> nodelink::Result<()> {
/// let client = Client::new();
/// client.add_node(NodeConfig {
///     identifier: "main".to_string(),
///     host: "localhost".to_string(),
///     port: 2333,
///     password: "youshallnotpass".to_string(),
///     user_id: 1234,
/// })?;
///
/// let player = client.create_player(5678)?;
/// let mut events = client.subscribe_players();
/// # let _ = (player, events.recv().await);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClientInner {
                pool: NodePool::new(),
                players: Mutex::new(HashMap::new()),
                events: EventBus::new(),
            }),
        }
    }

    /// Register a node and start connecting to it in the background
    ///
    /// The returned handle reflects connection state as it changes; the
    /// node participates in player assignment once connected.
    pub fn add_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let node = self.inner.pool.register(config)?;
        dispatcher::spawn(node.clone(), self.inner.clone());
        tracing::info!(node = node.identifier(), "node registered");
        Ok(node)
    }

    /// Unregister a node and close its connection
    ///
    /// Players assigned to it are failed over to the remaining nodes as
    /// if the node had dropped.
    pub async fn remove_node(&self, identifier: &str) -> Result<()> {
        let node = self.inner.pool.remove(identifier)?;
        node.close().await;
        tracing::info!(node = identifier, "node removed");
        Ok(())
    }

    pub fn get_node(&self, identifier: &str) -> Option<Arc<Node>> {
        self.inner.pool.get(identifier)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.pool.nodes()
    }

    /// Create a player for a guild on the best available node
    ///
    /// At most one player may exist per guild at a time.
    pub fn create_player(&self, guild_id: GuildId) -> Result<Arc<Player>> {
        let mut players = self.inner.players.lock().unwrap();
        if players.contains_key(&guild_id) {
            return Err(NodelinkError::PlayerAlreadyExists { guild_id });
        }

        let node = self.inner.pool.assign(guild_id)?;
        let player = Player::new(guild_id, node.clone());
        players.insert(guild_id, player.clone());
        tracing::info!(guild_id, node = node.identifier(), "player created");
        Ok(player)
    }

    pub fn get_player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.inner.player(guild_id)
    }

    /// Tear down a guild's player and forget it
    pub fn destroy_player(&self, guild_id: GuildId) -> Result<()> {
        let player = self
            .inner
            .players
            .lock()
            .unwrap()
            .remove(&guild_id)
            .ok_or(NodelinkError::PlayerNotFound { guild_id })?;
        // Already-destroyed players just get dropped from the registry.
        match player.destroy() {
            Ok(()) | Err(NodelinkError::PlayerDestroyed { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Subscribe to playback events from every player
    pub fn subscribe_players(&self) -> EventReceiver<PlayerEvent> {
        self.inner.events.subscribe_players()
    }

    /// Subscribe to node lifecycle and stats events
    pub fn subscribe_nodes(&self) -> EventReceiver<NodeEvent> {
        self.inner.events.subscribe_nodes()
    }

    /// Destroy every player, then close every node connection
    pub async fn shutdown(&self) {
        let players: Vec<_> = self.inner.players.lock().unwrap().drain().collect();
        for (guild_id, player) in players {
            if let Err(err) = player.destroy() {
                tracing::debug!(guild_id, %err, "player teardown during shutdown");
            }
        }

        for node in self.inner.pool.drain() {
            node.close().await;
        }
        tracing::info!("client shut down");
    }
}
