use thiserror::Error;

/// Result type for nodelink operations
pub type Result<T> = std::result::Result<T, NodelinkError>;

/// Errors that can occur when coordinating audio nodes and players
#[derive(Error, Debug)]
pub enum NodelinkError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake with the node failed before the connection was usable
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// A command referenced a field outside its declared constraints
    /// and was never sent to the node
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A filter carried a parameter outside its valid range
    #[error("Invalid filter parameter: {filter}.{field}: {reason}")]
    FilterValidation {
        /// Filter kind the parameter belongs to
        filter: &'static str,
        /// Name of the offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The target node has no connected transport
    #[error("Node '{identifier}' is not connected")]
    NodeUnavailable {
        /// Identifier of the unavailable node
        identifier: String,
    },

    /// No connected node exists in the pool
    #[error("No available nodes")]
    NoAvailableNode,

    /// A node with this identifier is already registered
    #[error("Node '{identifier}' already exists")]
    NodeAlreadyExists {
        /// Identifier that collided
        identifier: String,
    },

    /// No node with this identifier is registered
    #[error("Node '{identifier}' was not found")]
    NodeNotFound {
        /// Identifier that was looked up
        identifier: String,
    },

    /// A player for this guild already exists
    #[error("Player for guild {guild_id} already exists")]
    PlayerAlreadyExists {
        /// Guild the duplicate player was requested for
        guild_id: u64,
    },

    /// No player exists for this guild
    #[error("No player for guild {guild_id}")]
    PlayerNotFound {
        /// Guild that was looked up
        guild_id: u64,
    },

    /// Operation on a player that has been torn down
    #[error("Player for guild {guild_id} has been destroyed")]
    PlayerDestroyed {
        /// Guild the destroyed player belonged to
        guild_id: u64,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event channel error (closed or lagged)
    #[error("Channel error: {0}")]
    ChannelError(String),
}
