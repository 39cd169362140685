//! Rust client library for coordinating Lavalink and Andesite audio nodes
//!
//! This library manages a pool of audio node connections and a registry of
//! per-guild players on top of them. It supports:
//!
//! - Persistent WebSocket connections with reconnect and heartbeat
//! - Penalty-based node selection from live node stats
//! - Per-guild player state machines (play, pause, seek, volume)
//! - Audio filter chains (equalizer, karaoke, timescale, tremolo, vibrato)
//! - Typed playback and node lifecycle event streams
//! - Automatic player failover when a node goes down
//! - A client-side track queue with history, looping, and shuffling
//!
//! # Quick Start
//!
//! ```no_run
//! use nodelink::{Client, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new();
//!     client.add_node(NodeConfig {
//!         identifier: "main".to_string(),
//!         host: "localhost".to_string(),
//!         port: 2333,
//!         password: "youshallnotpass".to_string(),
//!         user_id: 651_250_868_166_426_380,
//!     })?;
//!
//!     let player = client.create_player(490_277_969_483_327_498)?;
//!
//!     // Voice credentials arrive from the host's chat gateway.
//!     player.voice_state_update("session", Some(123))?;
//!
//!     let mut events = client.subscribe_players();
//!     while let Ok(event) = events.recv().await {
//!         println!("player event: {:?}", event);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Node registration and player lifecycle
//! - **Pool**: Penalty-based node selection and failover targets
//! - **Player**: Per-guild playback state machine
//! - **Node**: One remote process, its stats and its guild set
//! - **Connection**: Low-level WebSocket transport with reconnect
//! - **Protocol**: JSON wire messages
//! - **Filters**: Audio filter chain construction and validation
//! - **Queue**: Client-side upcoming-track bookkeeping
//! - **Events**: Typed event streams for playback and node lifecycle

mod client;
mod connection;
mod dispatcher;
mod error;
mod events;
mod filters;
mod node;
mod player;
mod pool;
mod protocol;
mod queue;
mod types;

// Public exports
pub use client::Client;
pub use connection::ConnectionState;
pub use error::{NodelinkError, Result};
pub use events::{EventReceiver, NodeEvent, PlayerEvent};
pub use filters::{
    Band, Equalizer, FilterChain, Karaoke, Timescale, Tremolo, Vibrato, EQUALIZER_BANDS,
};
pub use node::{Node, NodeConfig};
pub use player::{PlayOptions, Player, PlayerState};
pub use protocol::{TrackEndReason, MAX_VOLUME};
pub use queue::{LoopMode, Queue};
pub use types::{
    CpuStats, FrameStats, GuildId, MemoryStats, Playlist, Stats, Track, TrackInfo,
    VoiceServerUpdate,
};
