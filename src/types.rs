use serde::{Deserialize, Serialize};

/// Guild identifier
pub type GuildId = u64;

/// An immutable track reference as understood by an audio node
///
/// `id` is the node's opaque base64 identifier; `info` is the decoded
/// metadata that travels alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Opaque base64-encoded track identifier
    #[serde(rename = "track")]
    pub id: String,

    /// Decoded track metadata
    pub info: TrackInfo,
}

/// Track metadata payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    pub author: String,

    /// Track length in milliseconds
    pub length: u64,

    /// Source-specific identifier (e.g. a video id)
    pub identifier: String,

    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub is_stream: bool,

    #[serde(default)]
    pub is_seekable: bool,

    /// Starting position reported by the node, in milliseconds
    #[serde(default)]
    pub position: u64,

    #[serde(default)]
    pub source_name: Option<String>,
}

impl Track {
    /// Guess the source of this track from its URI
    ///
    /// Falls back to the node-reported source name, then to "http".
    pub fn source(&self) -> &str {
        const KNOWN: [&str; 6] = ["bandcamp", "beam", "soundcloud", "twitch", "vimeo", "youtube"];

        if let Some(uri) = &self.info.uri {
            for source in KNOWN {
                if uri.contains(source) {
                    return source;
                }
            }
        }

        self.info.source_name.as_deref().unwrap_or("http")
    }
}

/// An ordered collection of tracks loaded as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,

    /// Index of the track selected when the playlist was loaded, if any
    pub selected_track: Option<usize>,

    pub tracks: Vec<Track>,
}

impl Playlist {
    /// The selected track, when the index is present and in bounds
    pub fn selected(&self) -> Option<&Track> {
        self.selected_track.and_then(|index| self.tracks.get(index))
    }
}

/// Point-in-time load snapshot pushed periodically by a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Total players the node is hosting
    #[serde(default)]
    pub players: u32,

    /// Players currently playing a track
    #[serde(default)]
    pub playing_players: u32,

    /// Node uptime in milliseconds
    #[serde(default)]
    pub uptime: u64,

    #[serde(default)]
    pub memory: MemoryStats,

    #[serde(default)]
    pub cpu: CpuStats,

    /// Only present once the node has sent audio frames
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    #[serde(default)]
    pub free: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub allocated: u64,
    #[serde(default)]
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub system_load: f64,
    #[serde(default)]
    pub lavalink_load: f64,
}

/// Per-minute frame accounting; -1 means the node has not measured yet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    #[serde(default)]
    pub sent: i64,
    #[serde(default)]
    pub nulled: i64,
    #[serde(default)]
    pub deficit: i64,
}

/// Voice-server credentials forwarded by the host application
///
/// The core never obtains these itself; the host relays them from its chat
/// gateway so the player can complete the voice handshake with its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    /// Voice server host; `None` while the server is being reallocated
    pub endpoint: Option<String>,
}
