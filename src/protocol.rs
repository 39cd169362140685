use crate::error::{NodelinkError, Result};
use crate::filters::FilterChain;
use crate::types::{Stats, VoiceServerUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound of the node's volume scale
pub const MAX_VOLUME: u16 = 1000;

/// Command sent to a node over its control connection
///
/// Serialized as `{"op": "...", "guildId": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum OutgoingMessage {
    #[serde(rename = "voiceUpdate", rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        /// Verbatim voice-server event from the host's chat gateway
        event: VoiceServerUpdate,
    },

    #[serde(rename = "play", rename_all = "camelCase")]
    Play {
        guild_id: String,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        /// Advisory; the node decides whether to ignore the play if a
        /// track is already running
        #[serde(skip_serializing_if = "Option::is_none")]
        no_replace: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pause: Option<bool>,
    },

    #[serde(rename = "stop", rename_all = "camelCase")]
    Stop { guild_id: String },

    #[serde(rename = "pause", rename_all = "camelCase")]
    Pause { guild_id: String, pause: bool },

    #[serde(rename = "seek", rename_all = "camelCase")]
    Seek { guild_id: String, position: u64 },

    #[serde(rename = "volume", rename_all = "camelCase")]
    Volume { guild_id: String, volume: u16 },

    #[serde(rename = "filters", rename_all = "camelCase")]
    Filters {
        guild_id: String,
        #[serde(flatten)]
        chain: FilterChain,
    },

    #[serde(rename = "destroy", rename_all = "camelCase")]
    Destroy { guild_id: String },
}

impl OutgoingMessage {
    /// Check declared field constraints; a failing command is never sent
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Play { start_time: Some(start), end_time: Some(end), .. } if start > end => {
                Err(NodelinkError::Encoding(format!(
                    "startTime {start} is past endTime {end}"
                )))
            }
            Self::Volume { volume, .. } if *volume > MAX_VOLUME => Err(NodelinkError::Encoding(
                format!("volume {volume} outside 0..={MAX_VOLUME}"),
            )),
            Self::Filters { chain, .. } => chain.validate(),
            _ => Ok(()),
        }
    }
}

/// Validate and serialize a command for the wire
pub fn encode(message: &OutgoingMessage) -> Result<String> {
    message.validate()?;
    Ok(serde_json::to_string(message)?)
}

/// State block of a `playerUpdate` push; the node's authoritative view
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Node-side unix timestamp in milliseconds
    #[serde(default)]
    pub time: u64,
    /// Playback position in milliseconds; absent when nothing is playing
    #[serde(default)]
    pub position: Option<u64>,
    /// Whether the node's voice connection for this guild is up
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerUpdateState,
}

/// Why a track stopped playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
    #[serde(other)]
    Unknown,
}

impl TrackEndReason {
    /// Whether the node considers it safe to start another track
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Detail block of a `TrackExceptionEvent`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Asynchronous event pushed by a node, tagged by `type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String, track: String },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        track: String,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        track: String,
        /// Older nodes send a bare `error` string instead of `exception`
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exception: Option<TrackExceptionDetail>,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: String,
        track: String,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebsocketClosed {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl EventPayload {
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebsocketClosed { guild_id, .. } => guild_id,
        }
    }
}

const KNOWN_EVENT_TYPES: [&str; 5] = [
    "TrackStartEvent",
    "TrackEndEvent",
    "TrackExceptionEvent",
    "TrackStuckEvent",
    "WebSocketClosedEvent",
];

/// A decoded inbound message
///
/// Unrecognized `op` or event `type` tags decode to [`Unknown`] rather than
/// failing, so protocol additions on the node side stay non-fatal.
///
/// [`Unknown`]: IncomingMessage::Unknown
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    PlayerUpdate(PlayerUpdate),
    Stats(Stats),
    Event(EventPayload),
    Unknown { op: String, payload: Value },
}

/// Decode one inbound text frame
///
/// Fails only on malformed JSON or a malformed payload for a recognized tag;
/// callers log and drop such frames.
pub fn decode(text: &str) -> Result<IncomingMessage> {
    let value: Value = serde_json::from_str(text)?;

    let op = match value.get("op").and_then(Value::as_str) {
        Some(op) => op.to_string(),
        None => return Ok(IncomingMessage::Unknown { op: String::new(), payload: value }),
    };

    match op.as_str() {
        "playerUpdate" => Ok(IncomingMessage::PlayerUpdate(serde_json::from_value(value)?)),
        "stats" => Ok(IncomingMessage::Stats(serde_json::from_value(value)?)),
        "event" => {
            let known = value
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| KNOWN_EVENT_TYPES.contains(&kind));
            if !known {
                return Ok(IncomingMessage::Unknown { op, payload: value });
            }
            Ok(IncomingMessage::Event(serde_json::from_value(value)?))
        }
        _ => Ok(IncomingMessage::Unknown { op, payload: value }),
    }
}
