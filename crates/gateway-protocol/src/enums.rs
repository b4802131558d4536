use serde::{Deserialize, Serialize};

/// Per-stream lifecycle state (§4.3). Transitions are owned exclusively by
/// the stream's actor; this type is the wire/DB projection of that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "stream_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Initializing,
    Ready,
    Live,
    Error,
    Stopped,
    Closed,
}

impl StreamState {
    /// Non-terminal states count toward the "at most one active Stream per
    /// Device" invariant (§3) and gate the `reconnect` flag (§9 open question).
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "consumer_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Pending,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Ready,
    Failed,
}

/// Whether a snapshot/bookmark job reads off the live ingress pipe or the
/// HLS archive (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "extraction_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Live,
    Historical,
}

/// The fixed scope set a Client may hold (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    StreamsRead,
    StreamsWrite,
    StreamsConsume,
    SnapshotsRead,
    SnapshotsWrite,
    BookmarksRead,
    BookmarksWrite,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::StreamsRead => "streams:read",
            Scope::StreamsWrite => "streams:write",
            Scope::StreamsConsume => "streams:consume",
            Scope::SnapshotsRead => "snapshots:read",
            Scope::SnapshotsWrite => "snapshots:write",
            Scope::BookmarksRead => "bookmarks:read",
            Scope::BookmarksWrite => "bookmarks:write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "streams:read" => Scope::StreamsRead,
            "streams:write" => Scope::StreamsWrite,
            "streams:consume" => Scope::StreamsConsume,
            "snapshots:read" => Scope::SnapshotsRead,
            "snapshots:write" => Scope::SnapshotsWrite,
            "bookmarks:read" => Scope::BookmarksRead,
            "bookmarks:write" => Scope::BookmarksWrite,
            _ => return None,
        })
    }
}
