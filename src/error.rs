//! Error types. [`ServerError`] covers conditions fatal to a connection or
//! to the process; [`RoomError`] covers ordinary validation failures that
//! become a `Failed(reason)` reply rather than closing anything.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors that end a connection or abort startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("identity service request failed: {0}")]
    IdentityRequest(#[from] reqwest::Error),

    #[error("identity service returned malformed json: {0}")]
    IdentityJson(#[from] serde_json::Error),

    #[error("protocol handshake timed out")]
    HandshakeTimeout,

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("message read timed out")]
    ReadTimeout,

    #[error("connection idle for too long")]
    IdleTimeout,

    #[error("monitors file {path} could not be read: {source}")]
    MonitorsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("packet received before authentication")]
    UnauthenticatedPacket,

    #[error("identity lookup failed: {0}")]
    IdentityLookupFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Non-fatal validation failures, surfaced to the caller as the wire reason
/// string of a `Failed` reply. Every variant's [`RoomError::reason`] is a raw
/// localisation key, never pre-rendered prose.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    #[error("room_already_exist")]
    RoomAlreadyExists,

    #[error("room_duplicate_create")]
    RoomDuplicateCreate,

    #[error("room_not_found")]
    RoomNotFound,

    #[error("not_in_room")]
    NotInRoom,

    #[error("not_host")]
    NotHost,

    #[error("room_already_locked")]
    RoomAlreadyLocked,

    #[error("room_already_unlocked")]
    RoomAlreadyUnlocked,

    #[error("room_already_cycled")]
    RoomAlreadyCycled,

    #[error("room_already_not_cycled")]
    RoomAlreadyNotCycled,

    #[error("room_in_ready_state")]
    RoomInReadyState,

    #[error("invalid_room_state")]
    InvalidRoomState,

    #[error("chart_not_selected")]
    ChartNotSelected,

    #[error("chart_not_found")]
    ChartNotFound,

    #[error("record_not_found")]
    RecordNotFound,

    #[error("target_not_in_room")]
    TargetNotInRoom,
}

impl RoomError {
    /// The raw reason key written into a `Failed` reply's payload.
    pub fn reason(self) -> &'static str {
        match self {
            Self::RoomAlreadyExists => "room_already_exist",
            Self::RoomDuplicateCreate => "room_duplicate_create",
            Self::RoomNotFound => "room_not_found",
            Self::NotInRoom => "not_in_room",
            Self::NotHost => "not_host",
            Self::RoomAlreadyLocked => "room_already_locked",
            Self::RoomAlreadyUnlocked => "room_already_unlocked",
            Self::RoomAlreadyCycled => "room_already_cycled",
            Self::RoomAlreadyNotCycled => "room_already_not_cycled",
            Self::RoomInReadyState => "room_in_ready_state",
            Self::InvalidRoomState => "invalid_room_state",
            Self::ChartNotSelected => "chart_not_selected",
            Self::ChartNotFound => "chart_not_found",
            Self::RecordNotFound => "record_not_found",
            Self::TargetNotInRoom => "target_not_in_room",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn reason_matches_display() {
        assert_eq!(RoomError::NotHost.reason(), RoomError::NotHost.to_string());
        assert_eq!(
            RoomError::RoomAlreadyCycled.reason(),
            "room_already_cycled"
        );
    }
}
