//! Unified error handling for taslink.
//!
//! Each public surface gets its own error enum: connecting, the established
//! session (send/receive), internal event handling, start-script generation
//! and configuration loading. Nothing in this crate panics across the
//! library boundary.

use tas_proto::ProtocolError;
use thiserror::Error;

// ============================================================================
// Connection Errors
// ============================================================================

/// Errors from [`connect`](crate::LobbyClient::connect).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The session already holds a live connection. State is untouched.
    #[error("already connected")]
    AlreadyConnected,

    #[error("connect timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Session Errors (send / receive surface)
// ============================================================================

/// Errors from the established-session surface: sending commands, issuing
/// requests and driving [`receive`](crate::LobbyClient::receive).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    /// A TLS upgrade was requested while one is already in flight or done.
    #[error("tls upgrade already {0}")]
    TlsAlreadyRequested(&'static str),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Event Errors (internal handler outcomes)
// ============================================================================

/// Failures raised by the internal state handlers while applying a server
/// event.
///
/// These never abort a receive batch; they are forwarded to the
/// [`InconsistencySink`](crate::InconsistencySink) and folded into the batch
/// outcome. The `Healed` variant signals a violation the handler repaired
/// before completing (the event still took effect).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("{command}: missing argument")]
    MissingArgs {
        /// Command the short line carried.
        command: String,
    },

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("unknown battle: {0}")]
    UnknownBattle(u32),

    #[error("unknown bot in active battle: {0}")]
    UnknownBot(String),

    #[error("user already known: {0}")]
    DuplicateUser(String),

    #[error("channel already joined: {0}")]
    DuplicateChannel(String),

    #[error("battle already open: {0}")]
    DuplicateBattle(u32),

    #[error("bot already present: {0}")]
    DuplicateBot(String),

    #[error("{user} already in {target}")]
    AlreadyMember {
        /// User the event named.
        user: String,
        /// Channel or battle the event targeted.
        target: String,
    },

    #[error("{user} not in {target}")]
    NotMember {
        /// User the event named.
        user: String,
        /// Channel or battle the event targeted.
        target: String,
    },

    #[error("{0} while not in a battle")]
    NotInBattle(String),

    #[error("{0} while already in a battle")]
    AlreadyInBattle(String),

    /// Ordering violation repaired by synthesizing the missed events.
    #[error("healed inconsistency: {0}")]
    Healed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for internal event handlers.
pub type EventResult = Result<(), EventError>;

// ============================================================================
// Start-Script Errors
// ============================================================================

/// Errors from [`start_script`](crate::LobbyClient::start_script).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// Neither a stored running-battle snapshot nor a live active battle
    /// exists. No partial document is produced.
    #[error("no battle data to generate a start script from")]
    NoBattle,
}

// ============================================================================
// Config Errors
// ============================================================================

/// Errors from [`ClientConfig::load`](crate::config::ClientConfig::load).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Disconnect Reasons
// ============================================================================

/// Why an established session ended, as reported by
/// [`ReceiveOutcome::Disconnected`](crate::ReceiveOutcome::Disconnected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection (zero-length read).
    PeerClosed,
    /// A read failed mid-session.
    ReadFailed(String),
    /// A line exceeded the configured length ceiling.
    OversizedLine,
    /// The TLS handshake failed after the upgrade had begun; the
    /// half-upgraded channel cannot be rolled back.
    HandshakeFailed(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "connection closed by server"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::OversizedLine => write!(f, "oversized line from server"),
            Self::HandshakeFailed(e) => write!(f, "tls handshake failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_display() {
        assert_eq!(
            EventError::UnknownUser("Ghost".into()).to_string(),
            "unknown user: Ghost"
        );
        assert_eq!(
            EventError::MissingArgs {
                command: "JOINEDBATTLE".into()
            }
            .to_string(),
            "JOINEDBATTLE: missing argument"
        );
        assert_eq!(
            EventError::NotInBattle("CLIENTBATTLESTATUS".into()).to_string(),
            "CLIENTBATTLESTATUS while not in a battle"
        );
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: EventError = ProtocolError::EmptyLine.into();
        assert!(matches!(err, EventError::Protocol(_)));
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::PeerClosed.to_string(),
            "connection closed by server"
        );
        assert_eq!(
            DisconnectReason::HandshakeFailed("bad cert".into()).to_string(),
            "tls handshake failed: bad cert"
        );
    }
}
