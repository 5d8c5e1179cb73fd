//! Unified error types for rtmp-server
//!
//! Errors are split by the layer that raises them. Anything surfacing as
//! [`Error`] from a session loop terminates that session; registry failures
//! ([`RegistryError`]) are command-level and get reported back to the peer.

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all RTMP operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Stream registry refused an operation
    Registry(RegistryError),
    /// Connection rejected by peer or handler
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Rejected(msg) => write!(f, "Connection rejected: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    /// Type 1/2/3 chunk on a chunk stream that never carried a type 0 header
    MissingChunkHeader(u32),
    MessageTooLarge { size: u32, max: u32 },
    InvalidChunkStreamId(u32),
    /// Peer announced a chunk size we refuse to buffer
    ChunkSizeTooLarge { size: u32, max: u32 },
    InvalidChunkSize(u32),
    UnexpectedMessage(String),
    InvalidCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MissingChunkHeader(csid) => {
                write!(f, "No previous header for chunk stream {}", csid)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkStreamId(id) => write!(f, "Invalid chunk stream ID: {}", id),
            ProtocolError::ChunkSizeTooLarge { size, max } => {
                write!(f, "Chunk size too large: {} (max {})", size, max)
            }
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidReference(u16),
    NestingTooDeep,
    InvalidObjectEnd,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidReference(idx) => write!(f, "Invalid AMF reference: {}", idx),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidState,
    /// A C0/C1/C2 block arrived with the wrong size
    InvalidPacketSize { expected: usize, actual: usize },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
            HandshakeError::InvalidPacketSize { expected, actual } => {
                write!(f, "Invalid handshake packet: {} bytes (expected {})", actual, expected)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Stream registry errors
///
/// These never terminate a session. The connection turns them into an
/// `onStatus` error for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another session already publishes this path
    AlreadyPublishing(String),
    /// No publisher exists for this path
    StreamNotFound(String),
    /// This session already subscribes to this path
    AlreadySubscribing(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyPublishing(path) => {
                write!(f, "Stream already exists: {}", path)
            }
            RegistryError::StreamNotFound(path) => write!(f, "Stream doesn't exist: {}", path),
            RegistryError::AlreadySubscribing(path) => {
                write!(f, "Already subscribing to {}", path)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::MissingChunkHeader(7));
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("chunk stream 7"));

        let err = Error::Protocol(ProtocolError::ChunkSizeTooLarge {
            size: 1 << 20,
            max: 65536,
        });
        assert!(err.to_string().contains("65536"));

        let err = Error::Amf(AmfError::UnknownMarker(0xFF));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Handshake(HandshakeError::InvalidPacketSize {
            expected: 1536,
            actual: 12,
        });
        assert!(err.to_string().contains("Handshake error"));
        assert!(err.to_string().contains("1536"));

        let err = Error::Registry(RegistryError::AlreadyPublishing("/live/demo".into()));
        assert!(err.to_string().contains("already exists"));
        assert!(err.to_string().contains("/live/demo"));

        let err = Error::Rejected("bad key".into());
        assert!(err.to_string().contains("bad key"));

        assert!(Error::Timeout.to_string().contains("timed out"));
        assert!(Error::ConnectionClosed.to_string().contains("closed"));
        assert!(Error::Config("x".into()).to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());

        let err = Error::Registry(RegistryError::StreamNotFound("/a/b".into()));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = RegistryError::AlreadySubscribing("/a/b".into()).into();
        assert!(matches!(err, Error::Registry(RegistryError::AlreadySubscribing(_))));

        let err: Error = ProtocolError::InvalidChunkSize(0).into();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidChunkSize(0))));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(AmfError::UnexpectedEof)));

        let err: Error = HandshakeError::InvalidState.into();
        assert!(matches!(err, Error::Handshake(HandshakeError::InvalidState)));
    }
}
