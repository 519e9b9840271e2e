//! Error types for protocol operations

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the PSI and aggregation protocols
#[derive(Debug, Error)]
pub enum Error {
    /// Truncated length prefix or payload, or an oversize frame
    #[error("Framing error: {0}")]
    Framing(String),

    /// Unknown command, unexpected message shape, or a field mismatch
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A received x-coordinate could not be used as a curve point
    #[error("Malformed point: {0}")]
    MalformedPoint(String),

    /// An x-coordinate has no square root on the curve
    #[error("x-coordinate is not on the curve")]
    NotOnCurve,

    /// Scalar multiplication yielded the point at infinity
    #[error("Point at infinity")]
    PointAtInfinity,

    /// An identifier hashed to the zero scalar
    #[error("Identifier hashed to the zero scalar")]
    ZeroScalar,

    /// CKKS context or ciphertext could not be built or deserialized
    #[error("Crypto context error: {0}")]
    CryptoContext(String),

    /// An operation was attempted before its predecessor completed
    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    /// The aggregation ID list does not line up with the responder table
    #[error("Alignment error: {0}")]
    Alignment(String),

    /// Socket error, peer reset, or timeout
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Wire-visible error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Framing,
    Protocol,
    MalformedPoint,
    CryptoContext,
    PreconditionUnmet,
    Alignment,
    Transport,
}

impl ErrorKind {
    /// Name used in wire error responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Framing => "Framing",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::MalformedPoint => "MalformedPoint",
            ErrorKind::CryptoContext => "CryptoContext",
            ErrorKind::PreconditionUnmet => "PreconditionUnmet",
            ErrorKind::Alignment => "Alignment",
            ErrorKind::Transport => "Transport",
        }
    }

    /// Whether the connection stays open after reporting this error.
    ///
    /// Framing and protocol errors close the connection; transport errors
    /// already mean the connection is gone.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedPoint
                | ErrorKind::CryptoContext
                | ErrorKind::PreconditionUnmet
                | ErrorKind::Alignment
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for wire reporting and exit-code mapping
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Framing(_) => ErrorKind::Framing,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::MalformedPoint(_)
            | Error::NotOnCurve
            | Error::PointAtInfinity
            | Error::ZeroScalar => ErrorKind::MalformedPoint,
            Error::CryptoContext(_) => ErrorKind::CryptoContext,
            Error::PreconditionUnmet(_) => ErrorKind::PreconditionUnmet,
            Error::Alignment(_) => ErrorKind::Alignment,
            Error::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Rebuild an error from a wire error response
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "Framing" => Error::Framing(message),
            "Protocol" => Error::Protocol(message),
            "MalformedPoint" => Error::MalformedPoint(message),
            "CryptoContext" => Error::CryptoContext(message),
            "PreconditionUnmet" => Error::PreconditionUnmet(message),
            "Alignment" => Error::Alignment(message),
            "Transport" => Error::Transport(message),
            other => Error::Protocol(format!("unknown error kind {other:?}: {message}")),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_failures_map_to_malformed_point() {
        assert_eq!(Error::NotOnCurve.kind(), ErrorKind::MalformedPoint);
        assert_eq!(Error::PointAtInfinity.kind(), ErrorKind::MalformedPoint);
        assert_eq!(Error::ZeroScalar.kind(), ErrorKind::MalformedPoint);
    }

    #[test]
    fn wire_round_trip_preserves_kind() {
        let original = Error::Alignment("id missing".into());
        let kind = original.kind();
        let rebuilt = Error::from_wire(kind.as_str(), "id missing".into());
        assert_eq!(rebuilt.kind(), kind);
    }

    #[test]
    fn framing_and_protocol_close_the_connection() {
        assert!(!ErrorKind::Framing.recoverable());
        assert!(!ErrorKind::Protocol.recoverable());
        assert!(!ErrorKind::Transport.recoverable());
        assert!(ErrorKind::Alignment.recoverable());
        assert!(ErrorKind::MalformedPoint.recoverable());
    }
}
