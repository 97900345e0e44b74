//! Errors raised while encoding, framing or moving backend messages.

use thiserror::Error;

/// Everything that can go wrong between a [`crate::Message`] and the socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MessagePack encoding of an outgoing envelope failed.
    #[error("could not encode message: {0}")]
    Serialization(String),

    /// Bytes from the backend did not decode into the expected shape.
    #[error("could not decode message: {0}")]
    Deserialization(String),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// The 4-byte prefix was not `DPRT`.
    #[error("bad frame magic {got:#010x} (want {expected:#010x})")]
    InvalidFrameMagic { expected: u32, got: u32 },

    #[error("envelope version {got} not supported (want {expected})")]
    UnsupportedVersion { expected: u8, got: u8 },

    /// The backend hung up, possibly in the middle of a frame.
    #[error("backend closed the connection: {0}")]
    ConnectionClosed(String),

    #[error("backend i/o timed out: {0}")]
    Timeout(String),

    #[error("backend i/o failed: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;

        let detail = err.to_string();
        match err.kind() {
            TimedOut => Self::Timeout(detail),
            UnexpectedEof | BrokenPipe | ConnectionReset | ConnectionAborted => {
                Self::ConnectionClosed(detail)
            }
            _ => Self::Transport(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_frame_errors_name_the_numbers() {
        let oversized = ProtocolError::FrameTooLarge {
            size: 17_000_000,
            max: 16_777_216,
        };
        assert_eq!(
            oversized.to_string(),
            "frame of 17000000 bytes exceeds the 16777216 byte limit"
        );

        let magic = ProtocolError::InvalidFrameMagic {
            expected: 0x4450_5254,
            got: 0x4854_5450,
        };
        assert_eq!(
            magic.to_string(),
            "bad frame magic 0x48545450 (want 0x44505254)"
        );
    }

    #[test]
    fn test_version_mismatch_message() {
        let err = ProtocolError::UnsupportedVersion {
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "envelope version 2 not supported (want 1)");
    }

    #[test]
    fn test_truncated_msgpack_is_a_decode_error() {
        // fixmap with one entry and nothing after it
        let err = rmp_serde::from_slice::<std::collections::BTreeMap<String, u32>>(&[0x81])
            .unwrap_err();
        assert!(matches!(
            ProtocolError::from(err),
            ProtocolError::Deserialization(_)
        ));
    }

    #[test]
    fn test_io_error_kinds() {
        let cases = [
            (io::ErrorKind::TimedOut, "timeout"),
            (io::ErrorKind::UnexpectedEof, "closed"),
            (io::ErrorKind::ConnectionReset, "closed"),
            (io::ErrorKind::ConnectionRefused, "transport"),
        ];

        for (kind, expected) in cases {
            let got = match ProtocolError::from(io::Error::new(kind, "x")) {
                ProtocolError::Timeout(_) => "timeout",
                ProtocolError::ConnectionClosed(_) => "closed",
                ProtocolError::Transport(_) => "transport",
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(got, expected, "{kind:?}");
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<ProtocolError>();
    }
}
