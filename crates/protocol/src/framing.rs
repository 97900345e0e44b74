//! Frame codec for the backend connection.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: magic bytes "DPRT"
//! - 4 bytes: content length (big-endian, includes flags byte)
//! - 1 byte: flags (bit 0 = compressed)
//! - N bytes: payload (possibly LZ4 compressed)
//!
//! The magic and length form the fixed [`FRAME_PREFIX_SIZE`]-byte prefix that a
//! streaming reader pulls first; the content that follows is handed to
//! [`FrameCodec::decode_content`].

use crate::error::{ProtocolError, Result};

/// Magic bytes identifying a Driveport frame.
pub const FRAME_MAGIC: [u8; 4] = *b"DPRT";

/// Compression threshold in bytes. Payloads larger than this are compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Magic plus length.
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Prefix plus the flags byte.
pub const FRAME_HEADER_SIZE: usize = FRAME_PREFIX_SIZE + 1;

/// Flags carried in the byte after the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Flag indicating the payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    #[inline]
    fn compressed() -> Self {
        Self(Self::COMPRESSED)
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Whether to compress payloads above the threshold.
    compression_enabled: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with compression enabled.
    pub fn new() -> Self {
        Self {
            compression_enabled: true,
        }
    }

    /// Create a codec that never compresses outgoing frames.
    ///
    /// Compressed incoming frames are still decoded.
    pub fn without_compression() -> Self {
        Self {
            compression_enabled: false,
        }
    }

    /// Encode a payload into a complete frame.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut flags = FrameFlags::default();
        let mut compressed = None;
        if self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD {
            let candidate = lz4_flex::compress_prepend_size(payload);
            // Only worth it if it actually shrinks.
            if candidate.len() < payload.len() {
                flags = FrameFlags::compressed();
                compressed = Some(candidate);
            }
        }
        let body = compressed.as_deref().unwrap_or(payload);

        let content_len = 1 + body.len();
        let mut output = Vec::with_capacity(FRAME_PREFIX_SIZE + content_len);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(content_len as u32).to_be_bytes());
        output.push(flags.as_byte());
        output.extend_from_slice(body);
        Ok(output)
    }

    /// Validate a frame prefix and return the content length that follows it.
    pub fn parse_prefix(&self, prefix: &[u8; FRAME_PREFIX_SIZE]) -> Result<usize> {
        if prefix[0..4] != FRAME_MAGIC {
            return Err(ProtocolError::InvalidFrameMagic {
                expected: u32::from_be_bytes(FRAME_MAGIC),
                got: u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]),
            });
        }

        let content_len =
            u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;

        if FRAME_PREFIX_SIZE + content_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: FRAME_PREFIX_SIZE + content_len,
                max: MAX_FRAME_SIZE,
            });
        }
        if content_len < 1 {
            return Err(ProtocolError::Deserialization(
                "invalid frame: content length must be at least 1 for flags byte".to_string(),
            ));
        }

        Ok(content_len)
    }

    /// Decode frame content (flags byte plus payload) into the plain payload.
    pub fn decode_content(&self, content: &[u8]) -> Result<Vec<u8>> {
        let (flags, body) = content.split_first().ok_or_else(|| {
            ProtocolError::Deserialization("frame content is missing the flags byte".to_string())
        })?;

        if FrameFlags::from_byte(*flags).is_compressed() {
            lz4_flex::decompress_size_prepended(body).map_err(|e| {
                ProtocolError::Deserialization(format!("failed to decompress payload: {}", e))
            })
        } else {
            Ok(body.to_vec())
        }
    }

    /// Decode one frame from the start of `data`.
    ///
    /// Returns the payload and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Vec<u8>, usize)> {
        let prefix: &[u8; FRAME_PREFIX_SIZE] = data
            .get(..FRAME_PREFIX_SIZE)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| {
                ProtocolError::Deserialization(format!(
                    "insufficient data for frame header: need {} bytes, have {}",
                    FRAME_PREFIX_SIZE,
                    data.len()
                ))
            })?;

        let content_len = self.parse_prefix(prefix)?;
        let end = FRAME_PREFIX_SIZE + content_len;
        let content = data.get(FRAME_PREFIX_SIZE..end).ok_or_else(|| {
            ProtocolError::Deserialization(format!(
                "insufficient data for frame: need {} bytes, have {}",
                end,
                data.len()
            ))
        })?;

        Ok((self.decode_content(content)?, end))
    }
}
