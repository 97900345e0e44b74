//! # Driveport Protocol Library
//!
//! This crate defines the wire protocol spoken between the Driveport gateway
//! and the secure file-storage backend it fronts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Request / Response / chunk messages   │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  Length-prefixed, LZ4
//! ├─────────────────────────────────────────┤
//! │        Transport (TCP, optional TLS)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use protocol::{Auth, Envelope, FrameCodec, Message, Request};
//!
//! let auth = Auth::UserPassword {
//!     username: "alice".to_string(),
//!     password: "secret".to_string(),
//! };
//! let request = Request::new(auth, "login", Duration::from_secs(5));
//!
//! let bytes = Envelope::new(Message::Request(request)).to_msgpack().unwrap();
//! let frame = FrameCodec::new().encode(&bytes).unwrap();
//! assert_eq!(&frame[..4], b"DPRT");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`value`]: Dynamic parameter and data values
//! - [`framing`]: Frame codec with compression
//! - [`transport`]: Async message stream over any byte stream
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;
pub mod transport;
pub mod value;

pub use error::{ProtocolError, Result};
pub use framing::{
    FrameCodec, FrameFlags, COMPRESSION_THRESHOLD, FRAME_HEADER_SIZE, FRAME_MAGIC,
    FRAME_PREFIX_SIZE, MAX_FRAME_SIZE,
};
pub use messages::{
    Auth, ChunkCount, ChunkData, ChunkInfo, Envelope, InfoData, ListDirData, ListEntry, LoginData,
    Message, PathStat, Request, Response, StatData, TransferFooter, TransferHeader,
    CODE_AUTH_REQUIRED, CODE_OK, PROTOCOL_VERSION, SESSION_ID_LENGTH,
};
pub use transport::FramedStream;
pub use value::{Value, ValueMap};
