//! Backend protocol message definitions.
//!
//! Every frame on a backend connection carries one MessagePack-encoded
//! [`Envelope`]. A plain command is a single [`Request`] answered by a single
//! [`Response`]. A streaming command (`readfiles`) is answered by a
//! [`TransferHeader`], then a [`ChunkInfo`]/[`ChunkData`] pair per chunk, then a
//! [`TransferFooter`], and finally the [`Response`] carrying the status code.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::value::{Value, ValueMap};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of a backend session identifier in bytes.
pub const SESSION_ID_LENGTH: usize = 16;

/// Status code for a successful command.
pub const CODE_OK: i32 = 0;

/// Status code the backend uses when credentials are missing, invalid or expired.
pub const CODE_AUTH_REQUIRED: i32 = 6;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    /// Serialize to MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(ProtocolError::from)
    }

    /// Deserialize from MessagePack, rejecting foreign protocol versions.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = rmp_serde::from_slice(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

/// Top-level message enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Command sent by the gateway.
    Request(Request),
    /// Status reply to a command.
    Response(Response),
    /// Declares the chunk counts of a streaming transfer.
    TransferHeader(TransferHeader),
    /// Announces the next chunk's path and size.
    ChunkInfo(ChunkInfo),
    /// The bytes of the announced chunk.
    ChunkData(ChunkData),
    /// Closes the chunk stream.
    TransferFooter(TransferFooter),
}

impl Message {
    /// Short name used in logs and protocol violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::TransferHeader(_) => "transfer header",
            Message::ChunkInfo(_) => "chunk info",
            Message::ChunkData(_) => "chunk data",
            Message::TransferFooter(_) => "transfer footer",
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Credentials attached to a request. Exactly one variant per request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Auth {
    /// Username and password, used only to log in.
    UserPassword { username: String, password: String },
    /// A session previously issued by `login`.
    Session {
        username: String,
        #[serde(with = "serde_bytes")]
        session_id: Vec<u8>,
    },
}

impl Auth {
    pub fn username(&self) -> &str {
        match self {
            Auth::UserPassword { username, .. } | Auth::Session { username, .. } => username,
        }
    }
}

// Passwords and session ids stay out of logs.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .finish_non_exhaustive(),
            Auth::Session { username, .. } => f
                .debug_struct("Session")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// A single backend command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    auth: Auth,
    command: String,
    params: ValueMap,
    timeout_ms: u64,
}

impl Request {
    /// Build a request with no parameters.
    pub fn new(auth: Auth, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            auth,
            command: command.into(),
            params: BTreeMap::new(),
            timeout_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    /// Add a parameter, consuming and returning the request.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &ValueMap {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Deadline the backend should apply to this command.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Status reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `0` on success, [`CODE_AUTH_REQUIRED`] when credentials were rejected.
    pub code: i32,
    /// Human-readable status message.
    pub message: String,
    /// Command-specific result data.
    #[serde(default)]
    pub data: ValueMap,
}

impl Response {
    pub fn ok(data: ValueMap) -> Self {
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: ValueMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Decode the whole data map into a typed view.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        Value::Map(self.data.clone()).decode()
    }
}

/// Data of an `info` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoData {
    pub name: String,
    pub version: String,
    pub drives: Vec<String>,
}

/// Existence and kind of one path, as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub exists: bool,
    #[serde(default)]
    pub isfile: bool,
}

/// Data of a `stat` response, keyed by the requested path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatData {
    pub stat: BTreeMap<String, PathStat>,
}

/// One entry of a `listdir` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub isfile: bool,
    pub lasteditor: String,
    /// Unix seconds.
    pub lastedittime: i64,
}

/// Data of a `listdir` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDirData {
    pub list: Vec<ListEntry>,
}

/// Data of a `login` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

// ============================================================================
// Chunked transfer
// ============================================================================

/// Number of chunk frames that will follow for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCount {
    pub path: String,
    pub num_chunks: u64,
}

/// Opens a streaming transfer. Entries appear in the order their chunks follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    pub entries: Vec<ChunkCount>,
}

/// Precedes each [`ChunkData`] with the path it belongs to and its exact size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub path: String,
    pub size: u64,
}

/// Raw chunk bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

/// Terminal marker of a chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFooter {
    /// Whether the sender finished the stream cleanly.
    pub ok: bool,
    /// Failure description when `ok` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl TransferFooter {
    pub fn clean() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
