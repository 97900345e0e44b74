//! Relaying a chunked backend transfer to an output sink.
//!
//! A transfer runs through a fixed sequence:
//!
//! ```text
//! Idle ──start──▶ HeaderPending ──header──▶ StreamingChunks ──▶ FooterPending
//!                      │                        (per chunk:         │
//!                      │                    ChunkInfo, ChunkData)   ▼
//!                      └──response──▶ rejected          FinalResponsePending ──▶ Done
//! ```
//!
//! Any deviation (wrong message kind, a chunk for a path other than the one
//! due, a size mismatch, an unclean footer, a non-zero final code, a deadline
//! miss) moves the bridge to `Failed`. Bytes already handed to the sink stay
//! there; callers decide how to signal the truncation.
//!
//! The header is awaited separately from the relay so that a rejection which
//! arrives instead of a header can still be answered with a redirect before
//! any output is committed.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use protocol::{ChunkCount, Message, Request, Response, TransferHeader};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::{timed, BackendConnection, ExchangeError};
use crate::interpret::{classify, Outcome};

/// Destination for relayed chunk bytes.
#[allow(async_fn_in_trait)]
pub trait ChunkSink: Send {
    /// Write one chunk. An error means the consumer is gone.
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;
}

impl ChunkSink for Vec<u8> {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Forwards chunks into a bounded channel, e.g. feeding an HTTP body.
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }

    /// Deliver a terminal error to the consumer so it can abort its output.
    pub async fn abort(&self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

impl ChunkSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output closed"))
    }
}

/// Position of a transfer in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Idle,
    HeaderPending,
    StreamingChunks,
    FooterPending,
    FinalResponsePending,
    Done,
    Failed,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStage::Idle => "idle",
            TransferStage::HeaderPending => "awaiting header",
            TransferStage::StreamingChunks => "streaming chunks",
            TransferStage::FooterPending => "awaiting footer",
            TransferStage::FinalResponsePending => "awaiting final response",
            TransferStage::Done => "done",
            TransferStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a transfer stopped early.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("backend reported a failed transfer: {0}")]
    Footer(String),

    #[error("backend asked for reauthentication after streaming began")]
    LateReauthentication,

    #[error("backend failure {code}: {message}")]
    Backend { code: i32, message: String },

    #[error("output closed: {0}")]
    SinkClosed(io::Error),

    #[error("{action} is not valid while {stage}")]
    OutOfOrder {
        action: &'static str,
        stage: TransferStage,
    },
}

/// A failed relay, with how far it got.
#[derive(Debug, Error)]
#[error("transfer failed while {stage} after {bytes_relayed} bytes: {error}")]
pub struct TransferFailure {
    pub stage: TransferStage,
    pub bytes_relayed: u64,
    pub error: TransferError,
}

/// Totals of a completed relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSummary {
    pub paths: usize,
    pub chunks: u64,
    pub bytes: u64,
}

/// Result of waiting for the transfer header.
#[derive(Debug)]
pub enum HeaderOutcome {
    /// The header arrived; chunks follow.
    Streaming(TransferHeader),
    /// The backend answered with a non-zero status instead of a header.
    Rejected(Response),
}

/// Walks the header's entries, tracking which path owes the next chunk.
#[derive(Debug)]
struct ChunkCursor {
    entries: Vec<ChunkCount>,
    index: usize,
    consumed: u64,
}

impl ChunkCursor {
    fn new(entries: Vec<ChunkCount>) -> Self {
        Self {
            entries,
            index: 0,
            consumed: 0,
        }
    }

    /// Skip entries that have received all their chunks (or never had any).
    fn skip_exhausted(&mut self) {
        while self
            .entries
            .get(self.index)
            .is_some_and(|entry| self.consumed >= entry.num_chunks)
        {
            self.index += 1;
            self.consumed = 0;
        }
    }

    fn due(&self) -> Option<&ChunkCount> {
        self.entries.get(self.index)
    }

    fn record_chunk(&mut self) {
        self.consumed += 1;
    }
}

#[derive(Debug)]
enum State {
    Idle,
    HeaderPending,
    StreamingChunks(ChunkCursor),
    FooterPending,
    FinalResponsePending,
    Done,
    Failed,
}

impl State {
    fn stage(&self) -> TransferStage {
        match self {
            State::Idle => TransferStage::Idle,
            State::HeaderPending => TransferStage::HeaderPending,
            State::StreamingChunks(_) => TransferStage::StreamingChunks,
            State::FooterPending => TransferStage::FooterPending,
            State::FinalResponsePending => TransferStage::FinalResponsePending,
            State::Done => TransferStage::Done,
            State::Failed => TransferStage::Failed,
        }
    }
}

/// One chunked transfer over a dedicated backend connection.
pub struct ChunkStreamBridge {
    conn: BackendConnection,
    state: State,
    step_timeout: Duration,
    summary: TransferSummary,
}

impl ChunkStreamBridge {
    pub(crate) fn new(conn: BackendConnection, step_timeout: Duration) -> Self {
        Self {
            conn,
            state: State::Idle,
            step_timeout,
            summary: TransferSummary::default(),
        }
    }

    pub fn stage(&self) -> TransferStage {
        self.state.stage()
    }

    /// Bytes written to the sink so far.
    pub fn bytes_relayed(&self) -> u64 {
        self.summary.bytes
    }

    /// Send the request that opens the transfer.
    pub(crate) async fn start(&mut self, request: Request) -> Result<(), ExchangeError> {
        if !matches!(self.state, State::Idle) {
            return Err(ExchangeError::ProtocolViolation(format!(
                "transfer already started ({})",
                self.stage()
            )));
        }

        let command = request.command().to_string();
        match timed("send request", self.step_timeout, self.conn.send(Message::Request(request))).await {
            Ok(()) => {
                tracing::debug!(%command, "Transfer requested");
                self.state = State::HeaderPending;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Wait for the transfer header.
    ///
    /// A non-zero response in place of the header is returned as
    /// [`HeaderOutcome::Rejected`] and ends the transfer.
    pub async fn await_header(&mut self) -> Result<HeaderOutcome, TransferError> {
        if !matches!(self.state, State::HeaderPending) {
            return Err(TransferError::OutOfOrder {
                action: "awaiting the header",
                stage: self.stage(),
            });
        }

        let message = match timed("receive header", self.step_timeout, self.conn.recv()).await {
            Ok(message) => message,
            Err(e) => {
                self.state = State::Failed;
                return Err(e.into());
            }
        };

        match message {
            Message::TransferHeader(header) => {
                tracing::debug!(paths = header.entries.len(), "Transfer header received");
                self.summary.paths = header.entries.len();
                self.state = State::StreamingChunks(ChunkCursor::new(header.entries.clone()));
                Ok(HeaderOutcome::Streaming(header))
            }
            Message::Response(response) if !response.is_ok() => {
                tracing::debug!(code = response.code, "Transfer rejected before header");
                self.state = State::Failed;
                Ok(HeaderOutcome::Rejected(response))
            }
            other => {
                self.state = State::Failed;
                Err(violation(format!("expected transfer header, got {}", other.kind())))
            }
        }
    }

    /// Drive the transfer to completion, writing every chunk to `sink`.
    ///
    /// Must be called after [`await_header`](Self::await_header) returned
    /// [`HeaderOutcome::Streaming`].
    pub async fn relay<K: ChunkSink>(mut self, sink: &mut K) -> Result<TransferSummary, TransferFailure> {
        loop {
            let stage = self.stage();
            match stage {
                TransferStage::Done => {
                    tracing::debug!(
                        paths = self.summary.paths,
                        chunks = self.summary.chunks,
                        bytes = self.summary.bytes,
                        "Transfer complete"
                    );
                    self.conn.close().await;
                    return Ok(self.summary);
                }
                TransferStage::Idle | TransferStage::HeaderPending | TransferStage::Failed => {
                    return Err(self.fail(
                        stage,
                        TransferError::OutOfOrder {
                            action: "relaying chunks",
                            stage,
                        },
                    ));
                }
                _ => {}
            }

            if let Err(error) = self.step(sink).await {
                return Err(self.fail(stage, error));
            }
        }
    }

    fn fail(&mut self, stage: TransferStage, error: TransferError) -> TransferFailure {
        self.state = State::Failed;
        TransferFailure {
            stage,
            bytes_relayed: self.summary.bytes,
            error,
        }
    }

    /// Advance by one protocol message (two for a chunk).
    async fn step<K: ChunkSink>(&mut self, sink: &mut K) -> Result<(), TransferError> {
        let limit = self.step_timeout;
        match &mut self.state {
            State::StreamingChunks(cursor) => {
                cursor.skip_exhausted();
                let Some(due) = cursor.due() else {
                    self.state = State::FooterPending;
                    return Ok(());
                };
                let expected_path = due.path.clone();

                let size = match timed("receive chunk info", limit, self.conn.recv()).await? {
                    Message::ChunkInfo(info) if info.path == expected_path => info.size,
                    Message::ChunkInfo(info) => {
                        return Err(violation(format!(
                            "chunk for {:?} while {:?} is due",
                            info.path, expected_path
                        )));
                    }
                    other => {
                        return Err(violation(format!("expected chunk info, got {}", other.kind())));
                    }
                };

                let bytes = match timed("receive chunk", limit, self.conn.recv()).await? {
                    Message::ChunkData(chunk) => chunk.bytes,
                    other => {
                        return Err(violation(format!("expected chunk data, got {}", other.kind())));
                    }
                };
                if bytes.len() as u64 != size {
                    return Err(violation(format!(
                        "chunk of {:?} announced {} bytes but carried {}",
                        expected_path,
                        size,
                        bytes.len()
                    )));
                }

                sink.write_chunk(Bytes::from(bytes))
                    .await
                    .map_err(TransferError::SinkClosed)?;
                cursor.record_chunk();
                self.summary.chunks += 1;
                self.summary.bytes += size;
                tracing::trace!(path = %expected_path, size, "Chunk relayed");
                Ok(())
            }
            State::FooterPending => match timed("receive footer", limit, self.conn.recv()).await? {
                Message::TransferFooter(footer) if footer.ok => {
                    self.state = State::FinalResponsePending;
                    Ok(())
                }
                Message::TransferFooter(footer) => Err(TransferError::Footer(
                    footer.error.unwrap_or_else(|| "unspecified error".to_string()),
                )),
                other => Err(violation(format!("expected transfer footer, got {}", other.kind()))),
            },
            State::FinalResponsePending => {
                match timed("receive final response", limit, self.conn.recv()).await? {
                    Message::Response(response) => match classify(&response) {
                        Outcome::Proceed => {
                            self.state = State::Done;
                            Ok(())
                        }
                        Outcome::Reauthenticate => Err(TransferError::LateReauthentication),
                        Outcome::Fail => Err(TransferError::Backend {
                            code: response.code,
                            message: response.message,
                        }),
                    },
                    other => Err(violation(format!("expected final response, got {}", other.kind()))),
                }
            }
            State::Idle | State::HeaderPending | State::Done | State::Failed => {
                Err(TransferError::OutOfOrder {
                    action: "stepping the transfer",
                    stage: self.state.stage(),
                })
            }
        }
    }
}

fn violation(detail: String) -> TransferError {
    TransferError::Exchange(ExchangeError::ProtocolViolation(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxedIo;
    use protocol::{Auth, ChunkData, ChunkInfo, FramedStream, TransferFooter, ValueMap};

    fn read_request() -> Request {
        Request::new(
            Auth::Session {
                username: "alice".to_string(),
                session_id: vec![7; 16],
            },
            "readfiles",
            Duration::from_secs(5),
        )
    }

    fn header(entries: &[(&str, u64)]) -> Message {
        Message::TransferHeader(TransferHeader {
            entries: entries
                .iter()
                .map(|(path, num_chunks)| ChunkCount {
                    path: path.to_string(),
                    num_chunks: *num_chunks,
                })
                .collect(),
        })
    }

    fn chunk(path: &str, bytes: &[u8]) -> [Message; 2] {
        [
            Message::ChunkInfo(ChunkInfo {
                path: path.to_string(),
                size: bytes.len() as u64,
            }),
            Message::ChunkData(ChunkData {
                bytes: bytes.to_vec(),
            }),
        ]
    }

    fn footer_ok() -> Message {
        Message::TransferFooter(TransferFooter::clean())
    }

    fn final_ok() -> Message {
        Message::Response(Response::ok(ValueMap::new()))
    }

    /// Open a bridge against a scripted backend that replies with `script`
    /// once it has read the request.
    async fn scripted(script: Vec<Message>, step_timeout: Duration) -> ChunkStreamBridge {
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(async move {
            let mut conn = FramedStream::new(server);
            if conn.recv().await.is_err() {
                return;
            }
            for message in script {
                if conn.send(message).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        });

        let mut bridge = ChunkStreamBridge::new(FramedStream::new(Box::new(client) as BoxedIo), step_timeout);
        bridge.start(read_request()).await.unwrap();
        bridge
    }

    async fn streaming(script: Vec<Message>) -> ChunkStreamBridge {
        let mut bridge = scripted(script, Duration::from_millis(200)).await;
        assert!(matches!(
            bridge.await_header().await.unwrap(),
            HeaderOutcome::Streaming(_)
        ));
        bridge
    }

    #[tokio::test]
    async fn test_zero_chunks_completes_empty() {
        let bridge = streaming(vec![header(&[("a", 0)]), footer_ok(), final_ok()]).await;

        let mut out = Vec::new();
        let summary = bridge.relay(&mut out).await.unwrap();

        assert!(out.is_empty());
        assert_eq!(
            summary,
            TransferSummary {
                paths: 1,
                chunks: 0,
                bytes: 0
            }
        );
    }

    #[tokio::test]
    async fn test_chunks_are_concatenated_in_order() {
        let mut script = vec![header(&[("a", 3)])];
        script.extend(chunk("a", b"hello "));
        script.extend(chunk("a", b"chunked "));
        script.extend(chunk("a", b"world"));
        script.push(footer_ok());
        script.push(final_ok());

        let mut out = Vec::new();
        let summary = streaming(script).await.relay(&mut out).await.unwrap();

        assert_eq!(out, b"hello chunked world");
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.bytes, 19);
    }

    #[tokio::test]
    async fn test_multiple_paths_follow_header_order() {
        let mut script = vec![header(&[("a", 1), ("empty", 0), ("b", 2)])];
        script.extend(chunk("a", b"A"));
        script.extend(chunk("b", b"B1"));
        script.extend(chunk("b", b"B2"));
        script.push(footer_ok());
        script.push(final_ok());

        let mut out = Vec::new();
        let summary = streaming(script).await.relay(&mut out).await.unwrap();

        assert_eq!(out, b"AB1B2");
        assert_eq!(summary.paths, 3);
    }

    #[tokio::test]
    async fn test_rejection_instead_of_header() {
        let mut bridge = scripted(
            vec![Message::Response(Response::error(6, "session expired"))],
            Duration::from_millis(200),
        )
        .await;

        match bridge.await_header().await.unwrap() {
            HeaderOutcome::Rejected(response) => assert_eq!(response.code, 6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(bridge.stage(), TransferStage::Failed);
    }

    #[tokio::test]
    async fn test_unclean_footer_fails_after_relaying() {
        let mut script = vec![header(&[("a", 1)])];
        script.extend(chunk("a", b"partial"));
        script.push(Message::TransferFooter(TransferFooter::failed("disk read error")));

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert_eq!(out, b"partial");
        assert_eq!(failure.stage, TransferStage::FooterPending);
        assert_eq!(failure.bytes_relayed, 7);
        assert!(matches!(failure.error, TransferError::Footer(ref msg) if msg == "disk read error"));
    }

    #[tokio::test]
    async fn test_success_without_footer_is_hard_failure() {
        let mut script = vec![header(&[("a", 1)])];
        script.extend(chunk("a", b"hi"));
        script.push(final_ok());

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert_eq!(out, b"hi");
        assert_eq!(failure.stage, TransferStage::FooterPending);
        assert_eq!(failure.bytes_relayed, 2);
        assert!(matches!(
            failure.error,
            TransferError::Exchange(ExchangeError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_for_wrong_path_is_violation() {
        let mut script = vec![header(&[("a", 1)])];
        script.extend(chunk("b", b"x"));

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert!(out.is_empty());
        assert_eq!(failure.stage, TransferStage::StreamingChunks);
        assert!(matches!(
            failure.error,
            TransferError::Exchange(ExchangeError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_size_mismatch_is_violation() {
        let script = vec![
            header(&[("a", 1)]),
            Message::ChunkInfo(ChunkInfo {
                path: "a".to_string(),
                size: 10,
            }),
            Message::ChunkData(ChunkData {
                bytes: b"short".to_vec(),
            }),
        ];

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert!(out.is_empty());
        assert!(matches!(
            failure.error,
            TransferError::Exchange(ExchangeError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_final_auth_failure_is_late_reauthentication() {
        let mut script = vec![header(&[("a", 1)])];
        script.extend(chunk("a", b"data"));
        script.push(footer_ok());
        script.push(Message::Response(Response::error(6, "expired")));

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert_eq!(out, b"data");
        assert_eq!(failure.stage, TransferStage::FinalResponsePending);
        assert!(matches!(failure.error, TransferError::LateReauthentication));
    }

    #[tokio::test]
    async fn test_final_failure_code() {
        let script = vec![
            header(&[("a", 0)]),
            footer_ok(),
            Message::Response(Response::error(2, "io")),
        ];

        let failure = streaming(script).await.relay(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(failure.error, TransferError::Backend { code: 2, .. }));
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let mut script = vec![header(&[("a", 2)])];
        script.extend(chunk("a", b"first"));

        let mut out = Vec::new();
        let failure = streaming(script).await.relay(&mut out).await.unwrap_err();

        assert_eq!(out, b"first");
        assert!(matches!(
            failure.error,
            TransferError::Exchange(ExchangeError::Timeout {
                step: "receive chunk info"
            })
        ));
    }

    #[tokio::test]
    async fn test_relay_before_header_is_out_of_order() {
        let bridge = scripted(vec![], Duration::from_millis(50)).await;
        let failure = bridge.relay(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(
            failure.error,
            TransferError::OutOfOrder {
                stage: TransferStage::HeaderPending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_stops_relay() {
        let mut script = vec![header(&[("a", 2)])];
        script.extend(chunk("a", b"one"));
        script.extend(chunk("a", b"two"));
        script.push(footer_ok());
        script.push(final_ok());

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);

        let failure = streaming(script).await.relay(&mut sink).await.unwrap_err();
        assert!(matches!(failure.error, TransferError::SinkClosed(_)));
        assert_eq!(failure.bytes_relayed, 0);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_chunks_and_abort() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        sink.write_chunk(Bytes::from_static(b"abc")).await.unwrap();
        sink.abort(io::Error::other("cut")).await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(rx.recv().await.unwrap().is_err());
    }
}
