//! Client builder and session driver.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection. The [`Client`] manages the lifecycle:
//! 1. Connect (TCP or any async stream)
//! 2. Handshake
//! 3. Authenticate
//! 4. Run queries, one at a time
//!
//! # Example
//!
//! ```no_run
//! use cube_native_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::builder()
//!         .host("localhost")
//!         .port(4445)
//!         .token("my-token")
//!         .connect()
//!         .await?;
//!
//!     let mut stream = client.query("SELECT 1 AS test").await?;
//!     while let Some(batch) = stream.next_batch().await? {
//!         println!("{} rows", batch.num_rows());
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::codec::Message;
use crate::config::ClientConfig;
use crate::error::{CubeError, Result};
use crate::ipc::ChunkLayout;
use crate::protocol::Frame;
use crate::query::{QueryResult, QueryStream};
use crate::session::{Event, Outcome, Session, SessionState};
use crate::transport::{connect_tcp, ByteStream, Connection, IoPolicy};

/// Builder for configuring and connecting a client.
///
/// Use the fluent API to set connection options, then call `connect()`.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    cancel: Option<CancellationToken>,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Server host. Default: localhost
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Server port. Default: 4445
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Token to authenticate with right after the handshake.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Database sent along with the token. Default: none
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Version sent in the handshake. Default: 1
    pub fn handshake_version(mut self, version: u32) -> Self {
        self.config.handshake_version = version;
        self
    }

    /// Largest accepted frame. Default: 256 MiB
    pub fn max_frame_length(mut self, length: u32) -> Self {
        self.config.max_frame_length = length;
        self
    }

    /// Largest accepted Arrow IPC chunk body. Default: 256 MiB
    pub fn max_body_length(mut self, length: u32) -> Self {
        self.config.max_body_length = length;
        self
    }

    /// How Arrow IPC chunks are delimited. Default: `ArrowMessage`
    pub fn chunk_layout(mut self, layout: ChunkLayout) -> Self {
        self.config.chunk_layout = layout;
        self
    }

    /// Fail results that end without the Arrow end-of-stream marker.
    ///
    /// Default: true
    pub fn require_end_of_stream(mut self, require: bool) -> Self {
        self.config.require_end_of_stream = require;
        self
    }

    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Deadline for each frame read or write. Default: none
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = Some(timeout);
        self
    }

    /// Token that aborts any in-flight I/O when cancelled.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Connect over TCP, handshake, and authenticate if a token is set.
    pub async fn connect(self) -> Result<Client> {
        self.config.validate()?;
        let stream = connect_tcp(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )
        .await?;
        self.connect_stream(stream).await
    }

    /// Like [`connect`](Self::connect), over an already open stream.
    pub async fn connect_stream<S: ByteStream + 'static>(self, stream: S) -> Result<Client> {
        self.config.validate()?;
        let mut client = Client::new(stream, self.config, self.cancel);
        client.handshake().await?;

        if let Some(token) = client.config.token.clone() {
            let database = client.config.database.clone();
            client.authenticate(&token, database.as_deref()).await?;
        }
        Ok(client)
    }
}

/// A connected Arrow Native session.
///
/// Half-duplex: one request at a time, enforced by `&mut self`.
#[derive(Debug)]
pub struct Client {
    conn: Connection,
    session: Session,
    config: ClientConfig,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `host:port` and handshake with default settings.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        ClientBuilder::new().host(host).port(port).connect().await
    }

    /// Handshake over an open stream; authenticates if `config` has a token.
    pub async fn from_stream<S: ByteStream + 'static>(stream: S, config: ClientConfig) -> Result<Self> {
        ClientBuilder::new().config(config).connect_stream(stream).await
    }

    fn new<S: ByteStream + 'static>(stream: S, config: ClientConfig, cancel: Option<CancellationToken>) -> Self {
        let mut conn = Connection::with_max_frame_length(stream, config.max_frame_length);
        conn.set_policy(IoPolicy {
            timeout: config.io_timeout,
            cancel,
        });
        Self {
            conn,
            session: Session::new(),
            config,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Why the session failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.session.failure()
    }

    /// Settings the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the cancellation token used for subsequent I/O.
    pub fn set_cancellation_token(&mut self, token: Option<CancellationToken>) {
        let policy = IoPolicy {
            timeout: self.config.io_timeout,
            cancel: token,
        };
        self.conn.set_policy(policy);
    }

    /// Send credentials and wait for the server's acknowledgement.
    pub async fn authenticate(&mut self, token: &str, database: Option<&str>) -> Result<()> {
        self.ensure_usable()?;
        let message = Message::Auth {
            token: token.to_string(),
            database: database.map(str::to_string),
        };
        self.send(Event::SendAuth, &message).await?;
        self.await_ack().await?;

        tracing::debug!(database = ?database, "authenticated");
        Ok(())
    }

    /// Send a query and wait for its schema.
    ///
    /// Batches are pulled lazily from the returned stream. A stream dropped
    /// before completion is drained before the next request.
    pub async fn query(&mut self, sql: &str) -> Result<QueryStream<'_>> {
        self.prepare_request().await?;
        self.send(
            Event::SendQuery,
            &Message::Query {
                sql: sql.to_string(),
            },
        )
        .await?;
        tracing::debug!(sql_len = sql.len(), "query sent");

        let message = self.receive().await?;
        self.observe(&message).await?;
        let reassembler = self.config.reassembler();
        QueryStream::start(self, reassembler, message)
    }

    /// Run a query and collect every batch.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.query(sql).await?.collect().await
    }

    /// Close the session. Safe in any state; repeated calls do nothing.
    pub async fn close(&mut self) {
        if self.session.state() == SessionState::Closed {
            return;
        }
        self.conn.close().await;
        self.session.close();
        tracing::debug!("session closed");
    }

    async fn handshake(&mut self) -> Result<()> {
        let version = self.config.handshake_version;
        self.send(Event::SendHandshake, &Message::Handshake { version })
            .await?;
        self.await_ack().await?;

        tracing::debug!(version, "handshake accepted");
        Ok(())
    }

    /// Wait for the answer to a handshake or auth request.
    ///
    /// Anything but `Error` is an acknowledgement; its payload is not decoded.
    async fn await_ack(&mut self) -> Result<()> {
        let frame = self.receive_frame().await?;
        if frame.is_error() {
            let message = self.decode(frame)?;
            self.observe(&message).await?;
            return Ok(());
        }

        tracing::trace!(
            message_type = frame.type_byte,
            payload_len = frame.payload_len(),
            "acknowledged"
        );
        self.session.apply(Event::Ack)?;
        Ok(())
    }

    /// Bring the session back to `Idle` before a new request.
    async fn prepare_request(&mut self) -> Result<()> {
        self.ensure_usable()?;
        match self.session.state() {
            SessionState::Failed { recoverable: true } => self.session.reset(),
            SessionState::Querying | SessionState::Streaming => self.drain().await,
            _ => Ok(()),
        }
    }

    /// Discard the rest of an abandoned result.
    async fn drain(&mut self) -> Result<()> {
        tracing::debug!(state = %self.session.state(), "draining abandoned result");

        let mut frames = 0usize;
        while self.session.state().is_busy() {
            let message = self.receive().await?;
            frames += 1;
            match self.observe(&message).await {
                Ok(_) => {}
                Err(err) if !err.is_fatal() => {
                    tracing::debug!(error = %err, "abandoned query failed");
                    self.session.reset()?;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::trace!(frames, "drained");
        Ok(())
    }

    fn ensure_usable(&mut self) -> Result<()> {
        if self.conn.is_poisoned() && self.session.state() != SessionState::Closed {
            self.session.fail(CubeError::SessionPoisoned.to_string());
            return Err(CubeError::SessionPoisoned);
        }
        Ok(())
    }

    async fn send(&mut self, event: Event<'_>, message: &Message) -> Result<()> {
        self.session.apply(event)?;
        if let Err(err) = self.conn.write_message(message).await {
            tracing::warn!(error = %err, "send failed");
            self.session.fail(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    pub(crate) async fn receive(&mut self) -> Result<Message> {
        let frame = self.receive_frame().await?;
        let message = self.decode(frame)?;
        tracing::trace!(message = message.message_type().name(), "received");
        Ok(message)
    }

    async fn receive_frame(&mut self) -> Result<Frame> {
        self.ensure_usable()?;
        self.conn.read_frame().await.map_err(|err| {
            tracing::warn!(error = %err, "receive failed");
            self.session.fail(err.to_string());
            err
        })
    }

    fn decode(&mut self, frame: Frame) -> Result<Message> {
        Message::from_frame(frame).map_err(|err| {
            tracing::warn!(error = %err, "undecodable frame");
            self.session.fail(err.to_string());
            err
        })
    }

    /// Run a received message through the state machine.
    ///
    /// Order violations and rejected handshakes or credentials shut the
    /// connection down.
    pub(crate) async fn observe(&mut self, message: &Message) -> Result<Outcome> {
        let outcome = self.session.apply(Event::received(message));
        if let Err(err) = &outcome {
            if err.is_fatal() {
                tracing::warn!(error = %err, "session failed, closing connection");
                self.conn.shutdown().await;
            }
        }
        outcome
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.session.fail(reason);
    }
}
