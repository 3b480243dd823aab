//! # cube-native-client
//!
//! Client protocol engine for Cube's Arrow Native wire protocol.
//!
//! The server streams query results as Arrow IPC messages wrapped in
//! length-prefixed frames. This crate speaks that protocol over TCP (or any
//! async byte stream) and hands back Arrow record batches.
//!
//! ## Layers
//!
//! - **protocol**: frame envelope (`u32` BE length, type byte, payload)
//! - **codec**: the seven protocol messages
//! - **session**: handshake, auth and query ordering rules
//! - **ipc**: Arrow IPC chunk parsing, reassembly and decoding
//! - **transport**: framed reads and writes with timeouts and cancellation
//!
//! ## Example
//!
//! ```no_run
//! use cube_native_client::Client;
//!
//! # async fn run() -> cube_native_client::Result<()> {
//! let mut client = Client::builder().token("my-token").connect().await?;
//!
//! let result = client.execute("SELECT 1 AS test").await?;
//! assert_eq!(result.num_rows(), 1);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;
mod query;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::{CubeError, Result};
pub use query::{QueryResult, QueryStream};
pub use session::SessionState;
