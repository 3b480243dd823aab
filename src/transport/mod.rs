//! Transport: frames over an async byte stream.
//!
//! - [`Connection`] reads and writes whole frames over any
//!   `AsyncRead + AsyncWrite` stream (TCP in production, `duplex` in tests)
//! - [`IoPolicy`] bounds each operation by a timeout and a cancellation token
//! - [`connect_tcp`] opens the socket

mod connection;
mod writer;

pub use connection::{connect_tcp, ByteStream, Connection, IoPolicy};
