//! Codec module - typed message payloads on top of raw frames.
//!
//! - [`Message`] - the seven Arrow Native messages, with `encode`/`decode`
//! - [`wire`] - payload primitives (Big Endian integers, length-prefixed strings)
//!
//! Encoding is pure and infallible. Decoding validates every length against
//! the payload and reports the offset where it failed.
//!
//! # Example
//!
//! ```
//! use cube_native_client::codec::Message;
//!
//! let auth = Message::Auth { token: "test".into(), database: None };
//! let (type_byte, payload) = auth.encode();
//! assert_eq!(type_byte, 1);
//! assert_eq!(Message::decode(type_byte, payload).unwrap(), auth);
//! ```

mod message;
pub mod wire;

pub use message::Message;
