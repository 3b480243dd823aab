//! Scripted in-memory server for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch};
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use cube_native_client::codec::Message;
use cube_native_client::protocol::{build_frame, FrameBuffer, MessageType};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Arrow IPC result split the way the server ships it.
pub struct ArrowResult {
    /// Schema message.
    pub schema: Bytes,
    /// One encapsulated message per record batch.
    pub batches: Vec<Bytes>,
    /// The 8-byte end-of-stream marker.
    pub end_of_stream: Bytes,
}

impl ArrowResult {
    /// Batch payloads with the end-of-stream marker appended to the last
    /// one (or as a payload of its own when there are no batches).
    pub fn batch_payloads(&self) -> Vec<Bytes> {
        let mut payloads = self.batches.clone();
        match payloads.last_mut() {
            Some(last) => {
                let mut joined = last.to_vec();
                joined.extend_from_slice(&self.end_of_stream);
                *last = Bytes::from(joined);
            }
            None => payloads.push(self.end_of_stream.clone()),
        }
        payloads
    }
}

pub fn int64_batch(name: &str, values: &[i64]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
}

/// Encode `batches` as an Arrow IPC stream and cut it at message boundaries.
pub fn arrow_result(batches: &[RecordBatch]) -> ArrowResult {
    let schema = batches[0].schema();
    let mut writer = StreamWriter::try_new(Vec::new(), schema.as_ref()).unwrap();

    let mut cuts = vec![writer.get_ref().len()];
    for batch in batches {
        writer.write(batch).unwrap();
        cuts.push(writer.get_ref().len());
    }
    writer.finish().unwrap();
    let bytes = Bytes::from(writer.into_inner().unwrap());

    let batch_messages = cuts
        .windows(2)
        .map(|w| bytes.slice(w[0]..w[1]))
        .collect();

    ArrowResult {
        schema: bytes.slice(..cuts[0]),
        batches: batch_messages,
        end_of_stream: bytes.slice(cuts[cuts.len() - 1]..),
    }
}

/// The server end of an in-memory connection.
pub struct FakeServer {
    stream: DuplexStream,
    frames: FrameBuffer,
}

impl FakeServer {
    /// A connected (client stream, server) pair.
    pub fn pair() -> (DuplexStream, FakeServer) {
        let (client, server) = duplex(64 * 1024);
        (
            client,
            FakeServer {
                stream: server,
                frames: FrameBuffer::new(),
            },
        )
    }

    /// Next message from the client.
    pub async fn recv(&mut self) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.frames.next_frame().unwrap() {
                return Message::from_frame(frame).unwrap();
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the connection");
            self.frames.extend(&buf[..n]);
        }
    }

    pub async fn send(&mut self, message: Message) {
        self.send_raw(&message.to_frame_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Answer the handshake with an opaque acknowledgement.
    pub async fn accept_handshake(&mut self) {
        assert_eq!(self.recv().await, Message::Handshake { version: 1 });
        let mut ack = 1u32.to_be_bytes().to_vec();
        ack.extend_from_slice(b"server-build-123");
        self.send_raw(&build_frame(MessageType::Handshake.as_u8(), &ack).unwrap())
            .await;
    }

    /// Answer an auth request with an opaque acknowledgement.
    pub async fn accept_auth(&mut self, token: &str) {
        match self.recv().await {
            Message::Auth { token: got, .. } => assert_eq!(got, token),
            other => panic!("expected Auth, got {other:?}"),
        }
        self.send_raw(&build_frame(MessageType::Auth.as_u8(), b"session-1").unwrap())
            .await;
    }

    /// Expect a query and answer with the full result.
    pub async fn answer_query(&mut self, sql: &str, result: &ArrowResult, rows_affected: u64) {
        assert_eq!(
            self.recv().await,
            Message::Query {
                sql: sql.to_string()
            }
        );
        self.send(Message::QueryResponseSchema {
            arrow_ipc_bytes: result.schema.clone(),
        })
        .await;
        for payload in result.batch_payloads() {
            self.send(Message::QueryResponseBatch {
                arrow_ipc_bytes: payload,
            })
            .await;
        }
        self.send(Message::QueryComplete { rows_affected }).await;
    }

    /// Expect a query and answer with an error.
    pub async fn reject_query(&mut self, sql: &str, error: &str) {
        assert_eq!(
            self.recv().await,
            Message::Query {
                sql: sql.to_string()
            }
        );
        self.send(Message::Error {
            message: error.to_string(),
        })
        .await;
    }

    /// Read until the client shuts the connection down.
    pub async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1024];
        loop {
            let n = self.stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
        }
    }
}

trait FrameBytes {
    fn to_frame_bytes(&self) -> Vec<u8>;
}

impl FrameBytes for Message {
    fn to_frame_bytes(&self) -> Vec<u8> {
        let (type_byte, payload) = self.encode();
        build_frame(type_byte, &payload).unwrap()
    }
}
