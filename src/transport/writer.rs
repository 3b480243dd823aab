//! Frame writes with scatter/gather I/O.
//!
//! Header and payload go out in one `write_vectored` call when the socket
//! accepts them; a short write rebuilds the slices for what is left.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{CubeError, Result};
use crate::protocol::HEADER_SIZE;

/// Write one frame (header + payload) and flush.
pub(crate) async fn write_frame<W>(writer: &mut W, header: &[u8; HEADER_SIZE], payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total = HEADER_SIZE + payload.len();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(header, payload, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(CubeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices still to be written after `skip` bytes went out.
fn remaining_slices<'a>(header: &'a [u8; HEADER_SIZE], payload: &'a [u8], skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);

    if skip < HEADER_SIZE {
        slices.push(IoSlice::new(&header[skip..]));
    }
    let in_payload = skip.saturating_sub(HEADER_SIZE);
    if in_payload < payload.len() {
        slices.push(IoSlice::new(&payload[in_payload..]));
    }

    slices
}
