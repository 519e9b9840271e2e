//! Wire layer for the PSI protocol
//!
//! Combines 4-byte big-endian length framing with typed JSON payloads.
//! The transport below is any ordered reliable byte stream; both the
//! initiator driver and the responder server talk through [`send`] and
//! [`recv`].

pub mod frame;
pub mod message;

pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{decode, encode, Request, Response};

use psi_core::Result;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Encode and frame one message
pub async fn send<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(message)?;
    write_frame(writer, &payload).await
}

/// Read and decode one message; `Ok(None)` when the peer closed cleanly
pub async fn recv<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}
