//! Length-prefixed framing over an ordered reliable byte stream.
//!
//! Every message is a 4-byte big-endian length followed by exactly that many
//! payload bytes. Reads fill both parts fully; EOF before the first prefix
//! byte means the peer closed cleanly, EOF anywhere else is a framing error.

use psi_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload (256 MiB); large enough for a CKKS
/// public context with Galois keys.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            Error::Framing(format!(
                "payload of {} bytes exceeds the {MAX_FRAME_LEN}-byte frame limit",
                payload.len()
            ))
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed before sending a prefix
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    let first = reader.read(&mut len_bytes).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < len_bytes.len() {
        reader
            .read_exact(&mut len_bytes[first..])
            .await
            .map_err(eof_is_framing)?;
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(Error::Framing(format!(
            "frame length {len} exceeds the {MAX_FRAME_LEN}-byte limit"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(eof_is_framing)?;
    Ok(Some(payload))
}

fn eof_is_framing(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Framing("stream ended mid-frame".into())
    } else {
        Error::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psi_core::ErrorKind;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        let payload = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(16);
        write_frame(&mut client, b"").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"");
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_payload_is_framing() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[tokio::test]
    async fn eof_mid_prefix_is_framing() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0u8, 0]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[tokio::test]
    async fn oversize_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }
}
