//! Async frame I/O over byte streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    BrokerFrame, FrameHeader,
    errors::{ProtocolError, Result},
};

/// Read one frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends before a complete header, which
/// is how a peer closes a session cleanly.
///
/// # Errors
///
/// - Header validation errors from [`FrameHeader::from_bytes`]
/// - `ProtocolError::FrameTruncated` if the stream ends inside a body
/// - `ProtocolError::CborDecode` if the body is malformed
/// - `ProtocolError::Io` for stream failures
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<BrokerFrame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header_buf = [0u8; FrameHeader::SIZE];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let body_len = FrameHeader::from_bytes(&header_buf)?.payload_size() as usize;

    let mut body = vec![0u8; body_len];
    let mut filled = 0;
    while filled < body_len {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::FrameTruncated { expected: body_len, actual: filled });
        }
        filled += n;
    }

    BrokerFrame::decode_body(&body).map(Some)
}

/// Encode `frame` and write it to `writer`.
///
/// # Errors
///
/// - Encoding errors from [`BrokerFrame::encode`]
/// - `ProtocolError::Io` for stream failures
pub async fn write_frame<W>(writer: &mut W, frame: &BrokerFrame) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    Ok(())
}
