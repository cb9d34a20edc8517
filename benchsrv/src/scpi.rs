/// Protocol operations over a byte-stream link. Both the one-off and the
/// shared-channel send paths go through these functions; lifecycle policy is
/// decided by the dispatcher.
use std::io;
use std::pin::Pin;
use std::task::Poll;

use futures::future::poll_fn;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time;
use tokio::time::Duration;

use benchsrv_protocol::WaveformCapture;

use crate::codec;
use crate::waveform::WaveformDecoder;
use crate::Error;

/// Window from write completion to a scalar reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);
/// Waveform replies arrive in many chunks; the whole accumulation gets a
/// wider window.
pub const WAVEFORM_TIMEOUT: Duration = Duration::from_millis(5000);

/// Drain whatever the link has buffered without blocking. Instruments left
/// in an odd state can have stale reply bytes queued; a query must not read
/// those as its answer.
pub async fn read_all<T: AsyncRead + Unpin>(stream: &mut T) -> io::Result<Vec<u8>> {
    let mut ret = Vec::new();
    poll_fn(|cx| loop {
        let mut buf_data = [0_u8; 1000];
        let mut buf = ReadBuf::new(&mut buf_data);
        match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().is_empty() {
                    return Poll::Ready(Ok(()));
                }
                ret.extend_from_slice(buf.filled());
            }
            Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            Poll::Pending => return Poll::Ready(Ok(())),
        }
    })
    .await?;
    Ok(ret)
}

/// Frame and send a command. Fire-and-forget: completion of the write is
/// completion of the operation.
pub async fn write_command<T: AsyncWrite + Unpin>(stream: &mut T, command: &str) -> crate::Result<()> {
    log::debug!("write: {:?}", command);
    let data = codec::frame(command);
    AsyncWriteExt::write_all(stream, &data)
        .await
        .map_err(Error::transport)?;
    Ok(())
}

/// Send a query and read one `\n`-terminated reply line, cleaned.
pub async fn query_line<T: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut T,
    command: &str,
    timeout: Duration,
) -> crate::Result<String> {
    let _ = read_all(stream).await;
    write_command(stream, command).await?;
    let raw = read_to_term_timeout(stream, b'\n', timeout).await?;
    Ok(codec::clean(&raw))
}

/// Send the capture command block and accumulate the metadata-plus-binary
/// reply until the decoder is satisfied. The timeout bounds the entire
/// multi-chunk accumulation, not individual reads.
pub async fn query_waveform<T: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut T,
    command: &str,
    timeout: Duration,
) -> crate::Result<WaveformCapture> {
    let _ = read_all(stream).await;
    write_command(stream, command).await?;
    let mut decoder = WaveformDecoder::new();
    let fut = async {
        let mut chunk = [0_u8; 4096];
        loop {
            let read = AsyncReadExt::read(stream, &mut chunk)
                .await
                .map_err(Error::transport)?;
            if read == 0 {
                return Err(Error::transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-capture",
                )));
            }
            decoder.push(&chunk[..read]);
            if let Some(capture) = decoder.try_decode()? {
                return Ok(capture);
            }
        }
    };
    match time::timeout(timeout, fut).await {
        Ok(x) => x,
        Err(_) => Err(Error::Timeout),
    }
}

/// pop a u8 from a byte stream
async fn pop<T: AsyncRead + Unpin>(stream: &mut T) -> crate::Result<u8> {
    AsyncReadExt::read_u8(stream).await.map_err(Error::transport)
}

async fn read_to_term_timeout<T: AsyncRead + Unpin>(
    stream: &mut T,
    term: u8,
    timeout: Duration,
) -> crate::Result<Vec<u8>> {
    let fut = read_to_term(stream, term);
    match time::timeout(timeout, fut).await {
        Ok(x) => x,
        Err(_) => Err(Error::Timeout),
    }
}

async fn read_to_term<T: AsyncRead + Unpin>(stream: &mut T, term: u8) -> crate::Result<Vec<u8>> {
    let mut ret = Vec::new();
    loop {
        let x = pop(stream).await?;
        if x == term {
            break;
        }
        ret.push(x);
    }
    Ok(ret)
}
