/// One link type for both lifecycles: a `ByteLink` is opened per call for
/// one-off exchanges, or handed to a channel task and kept open for monitor
/// mode. Framing is left to the consumer.
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_serial::SerialStream;

use benchsrv_protocol::{ConnectionType, InstrumentConfig};

pub mod serial;
pub mod tcp;

pub enum ByteLink {
    Tcp(TcpStream),
    Serial(SerialStream),
}

impl ByteLink {
    pub async fn open(config: &InstrumentConfig) -> crate::Result<ByteLink> {
        match config.connection {
            ConnectionType::Tcp => tcp::connect(config, tcp::CONNECTION_TIMEOUT).await,
            ConnectionType::Serial => serial::open(config),
        }
    }
}

impl AsyncRead for ByteLink {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ByteLink::Tcp(x) => Pin::new(x).poll_read(cx, buf),
            ByteLink::Serial(x) => Pin::new(x).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ByteLink {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ByteLink::Tcp(x) => Pin::new(x).poll_write(cx, buf),
            ByteLink::Serial(x) => Pin::new(x).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ByteLink::Tcp(x) => Pin::new(x).poll_flush(cx),
            ByteLink::Serial(x) => Pin::new(x).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ByteLink::Tcp(x) => Pin::new(x).poll_shutdown(cx),
            ByteLink::Serial(x) => Pin::new(x).poll_shutdown(cx),
        }
    }
}
