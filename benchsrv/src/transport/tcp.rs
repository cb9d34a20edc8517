use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::anyhow;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use benchsrv_protocol::InstrumentConfig;

use crate::transport::ByteLink;
use crate::Error;

pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(1000);

fn resolve(config: &InstrumentConfig) -> crate::Result<SocketAddr> {
    if config.port > u16::MAX as u32 {
        return Err(Error::argument(anyhow!(
            "{} is not a valid TCP port",
            config.port
        )));
    }
    let mut addrs = (config.host.as_str(), config.port as u16)
        .to_socket_addrs()
        .map_err(Error::transport)?;
    addrs
        .next()
        .ok_or_else(|| Error::argument(anyhow!("cannot resolve {}:{}", config.host, config.port)))
}

pub async fn connect(config: &InstrumentConfig, connection_timeout: Duration) -> crate::Result<ByteLink> {
    let addr = resolve(config)?;
    log::debug!("connecting to {}", addr);
    let fut = async move { TcpStream::connect(&addr).await.map_err(Error::transport) };
    match timeout(connection_timeout, fut).await {
        Ok(Ok(x)) => Ok(ByteLink::Tcp(x)),
        Ok(Err(x)) => Err(x),
        Err(_) => Err(Error::transport(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection timed out",
        ))),
    }
}
