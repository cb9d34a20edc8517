use std::io;

use tokio_serial::SerialStream;

use benchsrv_protocol::InstrumentConfig;

use crate::transport::ByteLink;
use crate::Error;

/// Resolve the device path and baud rate for a serial instrument. Dedicated
/// fields win; configurations written for the TCP form fall back to `host`
/// as the path and `port` as the baud rate.
pub fn resolve_params(config: &InstrumentConfig) -> crate::Result<(String, u32)> {
    if let (Some(path), Some(baud)) = (&config.serial_path, config.baud) {
        if !path.is_empty() && baud > 0 {
            return Ok((path.clone(), baud));
        }
    }
    let looks_like_path =
        config.host.starts_with('/') || config.host.to_ascii_lowercase().starts_with("com");
    if looks_like_path && config.port > 0 {
        let baud = config.baud.unwrap_or(config.port);
        return Ok((config.host.clone(), baud));
    }
    Err(Error::SerialConfigMissing {
        instrument: config.name.clone(),
    })
}

pub fn open(config: &InstrumentConfig) -> crate::Result<ByteLink> {
    let (path, baud) = resolve_params(config)?;
    log::debug!("opening {} at {} baud", path, baud);
    let builder = tokio_serial::new(path, baud);
    let stream = SerialStream::open(&builder)
        .map_err(|err| Error::transport(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
    Ok(ByteLink::Serial(stream))
}
