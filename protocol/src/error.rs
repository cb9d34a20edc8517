use serde::{self, Deserializer, Serializer};
use std::{io, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize)]
struct IoError {
    description: String,
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct AnyHowError {
    description: String,
    backtrace: String,
}

fn serialize_anyhow_error<S>(
    error: &Arc<anyhow::Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let to_serialize = AnyHowError {
        description: error.to_string(),
        backtrace: format!("{:?}", error.backtrace()),
    };
    to_serialize.serialize(serializer)
}

fn deserialize_anyhow_error<'de, D>(
    deserializer: D,
) -> std::result::Result<Arc<anyhow::Error>, D::Error>
where
    D: Deserializer<'de>,
{
    let ret = AnyHowError::deserialize(deserializer)?;
    Ok(Arc::new(anyhow::Error::msg(ret.description)))
}

fn serialize_io_error<S>(
    error: &Arc<io::Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let to_serialize = IoError {
        description: format!("{}", error),
        kind: format!("{}", error.kind()),
    };
    to_serialize.serialize(serializer)
}

fn deserialize_io_error<'de, D>(deserializer: D) -> std::result::Result<Arc<io::Error>, D::Error>
where
    D: Deserializer<'de>,
{
    let ret = IoError::deserialize(deserializer)?;
    Ok(Arc::new(io::Error::new(io::ErrorKind::Other, ret.description)))
}

/// Driver error taxonomy. Serializable so failures can cross the process
/// boundary to the application layer unchanged.
#[derive(Error, Clone, Debug, Serialize, Deserialize)]
pub enum Error {
    #[error("Instrument '{instrument}' has no command mapped for action '{action}'")]
    UnknownAction { instrument: String, action: String },
    #[error("Timeout waiting for instrument response")]
    Timeout,
    #[error("Transport error: {0:?}")]
    Transport(
        #[serde(
            serialize_with = "serialize_io_error",
            deserialize_with = "deserialize_io_error"
        )]
        Arc<io::Error>,
    ),
    #[error("Malformed waveform block: {0}")]
    MalformedBlock(String),
    #[error("Instrument '{instrument}' is configured for serial but no serial path/baud could be resolved")]
    SerialConfigMissing { instrument: String },
    #[error("Channel is closed")]
    ChannelClosed,
    #[error("Argument error: {0}")]
    Argument(
        #[serde(
            serialize_with = "serialize_anyhow_error",
            deserialize_with = "deserialize_anyhow_error"
        )]
        Arc<anyhow::Error>,
    ),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transport<T: Into<io::Error>>(err: T) -> Self {
        Error::Transport(Arc::new(err.into()))
    }

    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        Error::MalformedBlock(reason.into())
    }

    pub fn argument<T: Into<anyhow::Error>>(err: T) -> Self {
        Error::Argument(Arc::new(err.into()))
    }

    /// Transport-level hiccups are worth a reconnect attempt; everything
    /// else is surfaced to the caller as-is.
    pub fn should_retry(&self) -> bool {
        match self {
            Error::Transport(err) => {
                err.kind() == io::ErrorKind::ConnectionReset
                    || err.kind() == io::ErrorKind::ConnectionAborted
                    || err.kind() == io::ErrorKind::BrokenPipe
                    || err.kind() == io::ErrorKind::UnexpectedEof
            }
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(x: io::Error) -> Self {
        Error::Transport(Arc::new(x))
    }
}
