pub mod channel;
pub mod codec;
pub mod dispatcher;
mod inventory;
mod iotask;
pub mod scpi;
pub mod transport;
pub mod waveform;

pub use benchsrv_protocol::{
    CaptureResult, ConnectionType, Error, InstrumentConfig, InstrumentKind, MonitorEvent,
    WaveformCapture,
};
pub use crate::dispatcher::Dispatcher;
pub use crate::inventory::Inventory;

pub type Result<T> = std::result::Result<T, Error>;
