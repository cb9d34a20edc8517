use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod error;

pub use crate::error::Error;

/// What class of bench instrument a configuration describes. The kind decides
/// how query replies are interpreted: oscilloscope waveform queries return a
/// binary block, everything else returns a single text line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Multimeter,
    Oscilloscope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp,
    Serial,
}

/// Static description of one instrument, loaded once per driver call.
///
/// `command_map` maps logical action keys (e.g. "CONFIGURE_VOLTAGE") to raw
/// protocol command strings. For serial instruments without dedicated
/// `serial_path`/`baud` fields, `host` and `port` are reinterpreted as the
/// device path and baud rate, which is why `port` is wider than a TCP port.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    pub kind: InstrumentKind,
    pub connection: ConnectionType,
    pub host: String,
    pub port: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub serial_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub baud: Option<u32>,
    pub command_map: HashMap<String, String>,
}

impl InstrumentConfig {
    pub fn command(&self, action: &str) -> crate::error::Result<&str> {
        self.command_map
            .get(action)
            .map(|x| x.as_str())
            .ok_or_else(|| Error::UnknownAction {
                instrument: self.name.clone(),
                action: action.to_string(),
            })
    }
}

/// A decoded oscilloscope capture. Samples are in volts; `time_scale` is
/// seconds per horizontal division, derived from the preamble x-increment
/// over ten divisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformCapture {
    pub samples: Vec<f64>,
    pub time_scale: f64,
    pub voltage_scale: f64,
    pub voltage_offset: f64,
    pub vpp: f64,
    pub freq: f64,
}

/// Outcome of a single `execute` call. Failures travel as a value, never as
/// a panic across the API boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CaptureResult {
    Done,
    Value(String),
    Waveform(WaveformCapture),
    Error { message: String },
}

impl CaptureResult {
    pub fn is_error(&self) -> bool {
        matches!(self, CaptureResult::Error { .. })
    }
}

impl From<Error> for CaptureResult {
    fn from(err: Error) -> Self {
        CaptureResult::Error {
            message: err.to_string(),
        }
    }
}

/// Events delivered to a monitor subscriber. `Stopped` is emitted exactly
/// once per shared channel, on explicit stop or on a fatal transport error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MonitorEvent {
    Line { instrument: String, data: String },
    Stopped { instrument: String, error: Option<Error> },
}
