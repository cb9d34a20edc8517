/// Entry point of the driver: resolves logical action keys to protocol
/// commands and routes them to the right link. An instrument already in
/// monitor mode keeps its shared channel; everything else gets a private
/// link for the duration of one exchange.
use tokio::sync::mpsc;
use tokio::time::Duration;

use benchsrv_protocol::{CaptureResult, InstrumentConfig, InstrumentKind, MonitorEvent};

use crate::channel::{Channel, Request, Response};
use crate::codec;
use crate::inventory::Inventory;
use crate::scpi;
use crate::transport::ByteLink;
use crate::Error;

#[derive(Clone, Copy)]
enum Exchange {
    Write,
    Query,
    Waveform,
}

#[derive(Clone)]
pub struct Dispatcher {
    inventory: Inventory,
    scalar_timeout: Duration,
    waveform_timeout: Duration,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_timeouts(scpi::DEFAULT_TIMEOUT, scpi::WAVEFORM_TIMEOUT)
    }

    pub fn with_timeouts(scalar: Duration, waveform: Duration) -> Self {
        Self {
            inventory: Inventory::new(),
            scalar_timeout: scalar,
            waveform_timeout: waveform,
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Run one logical action against an instrument. Failures come back as
    /// `CaptureResult::Error`; this never panics across the API boundary.
    pub async fn execute(&self, config: &InstrumentConfig, action: &str) -> CaptureResult {
        match self.try_execute(config, action).await {
            Ok(x) => x,
            Err(err) => {
                log::warn!("{}: action '{}' failed: {}", config.name, action, err);
                err.into()
            }
        }
    }

    async fn try_execute(&self, config: &InstrumentConfig, action: &str) -> crate::Result<CaptureResult> {
        let command = config.command(action)?.to_string();
        let exchange = classify(config, &command);

        if let Some(mut channel) = self.inventory.get(&config.name) {
            let req = match exchange {
                Exchange::Write => Request::Write(command.clone()),
                Exchange::Query => Request::Query {
                    command: command.clone(),
                    timeout: self.scalar_timeout,
                },
                Exchange::Waveform => Request::Waveform {
                    command: command.clone(),
                    timeout: self.waveform_timeout,
                },
            };
            match channel.request(req).await {
                Ok(Response::Done) => return Ok(CaptureResult::Done),
                Ok(Response::Line(x)) => return Ok(CaptureResult::Value(x)),
                Ok(Response::Waveform(x)) => return Ok(CaptureResult::Waveform(x)),
                // channel died between lookup and dispatch
                Err(Error::ChannelClosed) => {
                    self.inventory.remove(&config.name);
                }
                Err(err) => return Err(err),
            }
        }
        self.one_off(config, &command, exchange).await
    }

    async fn one_off(
        &self,
        config: &InstrumentConfig,
        command: &str,
        exchange: Exchange,
    ) -> crate::Result<CaptureResult> {
        let mut link = ByteLink::open(config).await?;
        // link drops at the end of this scope regardless of outcome
        match exchange {
            Exchange::Write => scpi::write_command(&mut link, command)
                .await
                .map(|_| CaptureResult::Done),
            Exchange::Query => scpi::query_line(&mut link, command, self.scalar_timeout)
                .await
                .map(CaptureResult::Value),
            Exchange::Waveform => scpi::query_waveform(&mut link, command, self.waveform_timeout)
                .await
                .map(CaptureResult::Waveform),
        }
    }

    /// Open a shared channel for the instrument and deliver unsolicited
    /// lines to `events`. An existing monitor on the same instrument is
    /// replaced, its channel stopped.
    pub async fn start_monitor(
        &self,
        config: &InstrumentConfig,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> crate::Result<()> {
        let link = ByteLink::open(config).await?;
        let channel = Channel::start(config.name.clone(), link, events);
        if let Some(previous) = self.inventory.insert(&config.name, channel) {
            previous.stop();
        }
        Ok(())
    }

    /// Stop monitoring and close the shared channel. Safe to call when not
    /// monitoring.
    pub fn stop_monitor(&self, name: &str) {
        if let Some(channel) = self.inventory.remove(name) {
            channel.stop();
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(config: &InstrumentConfig, command: &str) -> Exchange {
    if config.kind == InstrumentKind::Oscilloscope && command.contains(":WAV:DATA?") {
        Exchange::Waveform
    } else if codec::is_query(command) {
        Exchange::Query
    } else {
        Exchange::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchsrv_protocol::ConnectionType;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn tcp_config(name: &str, port: u32, commands: &[(&str, &str)]) -> InstrumentConfig {
        InstrumentConfig {
            name: name.to_string(),
            kind: InstrumentKind::Multimeter,
            connection: ConnectionType::Tcp,
            host: "127.0.0.1".to_string(),
            port,
            serial_path: None,
            baud: None,
            command_map: commands
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_execute_command_writes_and_resolves_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as u32;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            // never replies; a plain command must not care
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let dispatcher = Dispatcher::new();
        let config = tcp_config("dmm1", port, &[("CONFIGURE_VOLTAGE", "CONF:VOLT:DC")]);
        let ret = dispatcher.execute(&config, "CONFIGURE_VOLTAGE").await;
        assert!(matches!(ret, CaptureResult::Done));

        let written = server.await.unwrap();
        assert_eq!(written, b"CONF:VOLT:DC\n");
    }

    #[tokio::test]
    async fn test_execute_query_reads_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as u32;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0_u8; 64];
            let read = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..read], b"MEAS:VOLT:DC?\n");
            socket.write_all(b"+4.99910000E-01\n").await.unwrap();
        });

        let dispatcher = Dispatcher::new();
        let config = tcp_config("dmm1", port, &[("MEASURE", "MEAS:VOLT:DC?")]);
        let ret = dispatcher.execute(&config, "MEASURE").await;
        match ret {
            CaptureResult::Value(x) => assert_eq!(x, "+4.99910000E-01"),
            _ => panic!(),
        }
        server.await.unwrap();
    }

    #[test]
    fn test_config_decodes_from_json() {
        let raw = r#"{
            "name": "dmm1",
            "kind": "multimeter",
            "connection": "tcp",
            "host": "127.0.0.1",
            "port": 5025,
            "command_map": {"CONFIGURE_VOLTAGE": "CONF:VOLT:DC"}
        }"#;
        let config: InstrumentConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.kind, InstrumentKind::Multimeter);
        assert_eq!(config.connection, ConnectionType::Tcp);
        assert!(config.serial_path.is_none());
        assert_eq!(config.command("CONFIGURE_VOLTAGE").unwrap(), "CONF:VOLT:DC");
        assert!(matches!(
            config.command("NOPE"),
            Err(Error::UnknownAction { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_action_fails_without_io() {
        let dispatcher = Dispatcher::new();
        // host that would fail any connection attempt; must not matter
        let config = tcp_config("dmm1", 5025, &[("CONFIGURE_VOLTAGE", "CONF:VOLT:DC")]);
        let ret = dispatcher.execute(&config, "NOPE").await;
        match ret {
            CaptureResult::Error { message } => {
                assert!(message.contains("dmm1"));
                assert!(message.contains("NOPE"));
            }
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn test_query_timeout_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as u32;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // read the query, never answer
            let mut buf = [0_u8; 64];
            let _ = socket.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let dispatcher =
            Dispatcher::with_timeouts(Duration::from_millis(50), Duration::from_millis(50));
        let config = tcp_config("dmm1", port, &[("MEASURE", "MEAS:VOLT:DC?")]);
        let ret = dispatcher.execute(&config, "MEASURE").await;
        match ret {
            CaptureResult::Error { message } => assert!(message.contains("Timeout")),
            _ => panic!(),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_serial_without_path_is_config_error() {
        let dispatcher = Dispatcher::new();
        let mut config = tcp_config("psu1", 5025, &[("IDENT", "*IDN?")]);
        config.connection = ConnectionType::Serial;
        let ret = dispatcher.execute(&config, "IDENT").await;
        match ret {
            CaptureResult::Error { message } => assert!(message.contains("serial")),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn test_scope_capture_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as u32;
        let capture_cmd = ":WAV:SOUR CHAN1\n:WAV:MODE NORM\n:WAV:FORM BYTE\n:CHAN1:SCAL?\n:MEAS:VPP?\n:MEAS:FREQ?\n:WAV:PRE?\n:WAV:DATA?";

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0_u8; 256];
            let read = socket.read(&mut buf).await.unwrap();
            assert!(buf[..read].ends_with(b":WAV:DATA?\n"));
            let payload: Vec<u8> = (0..=199).map(|x| (x % 256) as u8).collect();
            let mut reply = Vec::new();
            reply.extend_from_slice(b"5.0E-01\n2.0E+00\n1.0E+03\n");
            reply.extend_from_slice(b"0,0,200,1,5.0E-06,0,0,1.5E-02,0.0,128\n");
            reply.extend_from_slice(b"#3200");
            reply.extend_from_slice(&payload);
            reply.push(b'\n');
            socket.write_all(&reply).await.unwrap();
        });

        let dispatcher = Dispatcher::new();
        let mut config = tcp_config("scope1", port, &[("CAPTURE_WAVEFORM", capture_cmd)]);
        config.kind = InstrumentKind::Oscilloscope;
        let ret = dispatcher.execute(&config, "CAPTURE_WAVEFORM").await;
        match ret {
            CaptureResult::Waveform(capture) => {
                assert_eq!(capture.samples.len(), 200);
                assert!((capture.vpp - 2.0).abs() < 1e-12);
                assert!((capture.freq - 1000.0).abs() < 1e-12);
                assert!((capture.voltage_scale - 0.5).abs() < 1e-12);
                assert!((capture.time_scale - 5.0e-06 * 200.0 / 10.0).abs() < 1e-15);
            }
            _ => panic!(),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_reuses_monitored_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as u32;
        let server = tokio::spawn(async move {
            // exactly one connection serves both the monitor and the query
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"BUTTON:TRIG\n").await.unwrap();
            let mut buf = [0_u8; 64];
            let read = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..read], b"MEAS:VOLT:DC?\n");
            socket.write_all(b"1.0E+00\n").await.unwrap();
            // hold the socket open until the client is done
            let _ = socket.read(&mut buf).await;
        });

        let dispatcher = Dispatcher::new();
        let config = tcp_config("dmm1", port, &[("MEASURE", "MEAS:VOLT:DC?")]);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        dispatcher.start_monitor(&config, events_tx).await.unwrap();

        match events_rx.recv().await.unwrap() {
            MonitorEvent::Line { data, .. } => assert_eq!(data, "BUTTON:TRIG"),
            _ => panic!(),
        }

        let ret = dispatcher.execute(&config, "MEASURE").await;
        match ret {
            CaptureResult::Value(x) => assert_eq!(x, "1.0E+00"),
            _ => panic!(),
        }

        dispatcher.stop_monitor(&config.name);
        match events_rx.recv().await.unwrap() {
            MonitorEvent::Stopped { error, .. } => assert!(error.is_none()),
            _ => panic!(),
        }
        // idempotent
        dispatcher.stop_monitor(&config.name);
        server.await.unwrap();
    }
}
