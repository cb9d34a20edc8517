/// The shared channel: one long-lived task owning the link to one
/// instrument. Requests from `execute` calls queue up and are served in
/// order; between requests the task reads the link and forwards unsolicited
/// lines to the monitor subscriber. A reply arriving while a query is being
/// served reaches only that query's caller.
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::Duration;

use benchsrv_protocol::{MonitorEvent, WaveformCapture};

use crate::codec::{self, LineSplitter};
use crate::iotask::{IoHandler, IoTask};
use crate::scpi;
use crate::transport::ByteLink;
use crate::Error;

pub enum Request {
    Write(String),
    Query { command: String, timeout: Duration },
    Waveform { command: String, timeout: Duration },
}

pub enum Response {
    Done,
    Line(String),
    Waveform(WaveformCapture),
}

#[derive(Clone)]
pub struct Channel {
    inner: IoTask<LinkHandler<ByteLink>>,
}

impl Channel {
    pub fn start(
        name: String,
        link: ByteLink,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            inner: IoTask::new(LinkHandler::new(name, link, events)),
        }
    }

    pub async fn request(&mut self, req: Request) -> crate::Result<Response> {
        self.inner.request(req).await
    }

    pub fn stop(mut self) {
        self.inner.disconnect()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

struct LinkHandler<T> {
    name: String,
    link: Option<T>,
    lines: LineSplitter,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> LinkHandler<T> {
    fn new(name: String, link: T, events: mpsc::UnboundedSender<MonitorEvent>) -> Self {
        Self {
            name,
            link: Some(link),
            lines: LineSplitter::new(),
            events,
        }
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> IoHandler for LinkHandler<T> {
    type Request = Request;
    type Response = Response;

    async fn handle(&mut self, req: Request) -> crate::Result<Response> {
        let lines = &mut self.lines;
        let link = self.link.as_mut().ok_or(Error::ChannelClosed)?;
        match req {
            Request::Write(command) => {
                scpi::write_command(link, &command).await?;
                Ok(Response::Done)
            }
            Request::Query { command, timeout } => {
                scpi::write_command(link, &command).await?;
                let fut = async {
                    loop {
                        if let Some(raw) = lines.next_line() {
                            return Ok(codec::clean(&raw));
                        }
                        let mut chunk = [0_u8; 1024];
                        let read = link.read(&mut chunk).await.map_err(Error::transport)?;
                        if read == 0 {
                            return Err(closed_by_peer());
                        }
                        lines.push(&chunk[..read]);
                    }
                };
                match time::timeout(timeout, fut).await {
                    Ok(x) => x.map(Response::Line),
                    Err(_) => Err(Error::Timeout),
                }
            }
            Request::Waveform { command, timeout } => scpi::query_waveform(link, &command, timeout)
                .await
                .map(Response::Waveform),
        }
    }

    async fn idle(&mut self) -> crate::Result<()> {
        let link = self.link.as_mut().ok_or(Error::ChannelClosed)?;
        let mut chunk = [0_u8; 1024];
        let read = link.read(&mut chunk).await.map_err(Error::transport)?;
        if read == 0 {
            return Err(closed_by_peer());
        }
        self.lines.push(&chunk[..read]);
        while let Some(raw) = self.lines.next_line() {
            let text = codec::clean(&raw);
            if !text.is_empty() {
                log::debug!("{}: unsolicited line: {}", self.name, text);
                let _ = self.events.send(MonitorEvent::Line {
                    instrument: self.name.clone(),
                    data: text,
                });
            }
        }
        Ok(())
    }

    fn finish(&mut self, err: Option<Error>) {
        if let Some(err) = &err {
            log::warn!("{}: channel stopped: {}", self.name, err);
        } else {
            log::debug!("{}: channel stopped", self.name);
        }
        self.link.take();
        let _ = self.events.send(MonitorEvent::Stopped {
            instrument: self.name.clone(),
            error: err,
        });
    }
}

fn closed_by_peer() -> Error {
    Error::transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by instrument",
    ))
}
