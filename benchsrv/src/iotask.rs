use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task;

use crate::Error;

pub trait Message: 'static + Send {}

impl<T: 'static + Send> Message for T {}

/// Handler owned by an I/O task. Requests are served strictly one at a time
/// in arrival order; between requests the task polls `idle()` so the handler
/// can watch its link for unsolicited traffic. `handle()` and `idle()` are
/// never in flight together.
#[async_trait]
pub trait IoHandler: Send {
    type Request: Message;
    type Response: Message;

    async fn handle(&mut self, req: Self::Request) -> crate::Result<Self::Response>;

    /// Dropped and re-created whenever a request arrives, so it must be
    /// cancel-safe: no side effects before its last await.
    async fn idle(&mut self) -> crate::Result<()>;

    /// Runs once as the task winds down, with the error that stopped it
    /// if any.
    fn finish(&mut self, err: Option<Error>);
}

enum RequestMsg<T: IoHandler> {
    Task {
        req: T::Request,
        answer: oneshot::Sender<crate::Result<T::Response>>,
    },
    Drop,
}

fn is_fatal(err: &Error) -> bool {
    matches!(err, Error::Transport(_) | Error::ChannelClosed)
}

pub struct IoTask<T: IoHandler> {
    tx: mpsc::UnboundedSender<RequestMsg<T>>,
}

// manual impl: handlers own live streams and are never themselves Clone
impl<T: IoHandler> Clone for IoTask<T> {
    fn clone(&self) -> Self {
        IoTask { tx: self.tx.clone() }
    }
}

impl<T: 'static + IoHandler> IoTask<T> {
    pub fn new(mut handler: T) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RequestMsg<T>>();
        task::spawn(async move {
            let stop_err = loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => {
                        match msg {
                            Some(RequestMsg::Task { req, answer }) => {
                                let result = handler.handle(req).await;
                                let fatal = match &result {
                                    Err(err) if is_fatal(err) => Some(err.clone()),
                                    _ => None,
                                };
                                let _ = answer.send(result);
                                if let Some(err) = fatal {
                                    break Some(err);
                                }
                            }
                            Some(RequestMsg::Drop) | None => break None,
                        }
                    }
                    ret = handler.idle() => {
                        if let Err(err) = ret {
                            break Some(err);
                        }
                    }
                }
            };
            handler.finish(stop_err);
        });
        IoTask { tx }
    }

    pub fn disconnect(&mut self) {
        let _ = self.tx.send(RequestMsg::Drop);
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn request(&mut self, req: T::Request) -> crate::Result<T::Response> {
        let (tx, rx) = oneshot::channel();
        let msg = RequestMsg::Task { req, answer: tx };
        self.tx.send(msg).map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }
}
