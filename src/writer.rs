use std::{
    collections::VecDeque,
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use tokio::{
    io::AsyncWrite,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, instrument, trace, warn};

use crate::{
    encoding::Encoding,
    error::{Error, Result},
    state::{self, StreamState},
    storage::BoxHandle,
};

enum WriteCommand {
    Chunk {
        data: Bytes,
        ack: oneshot::Sender<Result<()>>,
    },
    Finish,
}

/// Resolves once the chunk has been handed to the storage handle, or with the
/// error that failed it. If the handle fails to open, only the oldest queued
/// chunk receives that error; every later queued chunk resolves to
/// [`Error::Discarded`] and the failure itself is reported by
/// [`WriteStream::closed`].
#[must_use = "a WriteAck does nothing unless awaited"]
pub struct WriteAck(Option<oneshot::Receiver<Result<()>>>);

impl WriteAck {
    fn failed() -> Self {
        Self(None)
    }
}

impl Future for WriteAck {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.as_mut() {
            Some(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(Error::Discarded))),
            None => Poll::Ready(Err(Error::Finished)),
        }
    }
}

pub struct WriteStream {
    name: String,
    commands: mpsc::UnboundedSender<WriteCommand>,
    state: watch::Receiver<StreamState>,
    finished: bool,
    max_pending: usize,
    outstanding: VecDeque<WriteAck>,
    shutdown: Option<Pin<Box<dyn Future<Output = Result<()>> + Send>>>,
}

impl WriteStream {
    pub fn new(name: impl Into<String>, handle: BoxHandle, max_pending: usize) -> Self {
        let name = name.into();
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(StreamState::Opening);

        let driver = WriteDriver {
            name: name.clone(),
            handle,
            commands: rx,
            state: state_tx,
        };
        tokio::spawn(driver.run());

        Self {
            name,
            commands,
            state,
            finished: false,
            max_pending: max_pending.max(1),
            outstanding: VecDeque::new(),
            shutdown: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn push(&self, chunk: impl Into<Bytes>) -> WriteAck {
        if self.finished {
            return WriteAck::failed();
        }

        let (ack, rx) = oneshot::channel();
        // A closed channel drops `ack`, which resolves the receiver as discarded.
        let _ = self.commands.send(WriteCommand::Chunk {
            data: chunk.into(),
            ack,
        });

        WriteAck(Some(rx))
    }

    pub fn push_str(&self, text: &str, encoding: Encoding) -> Result<WriteAck> {
        let chunk = encoding.encode(text)?;
        Ok(self.push(chunk))
    }

    /// Chunks still queued behind a pending open are written before the handle
    /// is closed.
    pub fn finish(&mut self) -> impl Future<Output = Result<()>> + Send + use<> {
        self.signal_finish();
        self.closed()
    }

    pub fn closed(&self) -> impl Future<Output = Result<()>> + Send + use<> {
        state::wait_terminal(self.state.clone())
    }

    fn signal_finish(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.commands.send(WriteCommand::Finish);
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>, keep: usize) -> Poll<io::Result<()>> {
        while self.outstanding.len() > keep {
            let Some(ack) = self.outstanding.front_mut() else {
                break;
            };
            let result = ready!(Pin::new(ack).poll(cx));
            self.outstanding.pop_front();
            result?;
        }

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for WriteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.finished {
            return Poll::Ready(Err(Error::Finished.into()));
        }
        if let StreamState::Errored(err) = &*self.state.borrow() {
            return Poll::Ready(Err(err.clone().into()));
        }

        let keep = self.max_pending - 1;
        ready!(self.poll_drain(cx, keep))?;

        let ack = self.push(Bytes::copy_from_slice(buf));
        self.outstanding.push_back(ack);

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_drain(cx, 0)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.poll_drain(cx, 0))?;

        if self.shutdown.is_none() {
            self.signal_finish();
            self.shutdown = Some(Box::pin(self.closed()));
        }

        match self.shutdown.as_mut() {
            Some(shutdown) => shutdown.as_mut().poll(cx).map_err(io::Error::from),
            None => Poll::Ready(Ok(())),
        }
    }
}

struct WriteDriver {
    name: String,
    handle: BoxHandle,
    commands: mpsc::UnboundedReceiver<WriteCommand>,
    state: watch::Sender<StreamState>,
}

impl WriteDriver {
    #[instrument(name = "write_stream", skip_all, fields(name = %self.name))]
    async fn run(mut self) {
        let mut queued = VecDeque::new();

        let opened = {
            let open = self.handle.open();
            tokio::pin!(open);

            loop {
                tokio::select! {
                    biased;
                    result = &mut open => break result,
                    Some(command) = self.commands.recv() => queued.push_back(command),
                }
            }
        };

        if let Err(e) = opened {
            let err = Error::open(&self.name, e);
            debug!(queued = queued.len(), error = %err, "open failed");

            if let Some(WriteCommand::Chunk { ack, .. }) = queued.pop_front() {
                let _ = ack.send(Err(err.clone()));
            }
            self.fail(err);
            return;
        }

        debug!(queued = queued.len(), "opened, replaying queued commands");
        self.state.send_replace(StreamState::Streaming);

        loop {
            let command = match queued.pop_front() {
                Some(command) => command,
                None => match self.commands.recv().await {
                    Some(command) => command,
                    None => {
                        warn!("write stream dropped before finish, discarding handle");
                        return;
                    }
                },
            };

            match command {
                WriteCommand::Chunk { data, ack } => {
                    if let Err(err) = self.write(data).await {
                        let _ = ack.send(Err(err.clone()));
                        self.fail(err);
                        return;
                    }
                    let _ = ack.send(Ok(()));
                }
                WriteCommand::Finish => {
                    trace!("close");
                    match self.handle.close().await {
                        Ok(()) => {
                            debug!("closed");
                            self.state.send_replace(StreamState::Closed);
                        }
                        Err(e) => self.fail(Error::io(&self.name, e)),
                    }
                    return;
                }
            }
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        trace!(len = data.len(), "write");
        self.handle
            .write(data)
            .await
            .map_err(|e| Error::io(&self.name, e))
    }

    fn fail(&mut self, err: Error) {
        debug!(error = %err, "write stream failed");
        self.state.send_replace(StreamState::Errored(err));
    }
}
