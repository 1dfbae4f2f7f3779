use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument, trace};

use crate::{
    error::{Error, Result},
    state::{self, StreamState},
    storage::{BoxHandle, FileInfo},
};

#[derive(Debug, Clone)]
pub enum ReadEvent {
    Data(Bytes),
    End,
    Error(Error),
}

#[derive(Debug, Default)]
struct Progress {
    info: OnceLock<FileInfo>,
    bytes_read: AtomicU64,
}

/// Pulls issued while the storage handle is still opening are queued and
/// served in order once it opens. Each pull is clamped to the bytes the
/// object has left, so the total delivered never exceeds its length.
pub struct ReadStream {
    name: String,
    pulls: mpsc::UnboundedSender<usize>,
    events: mpsc::UnboundedReceiver<ReadEvent>,
    state: watch::Receiver<StreamState>,
    progress: Arc<Progress>,
    pull_size: usize,
    // pulls not yet answered by an event
    requested: AtomicUsize,
    done: bool,
}

impl ReadStream {
    pub fn new(name: impl Into<String>, handle: BoxHandle, pull_size: usize) -> Self {
        let name = name.into();
        let (pulls, pulls_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(StreamState::Opening);
        let progress = Arc::new(Progress::default());

        let driver = ReadDriver {
            name: name.clone(),
            handle,
            pulls: pulls_rx,
            events: events_tx,
            state: state_tx,
            progress: progress.clone(),
            expected_size: 0,
            bytes_read: 0,
        };
        tokio::spawn(driver.run());

        Self {
            name,
            pulls,
            events,
            state,
            progress,
            pull_size: pull_size.max(1),
            requested: AtomicUsize::new(0),
            done: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn info(&self) -> Option<&FileInfo> {
        self.progress.info.get()
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.info().map(|info| info.length)
    }

    pub fn bytes_read(&self) -> u64 {
        self.progress.bytes_read.load(Ordering::Acquire)
    }

    /// Requests up to `size` more bytes. Every pull is answered by exactly one
    /// event; a zero-sized pull is ignored.
    ///
    /// Pulls issued before the stream is polled as a [`Stream`] are served
    /// first; polling only adds a pull once all of them have been answered.
    pub fn pull(&self, size: usize) {
        if size > 0 && self.pulls.send(size).is_ok() {
            self.requested.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn next_event(&mut self) -> Option<ReadEvent> {
        let event = self.events.recv().await;
        self.answered();
        event
    }

    pub fn closed(&self) -> impl Future<Output = Result<()>> + Send + use<> {
        state::wait_terminal(self.state.clone())
    }

    fn answered(&self) {
        let _ = self
            .requested
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn into_async_read(self) -> StreamReader<Self, Bytes> {
        StreamReader::new(self)
    }
}

impl Stream for ReadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        if self.requested.load(Ordering::Relaxed) == 0 {
            self.pull(self.pull_size);
        }

        let event = ready!(self.events.poll_recv(cx));
        self.answered();

        match event {
            Some(ReadEvent::Data(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(ReadEvent::End) => {
                self.done = true;
                Poll::Ready(None)
            }
            Some(ReadEvent::Error(err)) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.done = true;
                Poll::Ready(Some(Err(Error::Discarded)))
            }
        }
    }
}

enum Flow {
    Continue,
    Done,
}

struct ReadDriver {
    name: String,
    handle: BoxHandle,
    pulls: mpsc::UnboundedReceiver<usize>,
    events: mpsc::UnboundedSender<ReadEvent>,
    state: watch::Sender<StreamState>,
    progress: Arc<Progress>,
    expected_size: u64,
    bytes_read: u64,
}

impl ReadDriver {
    #[instrument(name = "read_stream", skip_all, fields(name = %self.name))]
    async fn run(mut self) {
        let mut queued = VecDeque::new();

        let opened = {
            let open = self.handle.open();
            tokio::pin!(open);

            loop {
                tokio::select! {
                    biased;
                    result = &mut open => break result,
                    Some(size) = self.pulls.recv() => queued.push_back(size),
                }
            }
        };

        let info = match opened {
            Ok(info) => info,
            Err(e) => {
                let err = Error::open(&self.name, e);
                debug!(queued = queued.len(), error = %err, "open failed");
                self.fail(err);
                return;
            }
        };

        if self.events.is_closed() {
            debug!("read stream dropped while opening, closing handle");
            let _ = self.handle.close().await;
            return;
        }

        debug!(length = info.length, queued = queued.len(), "opened");
        self.expected_size = info.length;
        let _ = self.progress.info.set(info);
        self.state.send_replace(StreamState::Streaming);

        loop {
            let size = match queued.pop_front() {
                Some(size) => size,
                None => match self.pulls.recv().await {
                    Some(size) => size,
                    None => {
                        debug!("read stream dropped, closing handle");
                        let _ = self.handle.close().await;
                        return;
                    }
                },
            };

            if let Flow::Done = self.serve(size).await {
                return;
            }
        }
    }

    async fn serve(&mut self, size: usize) -> Flow {
        let available = self.expected_size - self.bytes_read;
        if available == 0 {
            return self.end().await;
        }

        let request = usize::try_from(available).map_or(size, |available| size.min(available));
        trace!(request, "read");

        match self.handle.read(request).await {
            Err(e) => {
                self.fail(Error::io(&self.name, e));
                Flow::Done
            }
            Ok(chunk) if chunk.is_empty() => self.end().await,
            Ok(mut chunk) => {
                chunk.truncate(request);
                self.bytes_read += chunk.len() as u64;
                self.progress
                    .bytes_read
                    .store(self.bytes_read, Ordering::Release);

                if self.events.send(ReadEvent::Data(chunk)).is_err() {
                    debug!("read stream dropped, closing handle");
                    let _ = self.handle.close().await;
                    return Flow::Done;
                }
                Flow::Continue
            }
        }
    }

    async fn end(&mut self) -> Flow {
        trace!("close");
        match self.handle.close().await {
            Ok(()) => {
                debug!(bytes_read = self.bytes_read, "end of stream");
                self.state.send_replace(StreamState::Closed);
                let _ = self.events.send(ReadEvent::End);
            }
            Err(e) => self.fail(Error::io(&self.name, e)),
        }
        Flow::Done
    }

    fn fail(&mut self, err: Error) {
        debug!(error = %err, "read stream failed");
        self.state.send_replace(StreamState::Errored(err.clone()));
        let _ = self.events.send(ReadEvent::Error(err));
    }
}
