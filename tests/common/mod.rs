#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use gridstream::{Backend, BoxHandle, FileInfo, ObjectOptions, OpenMode, StorageHandle};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Open,
    Read(usize),
    Write(Bytes),
    Close,
}

/// Everything the handles did, in order, plus the highest number of
/// operations ever pending at once.
#[derive(Debug, Default)]
pub struct Recorder {
    ops: Mutex<Vec<Op>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Recorder {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(data) => Some(data),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat()
    }

    pub fn reads(&self) -> Vec<usize> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Read(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Give the caller side a chance to interleave.
        tokio::task::yield_now().await;
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Behaviour of a scripted handle.
#[derive(Debug, Clone)]
pub struct Script {
    /// Open waits for a permit on this gate.
    pub open_gate: Option<Arc<Notify>>,
    pub open_error: Option<io::ErrorKind>,
    pub info: FileInfo,
    /// Served by reads in order; reads past the end return empty chunks.
    /// When `None`, reads are served from `content`.
    pub reads: Option<VecDeque<Result<Bytes, io::ErrorKind>>>,
    pub content: Bytes,
    /// Zero-based index of the write that fails.
    pub fail_write: Option<usize>,
    pub close_error: Option<io::ErrorKind>,
}

impl Script {
    pub fn new(name: &str) -> Self {
        Self {
            open_gate: None,
            open_error: None,
            info: info(name, 0),
            reads: None,
            content: Bytes::new(),
            fail_write: None,
            close_error: None,
        }
    }

    pub fn gated(mut self, gate: &Arc<Notify>) -> Self {
        self.open_gate = Some(gate.clone());
        self
    }

    pub fn open_error(mut self, kind: io::ErrorKind) -> Self {
        self.open_error = Some(kind);
        self
    }

    pub fn content(mut self, content: &'static [u8]) -> Self {
        self.content = Bytes::from_static(content);
        self.info.length = content.len() as u64;
        self
    }

    pub fn length(mut self, length: u64) -> Self {
        self.info.length = length;
        self
    }

    pub fn reads(mut self, reads: Vec<Result<&'static str, io::ErrorKind>>) -> Self {
        self.reads = Some(
            reads
                .into_iter()
                .map(|r| r.map(|s| Bytes::from_static(s.as_bytes())))
                .collect(),
        );
        self
    }

    pub fn fail_write(mut self, index: usize) -> Self {
        self.fail_write = Some(index);
        self
    }

    pub fn close_error(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }

    pub fn handle(self, recorder: &Arc<Recorder>) -> BoxHandle {
        Box::new(ScriptedHandle {
            script: self,
            recorder: recorder.clone(),
            writes: 0,
            offset: 0,
        })
    }
}

pub fn info(name: &str, length: u64) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        namespace: "fs".to_string(),
        length,
        chunk_size: 4,
        content_type: None,
        hash: String::new(),
        metadata: serde_json::Value::Null,
    }
}

pub struct ScriptedHandle {
    script: Script,
    recorder: Arc<Recorder>,
    writes: usize,
    offset: usize,
}

#[async_trait]
impl StorageHandle for ScriptedHandle {
    async fn open(&mut self) -> io::Result<FileInfo> {
        self.recorder.enter(Op::Open).await;
        if let Some(gate) = &self.script.open_gate {
            gate.notified().await;
        }
        self.recorder.exit();

        match self.script.open_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(self.script.info.clone()),
        }
    }

    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        self.recorder.enter(Op::Read(max)).await;
        self.recorder.exit();

        match self.script.reads.as_mut() {
            Some(reads) => match reads.pop_front() {
                Some(Ok(chunk)) => Ok(chunk),
                Some(Err(kind)) => Err(io::Error::from(kind)),
                None => Ok(Bytes::new()),
            },
            None => {
                let end = (self.offset + max).min(self.script.content.len());
                let chunk = self.script.content.slice(self.offset..end);
                self.offset = end;
                Ok(chunk)
            }
        }
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.recorder.enter(Op::Write(chunk)).await;
        self.recorder.exit();

        let index = self.writes;
        self.writes += 1;
        match self.script.fail_write {
            Some(fail) if fail == index => Err(io::Error::other("write rejected")),
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.recorder.enter(Op::Close).await;
        self.recorder.exit();

        match self.script.close_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }
}

/// Backend handing out scripted handles, for facade tests.
pub struct ScriptedBackend {
    pub script: Script,
    pub recorder: Arc<Recorder>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            recorder: Arc::new(Recorder::default()),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn handle(&self, _name: &str, _mode: OpenMode, _options: &ObjectOptions) -> BoxHandle {
        self.script.clone().handle(&self.recorder)
    }

    async fn list(&self, _namespace: &str) -> io::Result<Vec<String>> {
        Ok(vec![self.script.info.name.clone()])
    }

    async fn unlink(&self, _name: &str, _namespace: &str) -> io::Result<()> {
        Ok(())
    }
}
