//! Scripted fake shell and transport for tests

use crate::channel::ByteChannel;
use crate::credentials::AuthMethod;
use crate::error::ShellError;
use crate::marker::{COMMAND_SUFFIX, end_record};
use crate::transport::{SessionTarget, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

enum Item {
    Data(Vec<u8>),
    HangUp,
}

/// What the fake shell sends back after receiving one line
#[derive(Default)]
pub(crate) struct Reply {
    items: Vec<(Duration, Item)>,
}

impl Reply {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.after(Duration::ZERO, bytes)
    }

    /// Send `bytes` once `delay` has passed since the previous item
    pub(crate) fn after(mut self, delay: Duration, bytes: impl Into<Vec<u8>>) -> Self {
        self.items.push((delay, Item::Data(bytes.into())));
        self
    }

    pub(crate) fn hang_up(mut self) -> Self {
        self.items.push((Duration::ZERO, Item::HangUp));
        self
    }
}

/// Echo of a typed line as a PTY shows it
pub(crate) fn echo(line: &str) -> Vec<u8> {
    format!("{}\r\n", line).into_bytes()
}

/// Echo, output and end-of-command record of a framed command, followed by a prompt
pub(crate) fn framed(line: &str, output: &[u8], exit_code: i32) -> Reply {
    let mut tail = output.to_vec();
    tail.extend(end_record(exit_code));
    tail.extend_from_slice(b"\r\n$ ");
    Reply::new().then(echo(line)).then(tail)
}

/// Lines written to the fake shell
#[derive(Clone, Default)]
pub(crate) struct Written(Arc<Mutex<Vec<String>>>);

impl Written {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.0.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.lines().iter().filter(|line| predicate(line)).count()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }
}

type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

pub(crate) struct FakeShell {
    responder: Responder,
    queue: VecDeque<(Instant, Item)>,
    partial: Vec<u8>,
    ended: bool,
    written: Written,
    closed: Arc<AtomicBool>,
}

impl FakeShell {
    pub(crate) fn new(responder: impl FnMut(&str) -> Reply + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            queue: VecDeque::new(),
            partial: Vec::new(),
            ended: false,
            written: Written::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shell that answers every framed command through `run`, which maps the bare
    /// command line to its output and exit status
    pub(crate) fn framing(mut run: impl FnMut(&str) -> (Vec<u8>, i32) + Send + 'static) -> Self {
        Self::new(move |line: &str| match line.strip_suffix(COMMAND_SUFFIX) {
            Some(command) => {
                let (output, exit_code) = run(command);
                framed(line, &output, exit_code)
            }
            None => Reply::new().then(echo(line)),
        })
    }

    pub(crate) fn with_greeting(mut self, greeting: &[u8]) -> Self {
        self.queue
            .push_back((Instant::now(), Item::Data(greeting.to_vec())));
        self
    }

    pub(crate) fn written(&self) -> Written {
        self.written.clone()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn schedule(&mut self, reply: Reply) {
        let now = Instant::now();
        let mut at = match self.queue.back() {
            Some((last, _)) if *last > now => *last,
            _ => now,
        };
        for (delay, item) in reply.items {
            at += delay;
            self.queue.push_back((at, item));
        }
    }
}

#[async_trait]
impl ByteChannel for FakeShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), ShellError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShellError::Channel("fake shell is closed".to_string()));
        }
        self.partial.extend_from_slice(data);
        while let Some(newline) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.written.push(line.clone());
            let reply = (self.responder)(&line);
            self.schedule(reply);
        }
        Ok(())
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.ended || self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let Some((at, _)) = self.queue.front() else {
                std::future::pending::<()>().await;
                continue;
            };
            tokio::time::sleep_until(*at).await;
            match self.queue.pop_front() {
                Some((_, Item::Data(data))) => return Some(data),
                Some((_, Item::HangUp)) => self.ended = true,
                None => {}
            }
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Counters shared between a `FakeTransport` and the test that owns it
#[derive(Clone, Default)]
pub(crate) struct TransportStats {
    pub(crate) connects: Arc<AtomicUsize>,
    pub(crate) shells: Arc<AtomicUsize>,
    pub(crate) closes: Arc<AtomicUsize>,
    pub(crate) transfers: Arc<Mutex<Vec<String>>>,
}

pub(crate) struct FakeTransport {
    new_shell: Box<dyn FnMut() -> FakeShell + Send>,
    refuse: Option<fn() -> ShellError>,
    stats: TransportStats,
}

impl FakeTransport {
    pub(crate) fn new(new_shell: impl FnMut() -> FakeShell + Send + 'static) -> Self {
        Self {
            new_shell: Box::new(new_shell),
            refuse: None,
            stats: TransportStats::default(),
        }
    }

    pub(crate) fn refusing(mut self, error: fn() -> ShellError) -> Self {
        self.refuse = Some(error);
        self
    }

    pub(crate) fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &mut self,
        _target: &SessionTarget,
        _auth: &AuthMethod,
    ) -> Result<(), ShellError> {
        if let Some(error) = self.refuse {
            return Err(error());
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_shell(&mut self) -> Result<Box<dyn ByteChannel>, ShellError> {
        self.stats.shells.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new((self.new_shell)()))
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ShellError> {
        if let Ok(mut transfers) = self.stats.transfers.lock() {
            transfers.push(format!("upload {} {}", local_path.display(), remote_path));
        }
        Ok(())
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), ShellError> {
        if let Ok(mut transfers) = self.stats.transfers.lock() {
            transfers.push(format!("download {} {}", remote_path, local_path.display()));
        }
        Ok(())
    }

    async fn close_all(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}
