//! HTTP bodies and the byte-counting wrapper around them.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::{Meter, Tick};
use crate::data::{Direction, Extras, Progress, State};
use crate::effects::dispatch::Dispatcher;
use crate::error::{Error, Result};

/// A boxed stream type for body chunks.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Error carried by body streams.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// One pass over a body.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, BodyError>>;

type StreamFactory = Arc<dyn Fn() -> Option<BodyStream> + Send + Sync>;

const CHUNK_SIZE: usize = 8 * 1024;

enum Source {
    Empty,
    Full(Bytes),
    Replayable(StreamFactory),
    Once(Mutex<Option<BodyStream>>),
}

/// Request or response body.
///
/// A transport calls [`Body::open`] once per attempt. In-memory and
/// replayable bodies can be opened any number of times; streamed bodies only
/// once.
pub struct Body {
    source:         Source,
    content_length: Option<u64>,
    content_type:   Option<String>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            source:         Source::Empty,
            content_length: Some(0),
            content_type:   None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            content_length: Some(bytes.len() as u64),
            source:         Source::Full(bytes),
            content_type:   None,
        }
    }

    /// A single-use body with an optional declared length.
    pub fn from_stream<S, E>(stream: S, content_length: Option<u64>) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BodyError> + 'static,
    {
        let stream: BodyStream = Box::pin(stream.map(|chunk| chunk.map_err(Into::into)));
        Self {
            source: Source::Once(Mutex::new(Some(stream))),
            content_length,
            content_type: None,
        }
    }

    /// A body that produces a fresh stream for every attempt.
    pub fn replayable<F>(factory: F, content_length: Option<u64>) -> Self
    where
        F: Fn() -> Option<BodyStream> + Send + Sync + 'static,
    {
        Self {
            source: Source::Replayable(Arc::new(factory)),
            content_length,
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_length(&self) -> Option<u64> { self.content_length }

    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    /// Returns `true` for a body that carries nothing to transfer.
    pub fn is_empty(&self) -> bool {
        match &self.source {
            Source::Empty => true,
            Source::Full(bytes) => bytes.is_empty(),
            _ => self.content_length == Some(0),
        }
    }

    /// Start one pass over the body.
    ///
    /// Returns `None` once a single-use body has been consumed.
    pub fn open(&self) -> Option<BodyStream> {
        match &self.source {
            Source::Empty => Some(Box::pin(stream::empty())),
            Source::Full(bytes) => Some(chunked(bytes.clone())),
            Source::Replayable(factory) => factory(),
            Source::Once(slot) => slot.lock().take(),
        }
    }

    pub fn into_stream(self) -> Result<BodyStream> { self.open().ok_or(Error::BodyConsumed) }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        let mut stream = self.into_stream()?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    fn rewrap(&self, source: Source) -> Self {
        Self {
            source,
            content_length: self.content_length,
            content_type: self.content_type.clone(),
        }
    }
}

impl Default for Body {
    fn default() -> Self { Self::empty() }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::from_bytes(bytes) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::from_bytes(bytes) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Self::from_bytes(Bytes::from_static(text.as_bytes())) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self::from_bytes(text) }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Empty => "empty",
            Source::Full(_) => "bytes",
            Source::Replayable(_) => "replayable",
            Source::Once(_) => "stream",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish()
    }
}

fn chunked(bytes: Bytes) -> BodyStream {
    let chunks: Vec<std::result::Result<Bytes, BodyError>> = (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// Everything a wrapper needs to turn ticks into dispatched progress.
#[derive(Clone)]
pub(crate) struct Emitter {
    dispatcher: Arc<Dispatcher>,
    extras:     Extras,
    url:        Arc<str>,
    total:      Option<u64>,
    refresh:    Duration,
}

impl Emitter {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        extras: Extras,
        url: Arc<str>,
        total: Option<u64>,
        refresh: Duration,
    ) -> Self {
        Self {
            dispatcher,
            extras,
            url,
            total,
            refresh,
        }
    }

    fn meter(&self) -> Meter { Meter::new(self.total, self.refresh) }

    fn emit(&self, ticks: Vec<Tick>, fault: impl FnOnce() -> Error) {
        let mut pending = Some(fault);
        for tick in ticks {
            let fault = match tick.state {
                State::Error => pending.take().map(|f| Arc::new(f())),
                _ => None,
            };
            self.dispatcher.dispatch(Progress {
                url: Arc::clone(&self.url),
                direction: self.extras.direction(),
                bytes_transferred: tick.transferred,
                total_bytes: self.total,
                state: tick.state,
                fault,
                extras: self.extras.clone(),
                elapsed: tick.elapsed,
            });
        }
    }
}

/// Stream adapter that counts bytes and reports lifecycle events.
///
/// Chunks and errors pass through unchanged. Dropping the stream after the
/// first chunk but before its end reports the transfer as cancelled.
pub struct CountingStream<S> {
    inner:   S,
    meter:   Meter,
    emitter: Emitter,
    claim:   Option<Arc<AtomicBool>>,
    silent:  bool,
}

impl<S> CountingStream<S> {
    pub(crate) fn new(inner: S, emitter: Emitter) -> Self {
        Self {
            inner,
            meter: emitter.meter(),
            emitter,
            claim: None,
            silent: false,
        }
    }

    /// Report only if no other stream sharing `claim` has started first.
    pub(crate) fn claiming(mut self, claim: Arc<AtomicBool>) -> Self {
        self.claim = Some(claim);
        self
    }

    /// Bytes counted so far (clamped to the declared length).
    pub fn transferred(&self) -> u64 { self.meter.transferred() }

    fn report(&mut self, ticks: Vec<Tick>, fault: impl FnOnce() -> Error) {
        if ticks.first().is_some_and(|tick| tick.state == State::Start) {
            if let Some(claim) = &self.claim {
                self.silent = claim.swap(true, Ordering::AcqRel);
            }
        }
        if !self.silent && !ticks.is_empty() {
            self.emitter.emit(ticks, fault);
        }
    }
}

impl<S, E> Stream for CountingStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let ticks = this.meter.on_chunk(chunk.len(), Instant::now());
                this.report(ticks, || Error::Cancelled);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let ticks = this.meter.on_fault(Instant::now());
                this.report(ticks, || Error::Transport(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                let ticks = this.meter.on_complete(Instant::now());
                this.report(ticks, || Error::Cancelled);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) { self.inner.size_hint() }
}

impl<S> Drop for CountingStream<S> {
    fn drop(&mut self) {
        let ticks = self.meter.on_abandon(Instant::now());
        self.report(ticks, || Error::Cancelled);
    }
}

/// Wrap a response body. The result is single-use like the stream it wraps.
pub(crate) fn wrap_response(body: Body, emitter: Emitter) -> Body {
    let wrapped = match body.open() {
        Some(inner) => {
            let counted: BodyStream = Box::pin(CountingStream::new(inner, emitter));
            Source::Once(Mutex::new(Some(counted)))
        }
        None => return body,
    };
    body.rewrap(wrapped)
}

/// Wrap a request body so every attempt the transport makes is counted.
///
/// With `one_shot` only the first attempt that moves bytes is counted, later
/// replays pass through untouched. An attempt opened and dropped before its
/// first chunk does not count as first. Otherwise each attempt is its own
/// transfer starting from zero.
pub(crate) fn wrap_request(body: Body, emitter: Emitter, one_shot: bool) -> Body {
    debug_assert_eq!(emitter.extras.direction(), Direction::Request);

    let original = Arc::new(body);
    let started = Arc::new(AtomicBool::new(false));
    let inner = Arc::clone(&original);

    let factory = move || {
        let stream = inner.open()?;
        if !one_shot {
            return Some(Box::pin(CountingStream::new(stream, emitter.clone())) as BodyStream);
        }
        if started.load(Ordering::Acquire) {
            return Some(stream);
        }
        let counted = CountingStream::new(stream, emitter.clone()).claiming(Arc::clone(&started));
        Some(Box::pin(counted) as BodyStream)
    };
    original.rewrap(Source::Replayable(Arc::new(factory)))
}
