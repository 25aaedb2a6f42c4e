//! End-to-end progress reporting through an interceptor chain.
//!
//! Bodies are paced with `tokio::time::sleep` on a paused clock, so the
//! throttling assertions are deterministic.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use tracing_subscriber::EnvFilter;

use byteward::{
    Body, Chain, Direction, Error, Listener, Operation, OperationUpdate, Progress, Request,
    Response, Result, SerialQueue, State, Transport, listener, recycling,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("byteward=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A body of `chunks` pieces of `size` bytes, one every `every`.
fn paced(chunks: usize, size: usize, every: Duration) -> Body {
    let pieces = stream::unfold(0usize, move |sent| async move {
        if sent == chunks {
            return None;
        }
        tokio::time::sleep(every).await;
        Some((Ok::<_, io::Error>(Bytes::from(vec![7u8; size])), sent + 1))
    });
    Body::from_stream(pieces, Some((chunks * size) as u64))
}

/// Reads the whole request body, answers with an empty body.
struct Sink;

#[async_trait]
impl Transport for Sink {
    async fn send(&self, request: Request) -> Result<Response> {
        request.body.collect().await?;
        Ok(Response::new(204, request.url, Body::empty()))
    }
}

/// Answers every request with a paced body.
struct Serve {
    chunks: usize,
    size:   usize,
    every:  Duration,
}

#[async_trait]
impl Transport for Serve {
    async fn send(&self, request: Request) -> Result<Response> {
        Ok(Response::new(200, request.url, paced(self.chunks, self.size, self.every)))
    }
}

/// Sends the request body twice, like a client following a 307 redirect.
struct Redirect;

#[async_trait]
impl Transport for Redirect {
    async fn send(&self, request: Request) -> Result<Response> {
        for _ in 0..2 {
            let mut attempt = request.body.open().ok_or(Error::BodyConsumed)?;
            while let Some(chunk) = attempt.next().await {
                chunk.map_err(|e| Error::Transport(e.to_string()))?;
            }
        }
        Ok(Response::new(200, request.url, Body::empty()))
    }
}

/// Opens the body, gives up before writing, then sends it on a second attempt.
struct RefusedThenRetried;

#[async_trait]
impl Transport for RefusedThenRetried {
    async fn send(&self, request: Request) -> Result<Response> {
        drop(request.body.open());
        let mut attempt = request.body.open().ok_or(Error::BodyConsumed)?;
        while let Some(chunk) = attempt.next().await {
            chunk.map_err(|e| Error::Transport(e.to_string()))?;
        }
        Ok(Response::new(200, request.url, Body::empty()))
    }
}

type Log = Arc<Mutex<Vec<(&'static str, Progress)>>>;

fn recorder(log: &Log, who: &'static str) -> Listener {
    let log = Arc::clone(log);
    listener(move |p: &Progress| log.lock().unwrap().push((who, p.clone())))
}

fn new_log() -> Log { Arc::new(Mutex::new(Vec::new())) }

fn of(log: &Log, who: &str, direction: Direction) -> Vec<Progress> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(name, p)| *name == who && p.direction == direction)
        .map(|(_, p)| p.clone())
        .collect()
}

fn count(events: &[Progress], state: State) -> usize { events.iter().filter(|p| p.state == state).count() }

fn assert_well_formed(events: &[Progress]) {
    assert_eq!(events.first().map(|p| p.state), Some(State::Start));
    assert_eq!(events.last().map(|p| p.state), Some(State::End));
    assert_eq!(count(events, State::Start), 1);
    assert_eq!(count(events, State::End), 1);
    assert!(events.windows(2).all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
    for p in events {
        if let Some(total) = p.total_bytes {
            assert!(p.bytes_transferred <= total);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_upload_end_to_end() {
    init_tracing();
    let url = "http://files.local/upload";
    let refresh = Duration::from_millis(500);

    let operation = Operation::new();
    let log = new_log();
    operation.configure(
        OperationUpdate::default()
            .refresh_time(refresh)
            .global_callback(recorder(&log, "G")),
    );
    assert!(operation.add_request_listener(url, recorder(&log, "L")));

    let mut chain = Chain::new(Sink);
    assert!(operation.install(&mut chain));

    let response = chain
        .execute(Request::post(url).body(paced(10, 100, Duration::from_millis(50))))
        .await
        .unwrap();
    assert_eq!(response.status, 204);

    let upload = of(&log, "L", Direction::Request);
    assert_well_formed(&upload);
    assert_eq!(upload.last().unwrap().bytes_transferred, 1000);
    assert_eq!(upload.last().unwrap().total_bytes, Some(1000));

    let finish = upload.iter().find(|p| p.state == State::Finish).unwrap();
    assert_eq!(finish.bytes_transferred, 1000);
    assert_eq!(finish.percentage(), Some(100.0));

    let duration = upload.last().unwrap().elapsed;
    let ceiling = (duration.as_secs_f64() / refresh.as_secs_f64()).ceil() as usize + 1;
    assert!(count(&upload, State::Progress) <= ceiling);

    // Global first in every fan-out of the upload
    let order: Vec<(&str, State)> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, p)| p.direction == Direction::Request)
        .map(|(who, p)| (*who, p.state))
        .collect();
    for pair in order.chunks(2) {
        assert_eq!(pair[0].0, "G");
        assert_eq!(pair[1].0, "L");
        assert_eq!(pair[0].1, pair[1].1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_download_is_throttled() {
    init_tracing();
    let url = "http://files.local/archive.tar";

    let operation = Operation::new();
    let log = new_log();
    operation.configure(OperationUpdate::default().refresh_time(Duration::from_millis(100)));
    operation.add_response_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(Serve {
        chunks: 100,
        size:   10,
        every:  Duration::from_millis(10),
    });
    operation.install(&mut chain);

    let response = chain.execute(Request::get(url)).await.unwrap();
    let body = response.into_body().collect().await.unwrap();
    assert_eq!(body.len(), 1000);

    let download = of(&log, "L", Direction::Response);
    assert_well_formed(&download);

    let progress: Vec<_> = download.iter().filter(|p| p.state == State::Progress).collect();
    assert!(progress.len() > 1);
    assert!(progress.len() < 100);
    assert_eq!(progress.last().unwrap().bytes_transferred, 1000);
    assert_eq!(progress.last().unwrap().percentage(), Some(100.0));
}

#[tokio::test]
async fn test_registration_url_is_normalized() {
    init_tracing();
    let operation = Operation::new();
    let log = new_log();
    assert!(!operation.add_listener(Direction::Response, "", recorder(&log, "L")));
    assert!(operation.add_listener(Direction::Response, " http://x ", recorder(&log, "L")));

    let mut chain = Chain::new(Serve {
        chunks: 2,
        size:   5,
        every:  Duration::ZERO,
    });
    operation.install(&mut chain);

    let response = chain.execute(Request::get("http://x")).await.unwrap();
    response.into_body().collect().await.unwrap();

    let events = of(&log, "L", Direction::Response);
    assert_well_formed(&events);
    assert_eq!(&*events[0].url, "http://x");
    assert_eq!(events[0].extras.normalized_url(), "http://x");
}

#[tokio::test]
async fn test_recycling_listener_retires_after_end() {
    init_tracing();
    let url = "http://files.local/once";
    let operation = Operation::new();
    let log = new_log();
    let once = {
        let log = Arc::clone(&log);
        recycling(move |p: &Progress| log.lock().unwrap().push(("once", p.clone())))
    };
    assert!(operation.add_response_listener(url, once));

    let mut chain = Chain::new(Serve {
        chunks: 3,
        size:   4,
        every:  Duration::ZERO,
    });
    operation.install(&mut chain);

    for _ in 0..2 {
        let response = chain.execute(Request::get(url)).await.unwrap();
        response.into_body().collect().await.unwrap();
    }

    let events = of(&log, "once", Direction::Response);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().extras.id(), 1);
    assert_eq!(operation.listener_count(Direction::Response, url), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deprecation_mid_transfer_silences_everything() {
    init_tracing();
    let url = "http://files.local/big";
    let operation = Operation::new();
    let log = new_log();
    operation.configure(
        OperationUpdate::default()
            .refresh_time(Duration::ZERO)
            .global_callback(recorder(&log, "G")),
    );
    operation.add_request_listener(url, recorder(&log, "L"));

    let handle = operation.clone();
    let pieces = stream::unfold(0u32, move |sent| {
        let handle = handle.clone();
        async move {
            if sent == 10 {
                return None;
            }
            if sent == 3 {
                handle.mark_deprecated();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            Some((Ok::<_, io::Error>(Bytes::from_static(b"0123456789")), sent + 1))
        }
    });

    let mut chain = Chain::new(Sink);
    operation.install(&mut chain);
    chain
        .execute(Request::put(url).body(Body::from_stream(pieces, Some(100))))
        .await
        .unwrap();

    let entries = log.lock().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|(_, p)| p.bytes_transferred <= 30));
    assert!(entries.iter().all(|(_, p)| p.state != State::End));
    assert!(operation.is_deprecated());
}

#[tokio::test]
async fn test_replay_counts_every_attempt_by_default() {
    init_tracing();
    let url = "http://files.local/redirected";
    let operation = Operation::new();
    let log = new_log();
    operation.add_request_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(Redirect);
    operation.install(&mut chain);
    chain
        .execute(Request::post(url).body(vec![1u8; 64]))
        .await
        .unwrap();

    let events = of(&log, "L", Direction::Request);
    assert_eq!(count(&events, State::Start), 2);
    assert_eq!(count(&events, State::End), 2);

    let boundary = events.iter().position(|p| p.state == State::End).unwrap() + 1;
    assert_well_formed(&events[..boundary]);
    assert_well_formed(&events[boundary..]);
    assert_eq!(events[boundary].bytes_transferred, 0);
}

#[tokio::test]
async fn test_replay_one_shot_counts_first_attempt_only() {
    init_tracing();
    let url = "http://files.local/redirected";
    let operation = Operation::new();
    let log = new_log();
    operation.configure(OperationUpdate::default().one_shot(true));
    operation.add_request_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(Redirect);
    operation.install(&mut chain);
    chain
        .execute(Request::post(url).body(vec![1u8; 64]))
        .await
        .unwrap();

    let events = of(&log, "L", Direction::Request);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().bytes_transferred, 64);
}

#[tokio::test]
async fn test_one_shot_counts_retry_after_unwritten_attempt() {
    init_tracing();
    let url = "http://files.local/refused-once";
    let operation = Operation::new();
    let log = new_log();
    operation.configure(OperationUpdate::default().one_shot(true));
    operation.add_request_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(RefusedThenRetried);
    operation.install(&mut chain);
    chain
        .execute(Request::post(url).body(vec![1u8; 64]))
        .await
        .unwrap();

    let events = of(&log, "L", Direction::Request);
    assert_well_formed(&events);
    assert_eq!(count(&events, State::Finish), 1);
    assert_eq!(events.last().unwrap().bytes_transferred, 64);
}

#[tokio::test]
async fn test_listener_removing_itself_mid_fan_out() {
    init_tracing();
    let url = "http://files.local/self-removal";
    let operation = Operation::new();
    let log = new_log();
    let removed = Arc::new(AtomicBool::new(false));
    let own: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

    let leaving = {
        let operation = operation.clone();
        let own = Arc::clone(&own);
        let removed = Arc::clone(&removed);
        let log = Arc::clone(&log);
        listener(move |p: &Progress| {
            log.lock().unwrap().push(("leaving", p.clone()));
            if let Some(me) = own.lock().unwrap().take() {
                let done = operation.remove_listener(Direction::Response, url, &me);
                removed.store(done, Ordering::SeqCst);
            }
        })
    };
    *own.lock().unwrap() = Some(Arc::clone(&leaving));
    assert!(operation.add_response_listener(url, leaving));
    assert!(operation.add_response_listener(url, recorder(&log, "L")));

    let mut chain = Chain::new(Serve {
        chunks: 3,
        size:   10,
        every:  Duration::ZERO,
    });
    operation.install(&mut chain);

    let response = chain.execute(Request::get(url)).await.unwrap();
    response.into_body().collect().await.unwrap();

    assert!(removed.load(Ordering::SeqCst));
    let leaving_events = of(&log, "leaving", Direction::Response);
    assert_eq!(leaving_events.len(), 1);
    assert_eq!(leaving_events[0].state, State::Start);

    // The fan-out that removed it still reached the next listener, once
    let rest = of(&log, "L", Direction::Response);
    assert_well_formed(&rest);
    assert_eq!(count(&rest, State::Start), 1);
    assert_eq!(operation.listener_count(Direction::Response, url), 1);
}

#[tokio::test]
async fn test_dropped_download_reports_cancellation() {
    init_tracing();
    let url = "http://files.local/partial";
    let operation = Operation::new();
    let log = new_log();
    operation.add_response_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(Serve {
        chunks: 5,
        size:   10,
        every:  Duration::ZERO,
    });
    operation.install(&mut chain);

    let response = chain.execute(Request::get(url)).await.unwrap();
    let mut body = response.into_body().into_stream().unwrap();
    body.next().await.unwrap().unwrap();
    drop(body);

    let events = of(&log, "L", Direction::Response);
    assert_well_formed(&events);
    let error = events.iter().find(|p| p.state == State::Error).unwrap();
    assert!(matches!(error.fault.as_deref(), Some(Error::Cancelled)));
    assert_eq!(count(&events, State::Finish), 0);
}

#[tokio::test]
async fn test_dispatch_context_defers_delivery() {
    init_tracing();
    let url = "http://files.local/ui";
    let operation = Operation::new();
    let log = new_log();
    let (queue, mut driver) = SerialQueue::channel();
    operation.configure(
        OperationUpdate::default()
            .dispatch_context(Arc::new(queue))
            .global_callback(recorder(&log, "G")),
    );
    operation.add_response_listener(url, recorder(&log, "L"));

    let mut chain = Chain::new(Serve {
        chunks: 4,
        size:   8,
        every:  Duration::ZERO,
    });
    operation.install(&mut chain);

    let response = chain.execute(Request::get(url)).await.unwrap();
    response.into_body().collect().await.unwrap();
    assert!(log.lock().unwrap().is_empty());

    assert!(driver.run_pending() > 0);
    assert_well_formed(&of(&log, "G", Direction::Response));
    assert_well_formed(&of(&log, "L", Direction::Response));
}
