//! Progress instrumentor: byte counting and a live status line for large transfers.
//!
//! Request bodies with a known length are wrapped so every chunk the inner executor
//! consumes is counted; response bodies with a known `Content-Length` are wrapped the
//! same way as the caller reads them. A ticker task samples the counter on an interval
//! and hands snapshots to a [`ProgressDisplay`]. The upload ticker starts when the
//! inner executor first reads the body and stops when `execute` returns; the download
//! ticker stops when the body stream ends or is dropped.

use crate::error::TransportError;
use crate::transport::message::{
    ApiRequest, ApiResponse, RequestBody, RequestStream, ResponseStream,
};
use crate::transport::sink::DiagnosticSink;
use crate::transport::{Executor, SharedExecutor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use indicatif::{HumanBytes, HumanDuration};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Uploading,
    /// Every upload byte was consumed; the response has not arrived yet.
    AwaitingResponse,
    Downloading,
}

/// Byte counter for one transfer.
#[derive(Debug)]
pub struct TransferProgress {
    bytes_total: Option<u64>,
    bytes_transferred: AtomicU64,
    started_at: Instant,
}

impl TransferProgress {
    pub fn new(bytes_total: Option<u64>) -> Self {
        Self {
            bytes_total,
            bytes_transferred: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn bytes_total(&self) -> Option<u64> {
        self.bytes_total
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_total
            .map_or(false, |total| self.bytes_transferred() >= total)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Point-in-time view of a transfer handed to displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub phase: TransferPhase,
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_transferred as f64 / total as f64 * 100.0).min(100.0)),
        }
    }
}

/// Receives progress samples. `finish` is called at most once per transfer, and no
/// `update` follows it.
pub trait ProgressDisplay: Send + Sync {
    fn update(&self, snapshot: &ProgressSnapshot);
    fn finish(&self, snapshot: &ProgressSnapshot);
}

/// Default display: a single status line rewritten in place on the diagnostic sink.
pub struct LiveProgressLine {
    sink: DiagnosticSink,
}

impl LiveProgressLine {
    pub fn new(sink: DiagnosticSink) -> Self {
        Self { sink }
    }

    pub fn render(snapshot: &ProgressSnapshot) -> String {
        let elapsed = HumanDuration(snapshot.elapsed);
        let amount = match (snapshot.bytes_total, snapshot.percent()) {
            (Some(total), Some(percent)) => format!(
                "{} / {} ({:.0}%)",
                HumanBytes(snapshot.bytes_transferred),
                HumanBytes(total),
                percent
            ),
            _ => HumanBytes(snapshot.bytes_transferred).to_string(),
        };
        match snapshot.phase {
            TransferPhase::Uploading => format!("uploading {} {}", amount, elapsed),
            TransferPhase::AwaitingResponse => {
                format!("uploaded {}, awaiting response {}", amount, elapsed)
            }
            TransferPhase::Downloading => format!("downloading {} {}", amount, elapsed),
        }
    }
}

impl ProgressDisplay for LiveProgressLine {
    fn update(&self, snapshot: &ProgressSnapshot) {
        if self.sink.is_live() {
            let _ = self.sink.rewrite_line(&Self::render(snapshot));
        }
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        let _ = self.sink.finish_line(&Self::render(snapshot));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn phase(self, progress: &TransferProgress) -> TransferPhase {
        match self {
            Direction::Upload if progress.is_complete() => TransferPhase::AwaitingResponse,
            Direction::Upload => TransferPhase::Uploading,
            Direction::Download => TransferPhase::Downloading,
        }
    }
}

/// Display handle shared between the ticker task and its owner. Once closed, nothing
/// reaches the display.
struct DisplayHandle {
    display: Arc<dyn ProgressDisplay>,
    closed: Mutex<bool>,
}

impl DisplayHandle {
    fn update(&self, snapshot: &ProgressSnapshot) {
        let closed = self.closed.lock();
        if !*closed {
            self.display.update(snapshot);
        }
    }

    fn close(&self, last: Option<&ProgressSnapshot>) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        if let Some(snapshot) = last {
            self.display.finish(snapshot);
        }
    }
}

/// Background sampler for one transfer. Dropping it stops the task.
struct Ticker {
    progress: Arc<TransferProgress>,
    direction: Direction,
    display: Arc<DisplayHandle>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Ticker {
    fn start(
        progress: Arc<TransferProgress>,
        direction: Direction,
        display: Arc<dyn ProgressDisplay>,
        interval: Duration,
    ) -> Self {
        let handle = Arc::new(DisplayHandle {
            display,
            closed: Mutex::new(false),
        });
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task_display = handle.clone();
        let task_progress = progress.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticks.tick() => {
                        task_display.update(&snapshot(&task_progress, direction));
                    }
                }
            }
        });

        Self {
            progress,
            direction,
            display: handle,
            stop: Some(stop),
            task,
        }
    }

    /// Stop sampling and render the final line.
    fn finish(mut self) {
        self.halt(true);
    }

    fn halt(&mut self, render_final: bool) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.abort();
        let last = snapshot(&self.progress, self.direction);
        self.display.close(render_final.then_some(&last));
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.halt(false);
    }
}

fn snapshot(progress: &TransferProgress, direction: Direction) -> ProgressSnapshot {
    ProgressSnapshot {
        phase: direction.phase(progress),
        bytes_transferred: progress.bytes_transferred(),
        bytes_total: progress.bytes_total(),
        elapsed: progress.elapsed(),
    }
}

/// Response body that counts consumed bytes and owns the download ticker.
struct TrackedBody {
    inner: ResponseStream,
    progress: Arc<TransferProgress>,
    ticker: Option<Ticker>,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.progress.record(chunk.len() as u64),
            Poll::Ready(None) => {
                if let Some(ticker) = this.ticker.take() {
                    ticker.finish();
                }
            }
            Poll::Ready(Some(Err(_))) => drop(this.ticker.take()),
            Poll::Pending => {}
        }
        polled
    }
}

/// Upload ticker slot shared by the counted body and the `execute` call. The ticker is
/// started by the body's first poll, so time spent in inner layers before the body is
/// read (token refresh, unlock polling) is never reported as upload time.
struct UploadSlot {
    display: Arc<dyn ProgressDisplay>,
    interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl UploadSlot {
    fn begin(&self, total: u64) -> Arc<TransferProgress> {
        let progress = Arc::new(TransferProgress::new(Some(total)));
        let ticker = Ticker::start(
            progress.clone(),
            Direction::Upload,
            self.display.clone(),
            self.interval,
        );
        *self.ticker.lock() = Some(ticker);
        progress
    }

    fn take(&self) -> Option<Ticker> {
        self.ticker.lock().take()
    }
}

/// Request body that counts consumed bytes.
struct CountedUpload {
    inner: RequestStream,
    total: u64,
    progress: Option<Arc<TransferProgress>>,
    slot: Arc<UploadSlot>,
}

impl Stream for CountedUpload {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.progress.is_none() {
            this.progress = Some(this.slot.begin(this.total));
        }
        let polled = this.inner.as_mut().poll_next(cx);
        if let (Poll::Ready(Some(Ok(chunk))), Some(progress)) = (&polled, &this.progress) {
            progress.record(chunk.len() as u64);
        }
        polled
    }
}

/// Stops the upload ticker when `execute` returns or is cancelled.
struct UploadGuard(Arc<UploadSlot>);

impl UploadGuard {
    fn finish(self) {
        if let Some(ticker) = self.0.take() {
            ticker.finish();
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        drop(self.0.take());
    }
}

pub struct ProgressInstrumentor {
    inner: SharedExecutor,
    display: Arc<dyn ProgressDisplay>,
    interval: Duration,
}

impl ProgressInstrumentor {
    pub fn new(inner: SharedExecutor, display: Arc<dyn ProgressDisplay>) -> Self {
        Self {
            inner,
            display,
            interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_PROGRESS_INTERVAL);
        self
    }

    fn track_upload(&self, request: &mut ApiRequest) -> Option<UploadGuard> {
        let total = request.body.declared_length().filter(|n| *n > 0)?;
        let body = std::mem::replace(&mut request.body, RequestBody::Empty);
        let (stream, length) = body.into_stream()?;

        let slot = Arc::new(UploadSlot {
            display: self.display.clone(),
            interval: self.interval,
            ticker: Mutex::new(None),
        });
        request.body = RequestBody::Stream {
            stream: Box::pin(CountedUpload {
                inner: stream,
                total,
                progress: None,
                slot: slot.clone(),
            }),
            length,
        };
        Some(UploadGuard(slot))
    }

    fn track_download(&self, response: ApiResponse) -> ApiResponse {
        let Some(total) = response.content_length.filter(|n| *n > 0) else {
            return response;
        };
        let progress = Arc::new(TransferProgress::new(Some(total)));
        let ticker = Ticker::start(
            progress.clone(),
            Direction::Download,
            self.display.clone(),
            self.interval,
        );
        response.map_body(move |inner| {
            Box::pin(TrackedBody {
                inner,
                progress,
                ticker: Some(ticker),
            })
        })
    }
}

#[async_trait]
impl Executor for ProgressInstrumentor {
    async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let upload = self.track_upload(&mut request);
        let result = self.inner.execute(request).await;
        if let Some(upload) = upload {
            upload.finish();
        }
        Ok(self.track_download(result?))
    }
}
