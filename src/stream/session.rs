//! Streaming sessions
//!
//! Each open video feed runs its own capture loop as a lazily polled stream.
//! The loop only touches the device while it holds the [`ResourceLock`] and
//! never holds it while the consumer is being served, so a slow client can
//! not starve captures. Dropping the stream ends the session; the device is
//! left running for the next user.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mjpeg::create_mjpeg_part;
use crate::activity::{ActivitySource, ActivityTracker};
use crate::config::StreamConfig;
use crate::device::ResourceLock;
use crate::error::{AppError, DeviceError};
use crate::events::{EventBus, SessionOutcome, SystemEvent};
use crate::power::StateMachine;
use crate::utils::LogThrottler;
use crate::video::{JpegEncoder, VideoFrame};

/// The session currently allowed to stream
struct ActiveSession {
    id: String,
    stop: CancellationToken,
}

/// Opens streaming sessions; at most one is active at a time
pub struct StreamingPipeline {
    lock: ResourceLock,
    activity: Arc<ActivityTracker>,
    state: Arc<StateMachine>,
    events: Arc<EventBus>,
    config: StreamConfig,
    current: Arc<Mutex<Option<ActiveSession>>>,
    throttler: Arc<LogThrottler>,
}

impl StreamingPipeline {
    pub fn new(
        lock: ResourceLock,
        activity: Arc<ActivityTracker>,
        state: Arc<StateMachine>,
        events: Arc<EventBus>,
        config: StreamConfig,
    ) -> Self {
        Self {
            lock,
            activity,
            state,
            events,
            config,
            current: Arc::new(Mutex::new(None)),
            throttler: Arc::new(LogThrottler::with_secs(5)),
        }
    }

    /// Start a new session, deactivating the previous one.
    ///
    /// Returns the session id and the multipart chunk stream. Nothing touches
    /// the device until the stream is first polled.
    pub fn open(&self) -> (String, impl Stream<Item = std::io::Result<Bytes>> + Send + 'static) {
        let id = uuid::Uuid::new_v4().to_string();
        let stop = CancellationToken::new();

        if let Some(previous) = self.current.lock().replace(ActiveSession {
            id: id.clone(),
            stop: stop.clone(),
        }) {
            info!("Stream session {} superseded by {}", previous.id, id);
            previous.stop.cancel();
        }
        info!("Stream session {} opened", id);

        let session = Session {
            id: id.clone(),
            stop,
            lock: self.lock.clone(),
            activity: self.activity.clone(),
            state: self.state.clone(),
            registry: self.current.clone(),
            events: self.events.clone(),
            throttler: self.throttler.clone(),
            encoder: JpegEncoder::new(self.config.quality),
            config: self.config.clone(),
            last_frame: None,
            last_keepalive: Instant::now(),
            consecutive_failures: 0,
            captured: 0,
            frames: 0,
            outcome: None,
        };

        let body = async_stream::stream! {
            let mut session = session;
            if let Err(outcome) = session.initialize().await {
                session.outcome = Some(outcome);
                return;
            }
            loop {
                match session.next_step().await {
                    Step::Frame(part) => {
                        yield Ok::<Bytes, std::io::Error>(part);
                        session.frames += 1;
                    }
                    Step::Skip => continue,
                    Step::End(outcome) => {
                        session.outcome = Some(outcome);
                        break;
                    }
                }
            }
        };

        (id, body)
    }

    /// Deactivate the running session, if any
    pub fn stop_active(&self) {
        if let Some(active) = self.current.lock().take() {
            debug!("Stopping stream session {}", active.id);
            active.stop.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn active_session(&self) -> Option<String> {
        self.current.lock().as_ref().map(|s| s.id.clone())
    }
}

/// Result of one loop iteration
enum Step {
    Frame(Bytes),
    Skip,
    End(SessionOutcome),
}

/// Per-feed loop state; publishes the session end when dropped
struct Session {
    id: String,
    stop: CancellationToken,
    lock: ResourceLock,
    activity: Arc<ActivityTracker>,
    state: Arc<StateMachine>,
    registry: Arc<Mutex<Option<ActiveSession>>>,
    events: Arc<EventBus>,
    throttler: Arc<LogThrottler>,
    encoder: JpegEncoder,
    config: StreamConfig,
    last_frame: Option<Instant>,
    last_keepalive: Instant,
    consecutive_failures: u32,
    /// Complete frames taken from the device
    captured: u64,
    /// Chunks handed to the consumer
    frames: u64,
    /// Unset when the consumer dropped the stream
    outcome: Option<SessionOutcome>,
}

impl Session {
    async fn stopped(&self) -> bool {
        self.stop.is_cancelled() || !self.state.current().await.is_powered()
    }

    /// Sleep unless stopped first; returns false when stopped
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn initialize(&mut self) -> Result<(), SessionOutcome> {
        let attempts = self.config.init_retries;
        for attempt in 1..=attempts {
            if self.stopped().await {
                return Err(SessionOutcome::Deactivated);
            }
            match self.lock.acquire("stream-init").await {
                Ok(mut device) => {
                    if device.ensure_ready().await {
                        debug!("Stream session {} ready after {} attempt(s)", self.id, attempt);
                        return Ok(());
                    }
                }
                Err(e) => debug!("Stream init attempt {}: {}", attempt, e),
            }
            warn!(
                session = %self.id,
                "Device not ready for streaming (attempt {}/{})",
                attempt,
                attempts
            );
            if attempt < attempts && !self.pause(self.config.init_backoff()).await {
                return Err(SessionOutcome::Deactivated);
            }
        }
        Err(SessionOutcome::Failed(
            AppError::DeviceInitFailure(format!("not ready after {} attempts", attempts)).to_string(),
        ))
    }

    async fn next_step(&mut self) -> Step {
        if self.stopped().await {
            return Step::End(SessionOutcome::Deactivated);
        }

        if self.last_keepalive.elapsed() >= self.config.keepalive() {
            self.activity.record(ActivitySource::StreamKeepalive);
            self.last_keepalive = Instant::now();
        }

        if let Some(last) = self.last_frame {
            let wait = self.config.frame_interval().saturating_sub(last.elapsed());
            if !wait.is_zero() && !self.pause(wait).await {
                return Step::End(SessionOutcome::Deactivated);
            }
        }
        self.last_frame = Some(Instant::now());

        // The guard is dropped before any backoff or encoding
        let grabbed = {
            let mut device = match self.lock.acquire("stream").await {
                Ok(device) => device,
                Err(e) => {
                    crate::warn_throttled!(self.throttler, "stream_lock", "Stream frame skipped: {}", e);
                    return Step::Skip;
                }
            };
            if !device.is_initialized() && !device.ensure_ready().await {
                Err(DeviceError::NotReady)
            } else {
                device.grab_frame().await
            }
        };

        match grabbed {
            Ok(Some(frame)) if frame.is_complete() => {
                self.consecutive_failures = 0;
                self.emit(frame)
            }
            Ok(Some(frame)) => {
                self.failure(
                    format!("incomplete frame ({} bytes)", frame.len()),
                    self.config.empty_frame_backoff(),
                )
                .await
            }
            Ok(None) => {
                self.failure("empty frame".to_string(), self.config.empty_frame_backoff())
                    .await
            }
            Err(e) => self.failure(e.to_string(), self.config.error_backoff()).await,
        }
    }

    async fn failure(&mut self, reason: String, backoff: Duration) -> Step {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.failure_budget {
            return Step::End(SessionOutcome::Failed(
                AppError::StreamFailure(format!(
                    "{} consecutive failures, last: {}",
                    self.consecutive_failures, reason
                ))
                .to_string(),
            ));
        }
        crate::warn_throttled!(
            self.throttler,
            "stream_frame",
            "Stream capture failed ({}/{}): {}",
            self.consecutive_failures,
            self.config.failure_budget,
            reason
        );
        if !self.pause(backoff).await {
            return Step::End(SessionOutcome::Deactivated);
        }
        Step::Skip
    }

    fn emit(&mut self, frame: VideoFrame) -> Step {
        self.captured += 1;
        if self.config.subsample && self.captured % 2 == 0 {
            return Step::Skip;
        }

        let jpeg = match self.encoder.encode(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                crate::warn_throttled!(self.throttler, "stream_encode", "Frame encode failed: {}", e);
                return Step::Skip;
            }
        };
        if self.stop.is_cancelled() {
            return Step::End(SessionOutcome::Deactivated);
        }
        Step::Frame(create_mjpeg_part(&jpeg))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        {
            let mut current = self.registry.lock();
            if current.as_ref().is_some_and(|s| s.id == self.id) {
                *current = None;
            }
        }

        let outcome = self.outcome.take().unwrap_or(SessionOutcome::Disconnected);
        match &outcome {
            SessionOutcome::Failed(reason) => warn!(
                session = %self.id,
                frames = self.frames,
                "Stream session failed: {}",
                reason
            ),
            _ => info!(
                session = %self.id,
                frames = self.frames,
                "Stream session ended ({:?})",
                outcome
            ),
        }
        self.events.publish(SystemEvent::StreamSessionEnded {
            session: self.id.clone(),
            outcome,
            frames: self.frames,
        });
    }
}
