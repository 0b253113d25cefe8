//! Still capture
//!
//! A capture holds the device for its whole device-side duration: autofocus
//! cycle, still-mode exposure and the fallback grab. Encoding and the file
//! write happen after the device is released.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::activity::{ActivitySource, ActivityTracker};
use crate::config::CaptureConfig;
use crate::device::{Controls, DeviceGuard, ResourceLock};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::indicator::IndicatorBank;
use crate::storage::CaptureStore;
use crate::video::{JpegEncoder, VideoFrame};

/// Result of a completed capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    /// Produced by the fallback path (preview configuration)
    pub fallback: bool,
}

impl CaptureOutcome {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Takes stills and stores them
pub struct CaptureService {
    lock: ResourceLock,
    activity: Arc<ActivityTracker>,
    indicators: Arc<IndicatorBank>,
    store: Arc<CaptureStore>,
    events: Arc<EventBus>,
    config: CaptureConfig,
}

impl CaptureService {
    pub fn new(
        lock: ResourceLock,
        activity: Arc<ActivityTracker>,
        indicators: Arc<IndicatorBank>,
        store: Arc<CaptureStore>,
        events: Arc<EventBus>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            lock,
            activity,
            indicators,
            store,
            events,
            config,
        }
    }

    /// Take one still and write it to the capture directory.
    ///
    /// Fails with [`AppError::ResourceBusy`] when the device cannot be
    /// acquired in time; no file is written in that case.
    pub async fn capture_still(&self) -> Result<CaptureOutcome> {
        self.activity.record(ActivitySource::Capture);
        let light = self.indicators.capture_feedback().await;

        let result = self.capture().await;
        match &result {
            Ok(outcome) => {
                info!(
                    "Captured {}{}",
                    outcome.path.display(),
                    if outcome.fallback { " (fallback)" } else { "" }
                );
                self.events.publish(SystemEvent::CaptureCompleted {
                    file: outcome.file_name(),
                    fallback: outcome.fallback,
                });
            }
            Err(e) => {
                if e.is_busy() {
                    warn!("Capture skipped: {}", e);
                } else {
                    error!("Capture failed: {}", e);
                }
                self.events.publish(SystemEvent::CaptureFailed {
                    reason: e.to_string(),
                });
            }
        }

        light.finish(self.config.feedback()).await;
        result
    }

    async fn capture(&self) -> Result<CaptureOutcome> {
        let (frame, fallback) = {
            let mut device = self.lock.acquire("capture").await?;
            if !device.ensure_ready().await {
                return Err(AppError::DeviceInitFailure(
                    "device not ready for capture".into(),
                ));
            }

            match self.still_frame(&mut device).await {
                Ok(frame) => (frame, false),
                Err(primary) => {
                    warn!("Still capture failed, falling back to preview frame: {}", primary);
                    match device.grab_frame().await {
                        Ok(Some(frame)) if frame.is_complete() => (frame, true),
                        Ok(_) => {
                            return Err(AppError::CaptureFailure(format!(
                                "{}; fallback: empty frame",
                                primary
                            )))
                        }
                        Err(e) => {
                            return Err(AppError::CaptureFailure(format!(
                                "{}; fallback: {}",
                                primary, e
                            )))
                        }
                    }
                }
            }
        };

        let path = self.store_jpeg(frame).await?;
        Ok(CaptureOutcome { path, fallback })
    }

    /// Autofocus cycle, then a full-resolution still
    async fn still_frame(&self, device: &mut DeviceGuard) -> Result<VideoFrame> {
        device
            .set_controls(&Controls::still(
                self.config.exposure_us,
                self.config.analogue_gain,
            ))
            .await?;
        tokio::time::sleep(self.config.autofocus()).await;

        let still = device.capture_still(self.config.resolution()).await;

        if let Err(e) = device.set_controls(&Controls::preview()).await {
            warn!("Failed to restore preview controls: {}", e);
        }

        let frame = still?;
        if !frame.is_complete() {
            return Err(AppError::CaptureFailure(format!(
                "incomplete still frame ({} bytes)",
                frame.len()
            )));
        }
        Ok(frame)
    }

    async fn store_jpeg(&self, frame: VideoFrame) -> Result<PathBuf> {
        let quality = self.config.quality;
        let jpeg = tokio::task::spawn_blocking(move || JpegEncoder::new(quality).encode(&frame))
            .await
            .map_err(|e| AppError::Internal(format!("encode task failed: {}", e)))?
            .map_err(|e| AppError::CaptureFailure(e.to_string()))?;

        let (path, mut file) = self
            .store
            .create_capture(&self.config.file_prefix, Local::now())
            .await?;
        let written = match file.write_all(&jpeg).await {
            Ok(()) => file.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Never leave a truncated image behind
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(AppError::CaptureFailure(format!(
                "writing {} failed: {}",
                path.display(),
                e
            )));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockBackend, MockProbe};
    use crate::device::{DeviceHandle, DeviceSettings};
    use crate::indicator::IndicatorId;
    use crate::video::{is_valid_jpeg, PixelFormat, Resolution};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        service: CaptureService,
        lock: ResourceLock,
        probe: Arc<MockProbe>,
        indicators: Arc<IndicatorBank>,
        events: Arc<EventBus>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (backend, probe) = MockBackend::new();
        let settings = DeviceSettings {
            resolution: Resolution::new(16, 16),
            format: PixelFormat::Rgb24,
            buffer_count: 2,
        };
        let lock = ResourceLock::new(
            DeviceHandle::new(Box::new(backend), settings, Duration::ZERO),
            Duration::from_secs(2),
        );
        let indicators = Arc::new(IndicatorBank::virtual_lights());
        let events = Arc::new(EventBus::new());
        let store = Arc::new(CaptureStore::open(dir.path()).await.unwrap());
        let config = CaptureConfig {
            width: 32,
            height: 24,
            ..CaptureConfig::default()
        };
        let service = CaptureService::new(
            lock.clone(),
            Arc::new(ActivityTracker::new(Duration::from_secs(60))),
            indicators.clone(),
            store,
            events.clone(),
            config,
        );
        Fixture {
            service,
            lock,
            probe,
            indicators,
            events,
            _dir: dir,
        }
    }

    fn stored(fx: &Fixture) -> usize {
        std::fs::read_dir(fx._dir.path()).unwrap().count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_writes_jpeg() {
        let fx = fixture().await;
        let mut rx = fx.events.subscribe();

        let outcome = fx.service.capture_still().await.unwrap();
        assert!(!outcome.fallback);
        let data = std::fs::read(&outcome.path).unwrap();
        assert!(is_valid_jpeg(&data));
        assert!(outcome.file_name().starts_with("RF_pic_"));

        assert_eq!(fx.probe.stills.load(Ordering::SeqCst), 1);
        assert_eq!(
            *fx.probe.last_controls.lock(),
            Some(Controls::preview()),
            "preview controls restored"
        );
        assert!(!fx.indicators.is_active(IndicatorId::Capture));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::CaptureCompleted { fallback: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_on_still_failure() {
        let fx = fixture().await;
        fx.probe.fail_still.store(true, Ordering::SeqCst);

        let outcome = fx.service.capture_still().await.unwrap();
        assert!(outcome.fallback);
        assert!(is_valid_jpeg(&std::fs::read(&outcome.path).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_paths_fail() {
        let fx = fixture().await;
        fx.probe.fail_still.store(true, Ordering::SeqCst);
        fx.probe.empty_frames.store(true, Ordering::SeqCst);

        let err = fx.service.capture_still().await.unwrap_err();
        assert!(matches!(err, AppError::CaptureFailure(_)));
        assert_eq!(stored(&fx), 0);
        assert!(!fx.indicators.is_active(IndicatorId::Capture));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_device_writes_nothing() {
        let fx = fixture().await;
        let held = fx.lock.acquire("stream").await.unwrap();

        let err = fx.service.capture_still().await.unwrap_err();
        assert!(matches!(err, AppError::ResourceBusy { holder: "stream", .. }));
        assert_eq!(stored(&fx), 0);
        assert_eq!(fx.probe.stills.load(Ordering::SeqCst), 0);

        drop(held);
        assert!(fx.service.capture_still().await.is_ok());
        assert_eq!(stored(&fx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_capture_releases_light_and_device() {
        let fx = fixture().await;

        // Dropped one second into the autofocus settle
        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), fx.service.capture_still()).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!fx.indicators.is_active(IndicatorId::Capture));
        assert!(fx.lock.try_acquire("test").is_some());
        assert_eq!(stored(&fx), 0);
        assert_eq!(fx.probe.stills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure() {
        let fx = fixture().await;
        fx.probe.fail_open.store(true, Ordering::SeqCst);
        let err = fx.service.capture_still().await.unwrap_err();
        assert!(matches!(err, AppError::DeviceInitFailure(_)));
    }
}
