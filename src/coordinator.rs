//! Top-level owner of every component.
//!
//! The [`Coordinator`] is created once at startup and shared as
//! `Arc<Coordinator>` with the HTTP layer, the monitors and the button
//! handlers. Lifecycle changes (boot, idle entry and exit, power-off,
//! power-on) are serialized by a single lifecycle mutex; each of them checks
//! and moves the [`StateMachine`] with a compare-and-set, so repeated or
//! concurrent triggers act at most once per state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::activity::{ActivitySource, ActivityTracker};
use crate::capture::{CaptureOutcome, CaptureService};
use crate::config::AppConfig;
use crate::device::{create_backend, CaptureBackend, DeviceHandle, DeviceSettings, ResourceLock};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::indicator::{IndicatorBank, IndicatorId, LedPattern};
use crate::power::{self, IdleShutdownMonitor, PowerControl, StateMachine, SystemState};
use crate::storage::{self, CapturePage, CaptureStore};
use crate::stream::StreamingPipeline;

/// Upper bound on waiting for another lifecycle change to finish
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Warning indication before power-off
const WARNING_PULSES: u32 = 3;
const WARNING_INTERVAL: Duration = Duration::from_millis(150);
const WARNING_HOLD: Duration = Duration::from_secs(1);

/// Attempts to get the device for shutdown during power-off
const SHUTDOWN_ATTEMPTS: u32 = 5;

/// Time allowed for background tasks to finish on process shutdown
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the system is powering off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerOffReason {
    /// Explicit request over HTTP; the host is halted after a short delay
    Requested,
    /// Power button hold; soft off, the button powers the system back on
    Button,
    /// Inactivity shutdown timer expired
    Inactivity,
}

impl PowerOffReason {
    /// Whether the host itself is turned off
    fn halts_host(self) -> bool {
        !matches!(self, PowerOffReason::Button)
    }
}

/// Physical button events, already debounced and classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Aux1,
    Aux2,
    Capture,
    CaptureHeld,
    PowerHeld,
}

/// Reported system state
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemStatus {
    pub state: SystemState,
    pub power_on: bool,
}

pub struct Coordinator {
    config: AppConfig,
    lock: ResourceLock,
    activity: Arc<ActivityTracker>,
    state: Arc<StateMachine>,
    indicators: Arc<IndicatorBank>,
    store: Arc<CaptureStore>,
    capture: Arc<CaptureService>,
    streams: StreamingPipeline,
    power: Arc<dyn PowerControl>,
    events: Arc<EventBus>,
    lifecycle: Mutex<()>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Assemble the system around the given backend, lights and power
    /// control. The system starts in Booting; call [`Coordinator::boot`].
    pub async fn new(
        config: AppConfig,
        backend: Box<dyn CaptureBackend>,
        indicators: IndicatorBank,
        power: Arc<dyn PowerControl>,
    ) -> Result<Arc<Self>> {
        let events = Arc::new(EventBus::new());
        let indicators = Arc::new(indicators);

        let settings = DeviceSettings {
            resolution: config.stream.resolution(),
            format: config.device.format,
            buffer_count: config.device.buffer_count,
        };
        let lock = ResourceLock::new(
            DeviceHandle::new(backend, settings, config.device.settle()),
            config.device.lock_timeout(),
        );
        let activity = Arc::new(ActivityTracker::new(config.power.client_timeout()));
        let state = Arc::new(
            StateMachine::new(SystemState::Booting, indicators.clone(), events.clone()).await,
        );
        indicators.aux_off().await;
        indicators.set(IndicatorId::Capture, LedPattern::Off).await;

        let store = Arc::new(CaptureStore::open(&config.storage.directory).await?);
        let capture = Arc::new(CaptureService::new(
            lock.clone(),
            activity.clone(),
            indicators.clone(),
            store.clone(),
            events.clone(),
            config.capture.clone(),
        ));
        let streams = StreamingPipeline::new(
            lock.clone(),
            activity.clone(),
            state.clone(),
            events.clone(),
            config.stream.clone(),
        );

        Ok(Arc::new(Self {
            config,
            lock,
            activity,
            state,
            indicators,
            store,
            capture,
            streams,
            power,
            events,
            lifecycle: Mutex::new(()),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }))
    }

    /// Build every component from configuration
    pub async fn from_config(config: AppConfig) -> Result<Arc<Self>> {
        let backend = create_backend(&config.device)?;
        let indicators = IndicatorBank::from_config(&config.indicators);
        let power: Arc<dyn PowerControl> = Arc::from(power::from_config(&config.power)?);
        Self::new(config, backend, indicators, power).await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn device_lock(&self) -> &ResourceLock {
        &self.lock
    }

    pub fn indicators(&self) -> &Arc<IndicatorBank> {
        &self.indicators
    }

    pub fn streams(&self) -> &StreamingPipeline {
        &self.streams
    }

    async fn lifecycle(&self) -> Option<MutexGuard<'_, ()>> {
        match tokio::time::timeout(LIFECYCLE_TIMEOUT, self.lifecycle.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    "Lifecycle change still running after {}s, skipping",
                    LIFECYCLE_TIMEOUT.as_secs()
                );
                None
            }
        }
    }

    /// Bring the device up. Readiness failures are logged only; the device
    /// is retried on next use.
    async fn prepare_device(&self, who: &'static str) -> bool {
        match self.lock.acquire(who).await {
            Ok(mut device) => device.ensure_ready().await,
            Err(e) => {
                warn!("Device unavailable for {}: {}", who, e);
                false
            }
        }
    }

    async fn shutdown_device(&self) -> bool {
        for attempt in 1..=SHUTDOWN_ATTEMPTS {
            match self.lock.acquire("shutdown").await {
                Ok(mut device) => {
                    device.shutdown().await;
                    return true;
                }
                Err(e) => warn!(
                    "Device shutdown attempt {}/{} failed: {}",
                    attempt, SHUTDOWN_ATTEMPTS, e
                ),
            }
        }
        error!("Giving up on device shutdown");
        false
    }

    /// Initial boot: Booting -> Running after the device init attempt and
    /// the settle delay, whether or not the device came up
    pub async fn boot(&self) {
        let Some(_lifecycle) = self.lifecycle().await else {
            return;
        };
        info!("Initializing capture device...");
        if self.prepare_device("boot").await {
            info!("Capture device ready");
        } else {
            warn!("Capture device initialization failed, continuing without it");
        }
        tokio::time::sleep(self.config.power.boot_settle()).await;
        self.state
            .transition_from(&[SystemState::Booting], SystemState::Running)
            .await;
    }

    /// Client liveness ping. Wakes the system from idle.
    ///
    /// Returns false, without side effects, while powered off.
    pub async fn record_ping(&self) -> bool {
        if !self.state.current().await.is_powered() {
            debug!("Ping ignored while powered off");
            return false;
        }
        self.activity.record(ActivitySource::Ping);
        if self.exit_idle().await {
            info!("Woken from idle by client ping");
        }
        self.indicators.acknowledge();
        true
    }

    pub async fn system_state(&self) -> SystemStatus {
        let state = self.state.current().await;
        SystemStatus {
            state,
            power_on: state.is_powered(),
        }
    }

    /// Start a capture in the background; false while powered off
    pub async fn start_capture(self: &Arc<Self>) -> bool {
        if !self.state.current().await.is_powered() {
            debug!("Capture ignored while powered off");
            return false;
        }
        let this = self.clone();
        self.tasks.spawn(async move {
            // Outcome is logged and published by the capture service
            let _ = this.capture_now().await;
        });
        true
    }

    /// Take a capture and wait for it
    pub async fn capture_now(&self) -> Result<CaptureOutcome> {
        if !self.state.current().await.is_powered() {
            return Err(AppError::PoweredOff);
        }
        self.activity.record(ActivitySource::Capture);
        self.exit_idle().await;
        self.capture.capture_still().await
    }

    /// Open a live feed, superseding any feed already running.
    ///
    /// Returns the session id and the lazily produced multipart stream.
    pub async fn open_video_stream(
        &self,
    ) -> Result<(String, impl Stream<Item = std::io::Result<Bytes>> + Send + 'static)> {
        if !self.state.current().await.is_powered() {
            return Err(AppError::PoweredOff);
        }
        self.activity.record(ActivitySource::StreamOpen);
        self.exit_idle().await;
        Ok(self.streams.open())
    }

    pub async fn list_captures(&self, page: usize, per_page: usize) -> Result<CapturePage> {
        self.store.list(page, per_page).await
    }

    /// Stored capture bytes and their content type
    pub async fn fetch_capture(&self, name: &str) -> Result<(Bytes, &'static str)> {
        let data = self.store.read(name).await?;
        Ok((data, storage::content_type(name)))
    }

    /// Toggle an auxiliary light; returns whether it is now on.
    ///
    /// A no-op reporting the current state while powered off.
    pub async fn toggle_indicator(&self, id: IndicatorId) -> Result<bool> {
        if !id.is_user_toggleable() {
            return Err(AppError::BadRequest(format!("{} light is not switchable", id)));
        }
        if !self.state.current().await.is_powered() {
            return Ok(self.indicators.is_active(id));
        }
        self.activity.touch();
        let active = self.indicators.toggle(id).await;
        debug!("{} light {}", id, if active { "on" } else { "off" });
        self.events
            .publish(SystemEvent::IndicatorChanged { indicator: id, active });
        Ok(active)
    }

    pub fn indicator_state(&self, id: IndicatorId) -> bool {
        self.indicators.is_active(id)
    }

    /// Explicit power-off. Returns whether the request was accepted; the
    /// shutdown itself completes in the background.
    pub async fn request_power_off(self: &Arc<Self>) -> bool {
        let requested_at = Instant::now();
        if !self.begin_power_off(PowerOffReason::Requested).await {
            return false;
        }
        let this = self.clone();
        self.tasks.spawn(async move {
            this.finish_power_off(PowerOffReason::Requested, requested_at)
                .await;
        });
        true
    }

    /// Power on from PoweredOff: Booting, device init, settle, Running
    pub async fn power_on(&self) -> bool {
        let Some(_lifecycle) = self.lifecycle().await else {
            return false;
        };
        if !self
            .state
            .transition_from(&[SystemState::PoweredOff], SystemState::Booting)
            .await
        {
            return false;
        }
        info!("Powering on");
        self.activity.touch();
        self.prepare_device("power-on").await;
        tokio::time::sleep(self.config.power.boot_settle()).await;
        self.state
            .transition_from(&[SystemState::Booting], SystemState::Running)
            .await;
        info!("Power-on complete");
        true
    }

    /// Handle a physical button
    pub async fn button_pressed(self: &Arc<Self>, button: Button) {
        if button == Button::PowerHeld {
            self.indicators.acknowledge();
            if self.state.current().await.is_powered() {
                self.power_off(PowerOffReason::Button).await;
            } else {
                self.power_on().await;
            }
            return;
        }

        if !self.state.current().await.is_powered() {
            debug!("{:?} button ignored while powered off", button);
            return;
        }
        self.activity.touch();
        self.exit_idle().await;

        match button {
            Button::Aux1 => {
                let _ = self.toggle_indicator(IndicatorId::Aux1).await;
            }
            Button::Aux2 => {
                let _ = self.toggle_indicator(IndicatorId::Aux2).await;
            }
            Button::CaptureHeld => {
                self.start_capture().await;
            }
            Button::Capture | Button::PowerHeld => {}
        }
    }

    /// Running -> Idle: release the device and the auxiliary lamps.
    ///
    /// Deferred (returns false) when the device is busy.
    pub(crate) async fn enter_idle(&self) -> bool {
        let Some(_lifecycle) = self.lifecycle().await else {
            return false;
        };
        if self.state.current().await != SystemState::Running {
            return false;
        }
        let mut device = match self.lock.acquire("idle").await {
            Ok(device) => device,
            Err(e) => {
                debug!("Idle entry deferred: {}", e);
                return false;
            }
        };
        info!("Entering idle mode, releasing capture device");
        device.shutdown().await;
        drop(device);
        self.indicators.aux_off().await;
        self.state
            .transition_from(&[SystemState::Running], SystemState::Idle)
            .await
    }

    /// Idle -> Running with one device re-initialization
    pub(crate) async fn exit_idle(&self) -> bool {
        if self.state.current().await != SystemState::Idle {
            return false;
        }
        let Some(_lifecycle) = self.lifecycle().await else {
            return false;
        };
        if self.state.current().await != SystemState::Idle {
            return false;
        }
        info!("Leaving idle mode, initializing capture device");
        if !self.prepare_device("wake").await {
            warn!("Device not ready after idle, will retry on next use");
        }
        self.state
            .transition_from(&[SystemState::Idle], SystemState::Running)
            .await
    }

    /// Full power-off sequence, awaited
    pub(crate) async fn power_off(&self, reason: PowerOffReason) -> bool {
        let started = Instant::now();
        if !self.begin_power_off(reason).await {
            return false;
        }
        self.finish_power_off(reason, started).await;
        true
    }

    async fn begin_power_off(&self, reason: PowerOffReason) -> bool {
        let Some(_lifecycle) = self.lifecycle().await else {
            return false;
        };
        if !self
            .state
            .transition_from(
                &[SystemState::Running, SystemState::Idle],
                SystemState::ShuttingDown,
            )
            .await
        {
            return false;
        }
        warn!(reason = ?reason, "Powering off");
        self.streams.stop_active();
        true
    }

    async fn finish_power_off(&self, reason: PowerOffReason, requested_at: Instant) {
        match reason {
            PowerOffReason::Inactivity => {
                self.indicators
                    .flash(
                        &[IndicatorId::Aux1, IndicatorId::Aux2],
                        WARNING_PULSES,
                        WARNING_INTERVAL,
                        WARNING_HOLD,
                    )
                    .await
            }
            PowerOffReason::Button => {
                self.indicators
                    .flash(
                        &[IndicatorId::Power],
                        WARNING_PULSES,
                        WARNING_INTERVAL,
                        WARNING_HOLD,
                    )
                    .await
            }
            PowerOffReason::Requested => {}
        }

        self.shutdown_device().await;
        self.indicators.aux_off().await;
        self.state
            .transition_from(&[SystemState::ShuttingDown], SystemState::PoweredOff)
            .await;

        if !reason.halts_host() {
            warn!("System is powered off; hold the power button to start it again");
            return;
        }
        if reason == PowerOffReason::Requested {
            let delay = self
                .config
                .power
                .power_off_delay()
                .saturating_sub(requested_at.elapsed());
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = self.power.power_off().await {
            error!("Host power-off failed: {}", e);
        }
    }

    /// Start the idle/shutdown monitor and the client-timeout monitor
    pub fn spawn_monitors(self: &Arc<Self>) {
        let monitor = IdleShutdownMonitor::new(self.clone());
        self.tasks.spawn(monitor.run(self.cancel.child_token()));

        let activity = self.activity.clone();
        let interval = self.config.power.monitor_interval();
        self.tasks.spawn(power::run_client_monitor(
            activity,
            interval,
            self.cancel.child_token(),
        ));
    }

    /// Stop background work, release the device and switch all lights off
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.cancel.cancel();
        self.streams.stop_active();
        self.tasks.close();
        if tokio::time::timeout(TASK_DRAIN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            warn!("Background tasks still running after {}s", TASK_DRAIN_TIMEOUT.as_secs());
        }
        self.shutdown_device().await;
        self.indicators.all_off().await;
    }
}
