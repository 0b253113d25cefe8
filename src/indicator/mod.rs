//! Indicator lights
//!
//! Every light is a [`SignalDevice`] showing an [`LedPattern`]. The
//! [`IndicatorBank`] owns the five lights of the unit: system status, power,
//! capture feedback and two user-toggleable auxiliary lamps.

mod gpio;

pub use gpio::GpioIndicator;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::{IndicatorConfig, IndicatorPin};
use crate::error::Result;

/// Pulses of the acknowledgement blink
const ACK_PULSES: u32 = 3;
const ACK_INTERVAL: Duration = Duration::from_millis(100);

/// What a light shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedPattern {
    Off,
    On,
    Blink {
        #[serde(rename = "on_ms", serialize_with = "serialize_ms")]
        on: Duration,
        #[serde(rename = "off_ms", serialize_with = "serialize_ms")]
        off: Duration,
    },
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl LedPattern {
    pub const fn blink(on_ms: u64, off_ms: u64) -> Self {
        LedPattern::Blink {
            on: Duration::from_millis(on_ms),
            off: Duration::from_millis(off_ms),
        }
    }

    /// Whether the light is lit or blinking
    pub fn is_active(&self) -> bool {
        !matches!(self, LedPattern::Off)
    }
}

/// Identifies a light of the [`IndicatorBank`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorId {
    Status,
    Power,
    Capture,
    Aux1,
    Aux2,
}

impl IndicatorId {
    pub const ALL: [IndicatorId; 5] = [
        IndicatorId::Status,
        IndicatorId::Power,
        IndicatorId::Capture,
        IndicatorId::Aux1,
        IndicatorId::Aux2,
    ];

    /// Lights a user may switch directly
    pub fn is_user_toggleable(&self) -> bool {
        matches!(self, IndicatorId::Aux1 | IndicatorId::Aux2)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorId::Status => "status",
            IndicatorId::Power => "power",
            IndicatorId::Capture => "capture",
            IndicatorId::Aux1 => "aux1",
            IndicatorId::Aux2 => "aux2",
        }
    }
}

impl fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single indicator output
#[async_trait]
pub trait SignalDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Switch to a new pattern, replacing any running blink
    async fn set_pattern(&self, pattern: LedPattern) -> Result<()>;

    /// Pattern currently shown
    fn pattern(&self) -> LedPattern;

    fn is_active(&self) -> bool {
        self.pattern().is_active()
    }
}

/// A light with no hardware behind it; remembers its pattern
pub struct VirtualIndicator {
    name: String,
    pattern: Mutex<LedPattern>,
}

impl VirtualIndicator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: Mutex::new(LedPattern::Off),
        }
    }
}

#[async_trait]
impl SignalDevice for VirtualIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_pattern(&self, pattern: LedPattern) -> Result<()> {
        *self.pattern.lock() = pattern;
        Ok(())
    }

    fn pattern(&self) -> LedPattern {
        *self.pattern.lock()
    }
}

/// The unit's lights
pub struct IndicatorBank {
    status: Arc<dyn SignalDevice>,
    power: Arc<dyn SignalDevice>,
    capture: Arc<dyn SignalDevice>,
    aux1: Arc<dyn SignalDevice>,
    aux2: Arc<dyn SignalDevice>,
    /// Serializes use of the capture light between the acknowledgement
    /// blink and capture feedback
    capture_light: Arc<AsyncMutex<()>>,
}

impl IndicatorBank {
    pub fn new(
        status: Arc<dyn SignalDevice>,
        power: Arc<dyn SignalDevice>,
        capture: Arc<dyn SignalDevice>,
        aux1: Arc<dyn SignalDevice>,
        aux2: Arc<dyn SignalDevice>,
    ) -> Self {
        Self {
            status,
            power,
            capture,
            aux1,
            aux2,
            capture_light: Arc::new(AsyncMutex::new(())),
        }
    }

    /// All lights virtual
    pub fn virtual_lights() -> Self {
        Self::new(
            Arc::new(VirtualIndicator::new("status")),
            Arc::new(VirtualIndicator::new("power")),
            Arc::new(VirtualIndicator::new("capture")),
            Arc::new(VirtualIndicator::new("aux1")),
            Arc::new(VirtualIndicator::new("aux2")),
        )
    }

    /// Build the bank from configuration.
    ///
    /// A GPIO line that cannot be claimed degrades to a virtual light so the
    /// rest of the system keeps working.
    pub fn from_config(config: &IndicatorConfig) -> Self {
        if !config.enabled {
            debug!("GPIO indicators disabled, using virtual lights");
            return Self::virtual_lights();
        }

        let open = |name: &str, pin: &IndicatorPin| -> Arc<dyn SignalDevice> {
            match GpioIndicator::open(&config.chip, name, pin) {
                Ok(light) => Arc::new(light),
                Err(e) => {
                    warn!("Indicator {} unavailable, using virtual light: {}", name, e);
                    Arc::new(VirtualIndicator::new(name))
                }
            }
        };

        Self::new(
            open("status", &config.status),
            open("power", &config.power),
            open("capture", &config.capture),
            open("aux1", &config.aux1),
            open("aux2", &config.aux2),
        )
    }

    pub fn get(&self, id: IndicatorId) -> &Arc<dyn SignalDevice> {
        match id {
            IndicatorId::Status => &self.status,
            IndicatorId::Power => &self.power,
            IndicatorId::Capture => &self.capture,
            IndicatorId::Aux1 => &self.aux1,
            IndicatorId::Aux2 => &self.aux2,
        }
    }

    /// Set a pattern. Indicator faults are logged and never propagated.
    pub async fn set(&self, id: IndicatorId, pattern: LedPattern) {
        if let Err(e) = self.get(id).set_pattern(pattern).await {
            warn!("Failed to set {} indicator to {:?}: {}", id, pattern, e);
        }
    }

    pub fn is_active(&self, id: IndicatorId) -> bool {
        self.get(id).is_active()
    }

    /// Flip a light between off and on; returns the new state
    pub async fn toggle(&self, id: IndicatorId) -> bool {
        let next = !self.is_active(id);
        self.set(id, if next { LedPattern::On } else { LedPattern::Off })
            .await;
        next
    }

    /// Turn the auxiliary lamps off
    pub async fn aux_off(&self) {
        self.set(IndicatorId::Aux1, LedPattern::Off).await;
        self.set(IndicatorId::Aux2, LedPattern::Off).await;
    }

    pub async fn all_off(&self) {
        for id in IndicatorId::ALL {
            self.set(id, LedPattern::Off).await;
        }
    }

    /// Pulse the given lights `times` times, then pause for `hold`.
    ///
    /// Lights end in the state they started in.
    pub async fn flash(&self, ids: &[IndicatorId], times: u32, interval: Duration, hold: Duration) {
        let before: Vec<_> = ids.iter().map(|id| (*id, self.get(*id).pattern())).collect();
        for _ in 0..times {
            for id in ids {
                self.set(*id, LedPattern::On).await;
            }
            tokio::time::sleep(interval).await;
            for id in ids {
                self.set(*id, LedPattern::Off).await;
            }
            tokio::time::sleep(interval).await;
        }
        for (id, pattern) in before {
            self.set(id, pattern).await;
        }
        tokio::time::sleep(hold).await;
    }

    /// Short three-pulse blink on the capture light.
    ///
    /// Runs in the background and is skipped when the capture light is
    /// already in use.
    pub fn acknowledge(self: &Arc<Self>) {
        let Ok(guard) = self.capture_light.clone().try_lock_owned() else {
            debug!("Capture light busy, skipping acknowledgement");
            return;
        };
        let bank = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            for _ in 0..ACK_PULSES {
                bank.set(IndicatorId::Capture, LedPattern::On).await;
                tokio::time::sleep(ACK_INTERVAL).await;
                bank.set(IndicatorId::Capture, LedPattern::Off).await;
                tokio::time::sleep(ACK_INTERVAL).await;
            }
        });
    }

    /// Light the capture indicator for the duration of a capture
    pub async fn capture_feedback(self: &Arc<Self>) -> CaptureLight {
        let guard = self.capture_light.clone().lock_owned().await;
        self.set(IndicatorId::Capture, LedPattern::On).await;
        CaptureLight {
            bank: self.clone(),
            guard: Some(guard),
        }
    }
}

/// Capture light held on until [`CaptureLight::finish`].
///
/// Dropped without `finish` (the capture was cancelled), the light is
/// switched off in the background.
pub struct CaptureLight {
    bank: Arc<IndicatorBank>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CaptureLight {
    /// Keep the light on for `linger`, then switch it off
    pub async fn finish(mut self, linger: Duration) {
        tokio::time::sleep(linger).await;
        self.bank.set(IndicatorId::Capture, LedPattern::Off).await;
        self.guard.take();
    }
}

impl Drop for CaptureLight {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to switch the capture light off");
            return;
        };
        let bank = self.bank.clone();
        runtime.spawn(async move {
            // Held until the light is off so an acknowledgement can not
            // interleave
            let _guard = guard;
            bank.set(IndicatorId::Capture, LedPattern::Off).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_toggle() {
        let bank = IndicatorBank::virtual_lights();
        assert!(!bank.is_active(IndicatorId::Aux1));
        assert!(bank.toggle(IndicatorId::Aux1).await);
        assert!(bank.is_active(IndicatorId::Aux1));
        assert!(!bank.toggle(IndicatorId::Aux1).await);
        assert!(!bank.is_active(IndicatorId::Aux2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_restores_state() {
        let bank = IndicatorBank::virtual_lights();
        bank.set(IndicatorId::Aux1, LedPattern::On).await;
        bank.flash(
            &[IndicatorId::Aux1, IndicatorId::Aux2],
            3,
            Duration::from_millis(150),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(bank.get(IndicatorId::Aux1).pattern(), LedPattern::On);
        assert_eq!(bank.get(IndicatorId::Aux2).pattern(), LedPattern::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_skipped_during_capture() {
        let bank = Arc::new(IndicatorBank::virtual_lights());
        let light = bank.capture_feedback().await;
        assert!(bank.is_active(IndicatorId::Capture));

        // Would otherwise end by switching the capture light off
        bank.acknowledge();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bank.is_active(IndicatorId::Capture));

        light.finish(Duration::from_millis(300)).await;
        assert!(!bank.is_active(IndicatorId::Capture));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_capture_light_switches_off() {
        let bank = Arc::new(IndicatorBank::virtual_lights());
        let held = bank.clone();
        let task = tokio::spawn(async move {
            let light = held.capture_feedback().await;
            light.finish(Duration::from_secs(60)).await;
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bank.is_active(IndicatorId::Capture));

        task.abort();
        let _ = task.await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!bank.is_active(IndicatorId::Capture));

        // The light is free again for acknowledgements
        bank.acknowledge();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bank.is_active(IndicatorId::Capture));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_blinks_and_ends_off() {
        let bank = Arc::new(IndicatorBank::virtual_lights());
        bank.acknowledge();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bank.is_active(IndicatorId::Capture));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!bank.is_active(IndicatorId::Capture));
    }

    #[test]
    fn test_pattern_json() {
        let json = serde_json::to_value(LedPattern::blink(500, 1500)).unwrap();
        assert_eq!(json["blink"]["on_ms"], 500);
        assert_eq!(serde_json::to_value(LedPattern::Off).unwrap(), "off");
    }
}
