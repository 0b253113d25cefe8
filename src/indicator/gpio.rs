//! GPIO-driven indicator light

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{LedPattern, SignalDevice};
use crate::config::IndicatorPin;
use crate::error::{AppError, Result};

/// Output line plus polarity
struct Line {
    handle: LineHandle,
    active_low: bool,
}

impl Line {
    fn write(&self, lit: bool) -> std::result::Result<(), gpio_cdev::Error> {
        self.handle.set_value(u8::from(lit != self.active_low))
    }
}

/// A light on a GPIO output line; blinking runs as a background task
pub struct GpioIndicator {
    name: String,
    pin: u32,
    line: Arc<Line>,
    pattern: Mutex<LedPattern>,
    blinker: Mutex<Option<JoinHandle<()>>>,
}

impl GpioIndicator {
    /// Claim the line as an output, initially off
    pub fn open(chip: &str, name: &str, pin: &IndicatorPin) -> Result<Self> {
        info!(
            "Initializing {} indicator on {} pin {}{}",
            name,
            chip,
            pin.pin,
            if pin.active_low { " (active low)" } else { "" }
        );
        let gpio_err = |reason: String| AppError::Indicator {
            name: name.to_string(),
            reason,
        };

        let mut chip = Chip::new(chip).map_err(|e| gpio_err(format!("GPIO chip failed: {}", e)))?;
        let line = chip
            .get_line(pin.pin)
            .map_err(|e| gpio_err(format!("GPIO line {} failed: {}", pin.pin, e)))?;
        let off_value = u8::from(pin.active_low);
        let handle = line
            .request(LineRequestFlags::OUTPUT, off_value, "camkeeper")
            .map_err(|e| gpio_err(format!("GPIO request failed: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            pin: pin.pin,
            line: Arc::new(Line {
                handle,
                active_low: pin.active_low,
            }),
            pattern: Mutex::new(LedPattern::Off),
            blinker: Mutex::new(None),
        })
    }

    fn stop_blinking(&self) {
        if let Some(task) = self.blinker.lock().take() {
            task.abort();
        }
    }

    fn spawn_blink(&self, on: Duration, off: Duration) -> JoinHandle<()> {
        let line = self.line.clone();
        let pin = self.pin;
        tokio::spawn(async move {
            loop {
                if let Err(e) = line.write(true) {
                    debug!("Blink write on pin {} failed: {}", pin, e);
                    return;
                }
                tokio::time::sleep(on).await;
                if let Err(e) = line.write(false) {
                    debug!("Blink write on pin {} failed: {}", pin, e);
                    return;
                }
                tokio::time::sleep(off).await;
            }
        })
    }
}

#[async_trait]
impl SignalDevice for GpioIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_pattern(&self, pattern: LedPattern) -> Result<()> {
        self.stop_blinking();
        match pattern {
            LedPattern::Off | LedPattern::On => {
                self.line
                    .write(pattern == LedPattern::On)
                    .map_err(|e| AppError::Indicator {
                        name: self.name.clone(),
                        reason: format!("GPIO write failed: {}", e),
                    })?;
            }
            LedPattern::Blink { on, off } => {
                *self.blinker.lock() = Some(self.spawn_blink(on, off));
            }
        }
        *self.pattern.lock() = pattern;
        Ok(())
    }

    fn pattern(&self) -> LedPattern {
        *self.pattern.lock()
    }
}

impl Drop for GpioIndicator {
    fn drop(&mut self) {
        self.stop_blinking();
        let _ = self.line.write(false);
    }
}
