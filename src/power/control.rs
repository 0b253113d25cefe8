//! Host power-off

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::PowerConfig;
use crate::error::{AppError, Result};

/// Turns the host off
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn power_off(&self) -> Result<()>;
}

/// Runs a shell command such as `sudo poweroff`
pub struct SystemPowerOff {
    program: String,
    args: Vec<String>,
}

impl SystemPowerOff {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("power-off command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl PowerControl for SystemPowerOff {
    async fn power_off(&self) -> Result<()> {
        info!("Powering off host: {} {}", self.program, self.args.join(" "));
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|e| AppError::PowerControl(format!("failed to run {}: {}", self.program, e)))?;
        if !status.success() {
            return Err(AppError::PowerControl(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Logs power-off requests without acting on them
#[derive(Default)]
pub struct NoopPowerControl;

#[async_trait]
impl PowerControl for NoopPowerControl {
    async fn power_off(&self) -> Result<()> {
        warn!("Host power-off requested but disabled in configuration");
        Ok(())
    }
}

/// Select the power control from configuration
pub fn from_config(config: &PowerConfig) -> Result<Box<dyn PowerControl>> {
    if config.execute_power_off {
        Ok(Box::new(SystemPowerOff::new(&config.power_off_command)?))
    } else {
        Ok(Box::new(NoopPowerControl))
    }
}

/// Counts power-off requests
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPowerControl {
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
#[async_trait]
impl PowerControl for RecordingPowerControl {
    async fn power_off(&self) -> Result<()> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
