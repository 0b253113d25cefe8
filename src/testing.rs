//! Shared test rig: a coordinator over the mock backend and virtual lights

use std::sync::Arc;

use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::device::mock::{MockBackend, MockProbe};
use crate::indicator::IndicatorBank;
use crate::power::RecordingPowerControl;

pub struct TestRig {
    pub coordinator: Arc<Coordinator>,
    pub probe: Arc<MockProbe>,
    pub power: Arc<RecordingPowerControl>,
    pub dir: tempfile::TempDir,
}

/// Small frames, no settle delays, short power timers
pub fn test_config(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.device.settle_ms = 0;
    config.stream.width = 16;
    config.stream.height = 16;
    config.stream.subsample = false;
    config.capture.width = 32;
    config.capture.height = 24;
    config.power.boot_settle_ms = 0;
    config.power.idle_timeout_secs = 5;
    config.power.monitor_interval_secs = 1;
    config.storage.directory = dir.join("img");
    config
}

pub async fn rig_with(configure: impl FnOnce(&mut AppConfig)) -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let (backend, probe) = MockBackend::new();
    let power = Arc::new(RecordingPowerControl::default());
    let coordinator = Coordinator::new(
        config,
        Box::new(backend),
        IndicatorBank::virtual_lights(),
        power.clone(),
    )
    .await
    .unwrap();
    TestRig {
        coordinator,
        probe,
        power,
        dir,
    }
}

/// Rig booted into Running
pub async fn booted_rig() -> TestRig {
    let rig = rig_with(|_| {}).await;
    rig.coordinator.boot().await;
    rig
}
