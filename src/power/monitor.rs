//! Background monitors for client liveness, idle entry and inactivity
//! shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::config::PowerConfig;
use crate::coordinator::{Coordinator, PowerOffReason};

use super::SystemState;

/// What a monitor tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Powered off or shutting down
    Skipped,
    PoweredOff,
    EnteredIdle,
    ExitedIdle,
    NoChange,
}

/// Polls activity and drives Running <-> Idle and inactivity shutdown
pub struct IdleShutdownMonitor {
    coordinator: Arc<Coordinator>,
    config: PowerConfig,
}

impl IdleShutdownMonitor {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let config = coordinator.config().power.clone();
        Self {
            coordinator,
            config,
        }
    }

    /// One evaluation of the power policy
    pub async fn tick(&self) -> TickOutcome {
        let activity = self.coordinator.activity();
        let client_active = activity.refresh_client_status();
        let state = self.coordinator.state_machine().current().await;
        if !state.is_powered() {
            return TickOutcome::Skipped;
        }

        let inactivity = activity.inactivity();
        let unattended = !client_active;

        if let Some(limit) = self.config.shutdown_timeout() {
            if inactivity > limit && unattended {
                warn!(
                    "No activity for {}s, powering off",
                    inactivity.as_secs()
                );
                if self.coordinator.power_off(PowerOffReason::Inactivity).await {
                    return TickOutcome::PoweredOff;
                }
            }
        }

        if inactivity > self.config.idle_timeout() && unattended {
            if state == SystemState::Running && self.coordinator.enter_idle().await {
                return TickOutcome::EnteredIdle;
            }
        } else if state == SystemState::Idle && self.coordinator.exit_idle().await {
            return TickOutcome::ExitedIdle;
        }
        TickOutcome::NoChange
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Power monitor started (idle {}s, shutdown {}, every {}s)",
            self.config.idle_timeout_secs,
            match self.config.shutdown_timeout() {
                Some(t) => format!("{}s", t.as_secs()),
                None => "disabled".to_string(),
            },
            self.config.monitor_interval().as_secs()
        );

        let mut interval = tokio::time::interval(self.config.monitor_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    if outcome != TickOutcome::NoChange {
                        debug!("Power monitor tick: {:?}", outcome);
                    }
                }
            }
        }
        debug!("Power monitor stopped");
    }
}

/// Periodically expire client liveness once pings stop
pub async fn run_client_monitor(
    activity: Arc<ActivityTracker>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                activity.refresh_client_status();
            }
        }
    }
    debug!("Client monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{booted_rig, rig_with};
    use std::sync::atomic::Ordering;

    async fn stats(coordinator: &Coordinator) -> crate::device::DeviceStats {
        coordinator.device_lock().acquire("test").await.unwrap().stats()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_timeout_then_ping_wakes() {
        // idle 5 s, shutdown disabled
        let rig = booted_rig().await;
        let c = rig.coordinator.clone();
        let monitor = IdleShutdownMonitor::new(c.clone());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(monitor.tick().await, TickOutcome::NoChange);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(monitor.tick().await, TickOutcome::EnteredIdle);
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(monitor.tick().await, TickOutcome::NoChange);
        }
        assert_eq!(c.state_machine().current().await, SystemState::Idle);
        assert_eq!(stats(&c).await.shutdowns, 1);
        assert_eq!(rig.probe.closes.load(Ordering::SeqCst), 1);

        assert!(c.record_ping().await);
        assert_eq!(c.state_machine().current().await, SystemState::Running);
        assert_eq!(monitor.tick().await, TickOutcome::NoChange);
        assert_eq!(stats(&c).await.initializations, 2);
        assert_eq!(rig.probe.opens.load(Ordering::SeqCst), 2);
        assert_eq!(rig.power.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_client_prevents_idle() {
        let rig = booted_rig().await;
        let c = rig.coordinator.clone();
        let monitor = IdleShutdownMonitor::new(c.clone());

        c.record_ping().await;
        // Beyond idle timeout but inside the 60 s client timeout
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.tick().await, TickOutcome::NoChange);
        assert_eq!(c.state_machine().current().await, SystemState::Running);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.tick().await, TickOutcome::EnteredIdle);
        assert!(!c.activity().is_client_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_exits_idle() {
        let rig = booted_rig().await;
        let c = rig.coordinator.clone();
        let monitor = IdleShutdownMonitor::new(c.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(monitor.tick().await, TickOutcome::EnteredIdle);

        c.activity().touch();
        assert_eq!(monitor.tick().await, TickOutcome::ExitedIdle);
        assert_eq!(monitor.tick().await, TickOutcome::NoChange);
        assert_eq!(stats(&c).await.initializations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_shutdown() {
        let rig = rig_with(|config| {
            config.power.idle_timeout_secs = 5;
            config.power.shutdown_timeout_secs = 20;
        })
        .await;
        rig.coordinator.boot().await;
        let c = rig.coordinator.clone();
        let monitor = IdleShutdownMonitor::new(c.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(monitor.tick().await, TickOutcome::EnteredIdle);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(monitor.tick().await, TickOutcome::PoweredOff);
        assert_eq!(c.state_machine().current().await, SystemState::PoweredOff);
        assert_eq!(rig.power.calls.load(Ordering::SeqCst), 1);
        // Released once at idle entry; nothing left to release at power-off
        assert_eq!(stats(&c).await.shutdowns, 1);

        assert_eq!(monitor.tick().await, TickOutcome::Skipped);
        assert_eq!(rig.power.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_enters_idle_once() {
        let rig = booted_rig().await;
        let c = rig.coordinator.clone();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(IdleShutdownMonitor::new(c.clone()).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(c.state_machine().current().await, SystemState::Idle);
        assert_eq!(stats(&c).await.shutdowns, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_monitor_expires_liveness() {
        let activity = Arc::new(ActivityTracker::new(Duration::from_secs(3)));
        activity.record(crate::activity::ActivitySource::Ping);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_client_monitor(
            activity.clone(),
            Duration::from_secs(1),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(activity.is_client_active());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!activity.is_client_active());

        cancel.cancel();
        task.await.unwrap();
    }
}
