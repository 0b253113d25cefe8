//! System power state machine

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::indicator::{IndicatorBank, IndicatorId, LedPattern};

/// Power state of the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    PoweredOff,
    Booting,
    Running,
    Idle,
    ShuttingDown,
}

impl SystemState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SystemState) -> bool {
        use SystemState::*;
        matches!(
            (self, next),
            (PoweredOff, Booting)
                | (Booting, Running)
                | (Running, Idle)
                | (Idle, Running)
                | (Running, ShuttingDown)
                | (Idle, ShuttingDown)
                | (ShuttingDown, PoweredOff)
        )
    }

    /// Whether the system accepts work (pings, captures, streams)
    pub fn is_powered(self) -> bool {
        !matches!(self, SystemState::PoweredOff | SystemState::ShuttingDown)
    }

    /// Pattern of the status light in this state
    pub fn status_pattern(self) -> LedPattern {
        match self {
            SystemState::PoweredOff => LedPattern::Off,
            SystemState::Booting => LedPattern::blink(100, 100),
            SystemState::Running => LedPattern::On,
            SystemState::Idle => LedPattern::blink(500, 1500),
            SystemState::ShuttingDown => LedPattern::blink(200, 200),
        }
    }

    /// Pattern of the power light in this state
    pub fn power_pattern(self) -> LedPattern {
        match self {
            SystemState::PoweredOff => LedPattern::Off,
            SystemState::Booting | SystemState::Running => LedPattern::On,
            SystemState::Idle => LedPattern::blink(1000, 1000),
            SystemState::ShuttingDown => LedPattern::blink(200, 200),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SystemState::PoweredOff => "powered_off",
            SystemState::Booting => "booting",
            SystemState::Running => "running",
            SystemState::Idle => "idle",
            SystemState::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current [`SystemState`] plus the indicator patterns that go with it.
///
/// The state lock is held while the status and power lights are switched, so
/// no reader ever sees a state whose pattern has not been applied yet.
pub struct StateMachine {
    state: Mutex<SystemState>,
    indicators: Arc<IndicatorBank>,
    events: Arc<EventBus>,
}

impl StateMachine {
    /// Create the machine in `initial` and apply its indicator patterns
    pub async fn new(
        initial: SystemState,
        indicators: Arc<IndicatorBank>,
        events: Arc<EventBus>,
    ) -> Self {
        apply_patterns(&indicators, initial).await;
        Self {
            state: Mutex::new(initial),
            indicators,
            events,
        }
    }

    pub async fn current(&self) -> SystemState {
        *self.state.lock().await
    }

    /// Move to `next`.
    ///
    /// Staying in the current state is a no-op returning `Ok(false)`; an
    /// illegal transition is rejected without side effects.
    pub async fn transition(&self, next: SystemState) -> Result<bool> {
        let mut state = self.state.lock().await;
        let from = *state;
        if from == next {
            return Ok(false);
        }
        if !from.can_transition_to(next) {
            return Err(AppError::InvalidTransition { from, to: next });
        }
        self.apply(&mut state, next).await;
        Ok(true)
    }

    /// Move from `expected` to `next` only if the machine is in `expected`.
    ///
    /// The check and the transition are atomic, so among concurrent callers
    /// exactly one wins.
    pub async fn transition_from(&self, expected: &[SystemState], next: SystemState) -> bool {
        let mut state = self.state.lock().await;
        if !expected.contains(&*state) || !state.can_transition_to(next) {
            debug!(
                "Skipping transition to {}: state is {}, expected {:?}",
                next, *state, expected
            );
            return false;
        }
        self.apply(&mut state, next).await;
        true
    }

    async fn apply(&self, state: &mut SystemState, next: SystemState) {
        let from = *state;
        apply_patterns(&self.indicators, next).await;
        *state = next;
        info!("System state: {} -> {}", from, next);
        self.events.publish(SystemEvent::StateChanged { from, to: next });
    }
}

async fn apply_patterns(indicators: &IndicatorBank, state: SystemState) {
    indicators
        .set(IndicatorId::Status, state.status_pattern())
        .await;
    indicators.set(IndicatorId::Power, state.power_pattern()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn machine(initial: SystemState) -> (StateMachine, Arc<IndicatorBank>, Arc<EventBus>) {
        let indicators = Arc::new(IndicatorBank::virtual_lights());
        let events = Arc::new(EventBus::new());
        let sm = StateMachine::new(initial, indicators.clone(), events.clone()).await;
        (sm, indicators, events)
    }

    #[test]
    fn test_transition_table() {
        use SystemState::*;
        let all = [PoweredOff, Booting, Running, Idle, ShuttingDown];
        let allowed = [
            (PoweredOff, Booting),
            (Booting, Running),
            (Running, Idle),
            (Idle, Running),
            (Running, ShuttingDown),
            (Idle, ShuttingDown),
            (ShuttingDown, PoweredOff),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[tokio::test]
    async fn test_patterns_follow_state() {
        let (sm, indicators, _) = machine(SystemState::Booting).await;
        let check = |state: SystemState| {
            assert_eq!(
                indicators.get(IndicatorId::Status).pattern(),
                state.status_pattern()
            );
            assert_eq!(
                indicators.get(IndicatorId::Power).pattern(),
                state.power_pattern()
            );
        };
        check(SystemState::Booting);

        for next in [
            SystemState::Running,
            SystemState::Idle,
            SystemState::Running,
            SystemState::ShuttingDown,
            SystemState::PoweredOff,
        ] {
            assert!(sm.transition(next).await.unwrap());
            assert_eq!(sm.current().await, next);
            check(next);
        }
    }

    #[tokio::test]
    async fn test_illegal_transition_has_no_effect() {
        let (sm, indicators, events) = machine(SystemState::PoweredOff).await;
        let mut rx = events.subscribe();

        let err = sm.transition(SystemState::Running).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(sm.current().await, SystemState::PoweredOff);
        assert_eq!(
            indicators.get(IndicatorId::Status).pattern(),
            LedPattern::Off
        );
        assert!(rx.try_recv().is_err());

        // Same-state is a no-op
        assert!(!sm.transition(SystemState::PoweredOff).await.unwrap());
    }

    #[tokio::test]
    async fn test_transition_from_single_winner() {
        let (sm, _, events) = machine(SystemState::Idle).await;
        let sm = Arc::new(sm);
        let mut rx = events.subscribe();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let sm = sm.clone();
            tasks.push(tokio::spawn(async move {
                sm.transition_from(&[SystemState::Idle], SystemState::Running)
                    .await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::StateChanged {
                from: SystemState::Idle,
                to: SystemState::Running
            }
        ));
        assert!(rx.try_recv().is_err());
    }
}
