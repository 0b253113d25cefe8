//! Power management
//!
//! System state machine, host power control and the monitors that move the
//! system between Running, Idle and PoweredOff.

mod control;
mod monitor;
mod state;

#[cfg(test)]
pub use control::RecordingPowerControl;
pub use control::{from_config, NoopPowerControl, PowerControl, SystemPowerOff};
pub use monitor::{run_client_monitor, IdleShutdownMonitor, TickOutcome};
pub use state::{StateMachine, SystemState};
