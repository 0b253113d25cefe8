//! Client activity tracking
//!
//! Two clocks drive the power policy: the time of the last client ping
//! (client liveness) and the time of the last activity of any kind (idle and
//! shutdown timers).

use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

/// What produced an activity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Ping,
    Capture,
    StreamOpen,
    StreamKeepalive,
}

struct ActivityState {
    last_ping: Option<Instant>,
    last_ping_wall: Option<DateTime<Local>>,
    last_activity: Instant,
    client_active: bool,
}

/// Point-in-time view of the activity state
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySnapshot {
    pub client_active: bool,
    pub last_ping: Option<DateTime<Local>>,
    #[serde(rename = "inactive_secs", serialize_with = "serialize_secs")]
    pub inactivity: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Records activity signals; last write wins
pub struct ActivityTracker {
    state: Mutex<ActivityState>,
    client_timeout: Duration,
}

impl ActivityTracker {
    /// Start tracking; the inactivity clock starts now
    pub fn new(client_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(ActivityState {
                last_ping: None,
                last_ping_wall: None,
                last_activity: Instant::now(),
                client_active: false,
            }),
            client_timeout,
        }
    }

    /// Record a client signal: marks the client active and resets both clocks
    pub fn record(&self, source: ActivitySource) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_ping = Some(now);
        state.last_ping_wall = Some(Local::now());
        state.last_activity = now;
        if !state.client_active {
            debug!("Client active ({:?})", source);
        }
        state.client_active = true;
    }

    /// Reset the inactivity clock without touching client liveness
    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn is_client_active(&self) -> bool {
        self.state.lock().client_active
    }

    /// Time since the last activity of any kind
    pub fn inactivity(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Expire client liveness once pings stop for longer than the client
    /// timeout. Returns the liveness after the check.
    pub fn refresh_client_status(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(last_ping) = state.last_ping {
            if state.client_active && last_ping.elapsed() > self.client_timeout {
                state.client_active = false;
                info!(
                    "Client inactive: no ping for {}s",
                    last_ping.elapsed().as_secs()
                );
            }
        }
        state.client_active
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        let state = self.state.lock();
        ActivitySnapshot {
            client_active: state.client_active,
            last_ping: state.last_ping_wall,
            inactivity: state.last_activity.elapsed(),
        }
    }
}
