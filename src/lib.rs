//! camkeeper - power-aware coordinator for a single shared camera
//!
//! One capture device is shared between a live MJPEG preview and full
//! resolution still captures. Access is serialized by a bounded-wait
//! [`device::ResourceLock`]; an idle/shutdown monitor releases the device
//! when nobody is using it and brings it back on the next request. The
//! [`coordinator::Coordinator`] owns every component and is shared with the
//! HTTP layer.

pub mod activity;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod indicator;
pub mod power;
pub mod storage;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

#[cfg(test)]
mod testing;

pub use coordinator::Coordinator;
pub use error::{AppError, Result};
