//! # vive-tracker - pose of one Vive tracker puck, runtime-agnostic
//!
//! Reads a single generic tracker through either the open lighthouse driver
//! (libsurvive, feature `lighthouse`) or the vendor runtime (OpenVR /
//! SteamVR, feature `steamvr`). Provides:
//! - A polled [`Tracker`] that survives runtime restarts and device loss,
//!   reconnecting on a throttled interval
//! - Poses in one canonical frame: right-handed, Y-up, meters
//! - Non-blocking session teardown for runtimes whose close can hang
//! - C FFI for integration with C/C++/Unity/Swift
//!
//! ## Quick Start
//! ```no_run
//! use vive_tracker::Tracker;
//!
//! let mut tracker = Tracker::new().unwrap();
//! tracker.setup();
//! loop {
//!     tracker.update();
//!     if tracker.is_tracking() {
//!         println!("pos: {:?}", tracker.position());
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(11));
//! }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod lighthouse;
pub mod locator;
pub mod sampler;
pub mod steamvr;
pub mod teardown;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod mock;

pub use backend::{Backend, Session};
pub use config::TrackerConfig;
pub use error::{ConnectError, TrackerError};
pub use frame::{AxisRemap, FrameConverter};
pub use tracker::Tracker;
pub use types::*;

/// Result type alias for vive-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
