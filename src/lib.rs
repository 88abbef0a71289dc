#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Treadmill Link
//!
//! Keeps a Bluetooth Low Energy treadmill connected and turns its status
//! notifications into typed values.
//!
//! The treadmill pushes short binary frames on a notify characteristic. This
//! crate decodes them into [`TreadmillStatus`] and hands each one to every
//! registered listener. [`ConnectionManager`] owns the link: it retries until
//! the device accepts a connection, reconnects after every drop, and only keeps
//! hardware notifications switched on while somebody is listening.
//!
//! ## Frame Format
//!
//! Byte 1 selects the frame type. State reports (`0x10`) carry the state in
//! byte 3 and, while the belt moves, speed, elapsed time and distance in bytes
//! 4 to 12. See [`protocol::decode`] for the full layout.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use treadmill_link::{ConnectionConfig, ConnectionManager, StatusListener, TreadmillStatus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Resolves after the first successful link-up
//!     let treadmill =
//!         ConnectionManager::connect_bluetooth("C0:11:22:33:44:55", ConnectionConfig::default())
//!             .await?;
//!
//!     let listener: StatusListener = Arc::new(|status: &TreadmillStatus| {
//!         if let Some(workout) = status.workout() {
//!             println!("{} m at {:.1} km/h", workout.distance_in_meters, workout.speed.current_kmh);
//!         }
//!     });
//!     treadmill.add_listener(listener).await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     treadmill.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! Any other link can be plugged in by implementing [`Transport`].

/// Validated Bluetooth device addresses
pub mod address;
/// `btleplug` backed transport
pub mod ble;
/// Error types and handling
pub mod error;
/// Connection lifecycle and listener registry
pub mod manager;
/// Notification frame decoding
pub mod protocol;
/// Transport abstraction the manager drives
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use address::DeviceAddress;
pub use ble::BtleplugTransport;
pub use error::{Result, TreadmillError};
pub use manager::{ConnectionManager, StatusListener};
pub use transport::{LinkEvent, Transport};
pub use types::{ConnectionConfig, ConnectionState, Speed, TreadmillStatus, Workout};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
