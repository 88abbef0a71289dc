use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

/// Belt speed pair reported while the treadmill is moving
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    /// Current belt speed in km/h, one decimal place
    pub current_kmh: f32,
    /// Speed the treadmill is ramping towards in km/h, one decimal place
    pub target_kmh: f32,
}

/// Session counters carried by running and stopping frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Time on the belt in seconds
    pub elapsed_seconds: u32,
    /// Distance covered in meters (10 m resolution)
    pub distance_in_meters: u32,
    /// Current and target speed
    pub speed: Speed,
}

/// Status reported by the treadmill
///
/// Every variant but [`TreadmillStatus::Disconnected`] is decoded from a
/// notification frame. `Disconnected` is produced locally when the link drops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreadmillStatus {
    /// Powered, belt idle
    Standby,
    /// Belt halted after a session
    Stopped,
    /// Leaving standby
    WakingUp,
    /// Armed, countdown not started yet
    Prestart,
    /// Counting down before the belt moves
    Starting {
        /// Seconds remaining before motion begins
        countdown: u8,
    },
    /// Belt moving
    Running(Workout),
    /// Belt slowing down to a halt
    Stopping(Workout),
    /// The link to the treadmill dropped
    Disconnected,
}

impl TreadmillStatus {
    /// Workout counters, for the running and stopping states
    #[must_use]
    pub const fn workout(&self) -> Option<&Workout> {
        match self {
            Self::Running(workout) | Self::Stopping(workout) => Some(workout),
            _ => None,
        }
    }

    /// Whether the belt is moving
    #[must_use]
    pub const fn is_moving(&self) -> bool {
        self.workout().is_some()
    }
}

impl fmt::Display for TreadmillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => write!(f, "Standby"),
            Self::Stopped => write!(f, "Stopped"),
            Self::WakingUp => write!(f, "Waking up"),
            Self::Prestart => write!(f, "Prestart"),
            Self::Starting { countdown } => write!(f, "Starting in {countdown}s"),
            Self::Running(workout) => write!(f, "Running ({workout})"),
            Self::Stopping(workout) => write!(f, "Stopping ({workout})"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl fmt::Display for Workout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.elapsed_seconds / 3600;
        let minutes = self.elapsed_seconds / 60 % 60;
        let seconds = self.elapsed_seconds % 60;
        write!(
            f,
            "{hours}:{minutes:02}:{seconds:02}, {} m, {:.1}/{:.1} km/h",
            self.distance_in_meters, self.speed.current_kmh, self.speed.target_kmh
        )
    }
}

/// Lifecycle state of a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Created, no connect attempt made yet
    Idle,
    /// A reconnect loop is trying to reach the device
    Connecting,
    /// Link is up and the notification characteristic is wired
    Connected,
    /// Torn down for good
    Destroyed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// UUID of the status characteristic; the first notifying characteristic when unset
    pub notify_characteristic: Option<Uuid>,
    /// How long to scan for an unknown peripheral, in milliseconds
    pub scan_timeout_ms: u64,
    /// Timeout of a single connect attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Pause between failed connect attempts in milliseconds
    pub reconnect_delay_ms: u64,
}

impl ConnectionConfig {
    /// Pause between failed connect attempts
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            notify_characteristic: None,
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workout() -> Workout {
        Workout {
            elapsed_seconds: 3_725,
            distance_in_meters: 2_000,
            speed: Speed {
                current_kmh: 12.0,
                target_kmh: 5.0,
            },
        }
    }

    #[test]
    fn test_workout_accessor() {
        assert_eq!(TreadmillStatus::Running(workout()).workout(), Some(&workout()));
        assert!(TreadmillStatus::Stopping(workout()).is_moving());
        assert!(!TreadmillStatus::Starting { countdown: 3 }.is_moving());
        assert_eq!(TreadmillStatus::Disconnected.workout(), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            TreadmillStatus::Running(workout()).to_string(),
            "Running (1:02:05, 2000 m, 12.0/5.0 km/h)"
        );
        assert_eq!(
            TreadmillStatus::Starting { countdown: 3 }.to_string(),
            "Starting in 3s"
        );
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_value(TreadmillStatus::WakingUp).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "WAKING_UP" }));

        let json = serde_json::to_value(TreadmillStatus::Starting { countdown: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "STARTING", "countdown": 2 }));

        let json = serde_json::to_value(TreadmillStatus::Running(workout())).unwrap();
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["elapsed_seconds"], 3_725);
        assert_eq!(json["speed"]["target_kmh"], 5.0);
    }

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert!(config.notify_characteristic.is_none());
        assert_eq!(config.scan_timeout_ms, 5_000);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.reconnect_delay(), Duration::ZERO);
    }
}
