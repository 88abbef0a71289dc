use crate::types::{Speed, TreadmillStatus, Workout};
use bytes::Buf;

/// Index of the frame type byte
pub const FRAME_TYPE_INDEX: usize = 1;

/// Index of the sub-state byte inside [`FRAME_TYPE_STATE`] frames
pub const STATE_INDEX: usize = 3;

/// Frame type: treadmill in standby
pub const FRAME_TYPE_STANDBY: u8 = 0x04;

/// Frame type: treadmill stopped
pub const FRAME_TYPE_STOPPED: u8 = 0x05;

/// Frame type: state report, refined by the byte at [`STATE_INDEX`]
pub const FRAME_TYPE_STATE: u8 = 0x10;

/// State: countdown before the belt starts (or prestart, see [`PRESTART_FRAME_LEN`])
pub const STATE_STARTING: u8 = 0x01;

/// State: belt moving
pub const STATE_RUNNING: u8 = 0x02;

/// State: belt slowing to a halt
pub const STATE_STOPPING: u8 = 0x04;

/// State: belt stopped
pub const STATE_STOPPED: u8 = 0x05;

/// State: leaving standby
pub const STATE_WAKING_UP: u8 = 0x08;

/// A [`STATE_STARTING`] frame of exactly this length carries no countdown yet
pub const PRESTART_FRAME_LEN: usize = 6;

/// Index of the countdown byte in a starting frame
pub const COUNTDOWN_INDEX: usize = 10;

/// Running and stopping frames are read from byte 4 up to and including byte 12
const WORKOUT_START: usize = 4;
const WORKOUT_END: usize = 13;

/// Decode one notification frame
///
/// Frame layout as sent by the treadmill:
/// - Byte 1: frame type (`0x04` standby, `0x05` stopped, `0x10` state report)
/// - Byte 3: state of a `0x10` report
/// - Byte 4: target speed (tenths of km/h)
/// - Byte 5: current speed (tenths of km/h)
/// - Bytes 8-10: elapsed hours, minutes, seconds
/// - Bytes 11-12: distance in tens of meters (big-endian)
///
/// A starting report of exactly six bytes is the armed prestart state; longer
/// ones carry the countdown in byte 10.
///
/// Returns `None` for unknown frame types and for frames too short to hold
/// the bytes their type needs. Never panics.
#[must_use]
pub fn decode(data: &[u8]) -> Option<TreadmillStatus> {
    match *data.get(FRAME_TYPE_INDEX)? {
        FRAME_TYPE_STANDBY => Some(TreadmillStatus::Standby),
        FRAME_TYPE_STOPPED => Some(TreadmillStatus::Stopped),
        FRAME_TYPE_STATE => decode_state(data),
        _ => None,
    }
}

fn decode_state(data: &[u8]) -> Option<TreadmillStatus> {
    // Prestart and starting share a state byte, only the length tells them apart.
    match *data.get(STATE_INDEX)? {
        STATE_WAKING_UP => Some(TreadmillStatus::WakingUp),
        STATE_STOPPED => Some(TreadmillStatus::Stopped),
        STATE_STARTING if data.len() == PRESTART_FRAME_LEN => Some(TreadmillStatus::Prestart),
        STATE_STARTING => Some(TreadmillStatus::Starting {
            countdown: *data.get(COUNTDOWN_INDEX)?,
        }),
        STATE_RUNNING => decode_workout(data).map(TreadmillStatus::Running),
        STATE_STOPPING => decode_workout(data).map(TreadmillStatus::Stopping),
        _ => None,
    }
}

fn decode_workout(data: &[u8]) -> Option<Workout> {
    let mut buf = data.get(WORKOUT_START..WORKOUT_END)?;

    let target_kmh = f32::from(buf.get_u8()) / 10.0;
    let current_kmh = f32::from(buf.get_u8()) / 10.0;

    buf.advance(2);

    let hours = u32::from(buf.get_u8());
    let minutes = u32::from(buf.get_u8());
    let seconds = u32::from(buf.get_u8());

    let distance = u32::from(buf.get_u16());

    Some(Workout {
        elapsed_seconds: hours * 3600 + minutes * 60 + seconds,
        distance_in_meters: distance * 10,
        speed: Speed {
            current_kmh,
            target_kmh,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_frame_types() {
        assert_eq!(decode(&[0x00, 0x04]), Some(TreadmillStatus::Standby));
        assert_eq!(decode(&[0xAB, 0x05]), Some(TreadmillStatus::Stopped));
        assert_eq!(
            decode(&[0x00, 0x04, 0xFF, 0xFF, 0xFF]),
            Some(TreadmillStatus::Standby)
        );
    }

    #[test]
    fn test_state_frames() {
        assert_eq!(
            decode(&[0x00, 0x10, 0x00, 0x08]),
            Some(TreadmillStatus::WakingUp)
        );
        assert_eq!(
            decode(&[0x00, 0x10, 0x00, 0x05]),
            Some(TreadmillStatus::Stopped)
        );
        assert_eq!(decode(&[0x00, 0x10, 0x00, 0x07, 0x00, 0x00]), None);
    }

    #[test]
    fn test_prestart_is_decided_by_length() {
        assert_eq!(
            decode(&[0x00, 0x10, 0x00, 0x01, 0x00, 0x00]),
            Some(TreadmillStatus::Prestart)
        );

        let starting = [0x00, 0x10, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 3, 0, 0];
        assert_eq!(
            decode(&starting),
            Some(TreadmillStatus::Starting { countdown: 3 })
        );

        let starting = [0x00, 0x10, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(
            decode(&starting),
            Some(TreadmillStatus::Starting { countdown: 1 })
        );
    }

    #[test]
    fn test_running_frame() {
        let frame = [0, 0x10, 0, 0x02, 50, 120, 0, 0, 0, 1, 30, 0, 200];
        let Some(TreadmillStatus::Running(workout)) = decode(&frame) else {
            panic!("expected a running status");
        };

        assert!((workout.speed.current_kmh - 12.0).abs() < f32::EPSILON);
        assert!((workout.speed.target_kmh - 5.0).abs() < f32::EPSILON);
        assert_eq!(workout.elapsed_seconds, 90);
        assert_eq!(workout.distance_in_meters, 2000);
    }

    #[test]
    fn test_stopping_frame() {
        let frame = [0, 0x10, 0, 0x04, 0, 15, 0, 0, 1, 2, 3, 1, 2];
        let Some(TreadmillStatus::Stopping(workout)) = decode(&frame) else {
            panic!("expected a stopping status");
        };

        assert!((workout.speed.current_kmh - 1.5).abs() < 1e-6);
        assert!(workout.speed.target_kmh.abs() < f32::EPSILON);
        assert_eq!(workout.elapsed_seconds, 3600 + 120 + 3);
        assert_eq!(workout.distance_in_meters, 258 * 10);
    }

    #[test]
    fn test_unknown_and_truncated_frames() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x04]), None);
        assert_eq!(decode(&[0x00, 0x99]), None);
        assert_eq!(decode(&[0x00, 0x10]), None);
        assert_eq!(decode(&[0x00, 0x10, 0x00]), None);
        // Countdown byte missing
        assert_eq!(decode(&[0x00, 0x10, 0x00, 0x01, 0, 0, 0]), None);
        // Workout counters cut short
        assert_eq!(decode(&[0, 0x10, 0, 0x02, 50, 120, 0, 0, 0, 1, 30, 0]), None);
    }

    #[test]
    fn test_decode_is_total_over_short_inputs() {
        for len in 0..=20 {
            for tag in [0x04, 0x05, 0x10, 0x00, 0xFF] {
                for state in [0x01, 0x02, 0x04, 0x05, 0x08, 0x00] {
                    let mut frame = vec![0xA5u8; len];
                    if len > FRAME_TYPE_INDEX {
                        frame[FRAME_TYPE_INDEX] = tag;
                    }
                    if len > STATE_INDEX {
                        frame[STATE_INDEX] = state;
                    }
                    let _ = decode(&frame);
                }
            }
        }
    }
}
