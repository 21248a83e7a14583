//! Locally cached view of the playback service's state.
//!
//! The cache is fed by `pushState` events from the remote and read by the
//! button logic to toggle play/pause and to bound seeks without a round trip.
//!
//! Fields are updated independently. A reader may observe a position from
//! one push event and a duration from another; there is no cross-field
//! atomicity, only per-snapshot consistency of whatever was last written.

use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::Value;

/// A snapshot of the remote playback state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub is_playing: bool,
    /// Position in the current track, in seconds.
    pub seek_position: f64,
    /// Length of the current track, in whole seconds.
    pub duration: i64,
}

/// Fields of a `pushState` event that the cache consumes.
///
/// `seek` (milliseconds) and `duration` (seconds) are only honored when they
/// are integers; the service sends `null`, strings or floats for streams and
/// between tracks, in which case the previous value is kept.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PushState {
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub seek: Value,
    #[serde(default)]
    pub duration: Value,
}

/// Shared handle to the playback state cache.
///
/// Cloning yields another handle to the same state. The lock is only held
/// for the duration of a copy in or out, never across a blocking call.
#[derive(Clone, Debug, Default)]
pub struct PlaybackState {
    inner: Arc<RwLock<Snapshot>>,
}

impl PlaybackState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        // A writer that panicked mid-update leaves plain old data behind.
        *self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.snapshot().is_playing
    }

    /// Applies a push event.
    ///
    /// Any status other than `"play"` means not playing. Non-integer `seek`
    /// or `duration` fields are ignored one by one.
    pub fn apply(&self, push: &PushState) {
        let mut state = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        state.is_playing = push.status.as_str() == Some("play");

        if let Some(millis) = as_integer(&push.seek) {
            #[expect(clippy::cast_precision_loss)]
            let seconds = millis as f64 / 1000.0;
            state.seek_position = seconds;
        } else {
            trace!("ignoring seek {}", push.seek);
        }

        if let Some(duration) = as_integer(&push.duration) {
            state.duration = duration;
        } else {
            trace!("ignoring duration {}", push.duration);
        }
    }

    /// Parses and applies a raw `pushState` payload.
    ///
    /// Payloads that are not an object are dropped with a debug message.
    pub fn apply_value(&self, payload: Value) {
        match serde_json::from_value::<PushState>(payload) {
            Ok(push) => self.apply(&push),
            Err(e) => debug!("ignoring malformed push state: {e}"),
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn starts_stopped_at_zero() {
        let state = PlaybackState::new();
        assert_eq!(state.snapshot(), Snapshot::default());
        assert!(!state.is_playing());
    }

    #[test]
    fn applies_integer_fields() {
        let state = PlaybackState::new();
        state.apply_value(json!({"status": "play", "seek": 61_500, "duration": 240}));

        let snapshot = state.snapshot();
        assert!(snapshot.is_playing);
        assert!((snapshot.seek_position - 61.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.duration, 240);
    }

    #[test]
    fn non_play_status_means_stopped() {
        let state = PlaybackState::new();
        state.apply_value(json!({"status": "play"}));
        assert!(state.is_playing());

        state.apply_value(json!({"status": "pause"}));
        assert!(!state.is_playing());

        state.apply_value(json!({"status": "play"}));
        state.apply_value(json!({"status": 1}));
        assert!(!state.is_playing());
    }

    #[test]
    fn malformed_fields_keep_previous_values() {
        let state = PlaybackState::new();
        state.apply_value(json!({"status": "play", "seek": 10_000, "duration": 300}));
        state.apply_value(json!({"status": "play", "seek": "10", "duration": null}));

        let snapshot = state.snapshot();
        assert!((snapshot.seek_position - 10.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.duration, 300);

        state.apply_value(json!({"status": "play", "seek": 2.5, "duration": 301.7}));
        let snapshot = state.snapshot();
        assert!((snapshot.seek_position - 10.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.duration, 300);
    }

    #[test]
    fn repeated_push_is_idempotent() {
        let state = PlaybackState::new();
        let push = json!({"status": "stop", "seek": 1_000, "duration": 60});

        state.apply_value(push.clone());
        let first = state.snapshot();
        state.apply_value(push);
        assert_eq!(state.snapshot(), first);
    }

    #[test]
    fn non_object_payload_is_ignored() {
        let state = PlaybackState::new();
        state.apply_value(json!({"status": "play", "duration": 5}));
        state.apply_value(json!("garbage"));
        assert!(state.is_playing());
        assert_eq!(state.snapshot().duration, 5);
    }

    #[test]
    fn clones_share_state() {
        let state = PlaybackState::new();
        let reader = state.clone();
        state.apply_value(json!({"status": "play"}));
        assert!(reader.is_playing());
    }
}
