//! Transport buttons: short presses skip or toggle, long presses seek or stop.
//!
//! Each falling edge starts a hold session for that button, which samples
//! the pin until it is released:
//!
//! * released after less than 200 ms: contact bounce, ignored
//! * released between 200 ms and 1 s: the short-press action, once
//! * held longer: the long-press action, first after roughly one second and
//!   then every half second, each time with the total time held so far
//!
//! | button     | short press        | long press                 |
//! |------------|--------------------|----------------------------|
//! | previous   | `prev`             | seek back 5 s per second   |
//! | play/pause | `pause` or `play`  | `stop`                     |
//! | next       | `next`             | seek ahead 5 s per second  |
//!
//! Sessions of different buttons run concurrently and independently.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};

use crate::{
    gpio::{self, Input, Level},
    intent::Dispatcher,
    remote::Command,
    state::{PlaybackState, Snapshot},
};

/// Delay after the press before the long-press regime may begin.
pub const LONG_PRESS_GRACE: Duration = Duration::from_millis(500);

/// Minimum spacing of repeated long-press actions.
pub const LONG_PRESS_REPEAT: Duration = Duration::from_millis(500);

/// Shortest press that is not contact bounce.
pub const MIN_SHORT_PRESS: Duration = Duration::from_millis(200);

/// Presses this long or longer are long presses.
pub const MAX_SHORT_PRESS: Duration = Duration::from_secs(1);

/// Sampling period of a held button.
pub const HOLD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Seconds to seek per second held.
pub const SEEK_SPEED: f64 = 5.0;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Button {
    Previous,
    PlayPause,
    Next,
}

impl Button {
    pub const ALL: [Self; 3] = [Self::Previous, Self::PlayPause, Self::Next];

    fn index(self) -> usize {
        match self {
            Self::Previous => 0,
            Self::PlayPause => 1,
            Self::Next => 2,
        }
    }

    /// Action for a press between [`MIN_SHORT_PRESS`] and [`MAX_SHORT_PRESS`].
    #[must_use]
    pub fn short_action(self) -> ShortAction {
        match self {
            Self::Previous => ShortAction::Previous,
            Self::PlayPause => ShortAction::TogglePlayback,
            Self::Next => ShortAction::Next,
        }
    }

    /// Action repeated while the button is held.
    #[must_use]
    pub fn long_action(self) -> LongAction {
        match self {
            Self::Previous => LongAction::Seek(-SEEK_SPEED),
            Self::PlayPause => LongAction::Stop,
            Self::Next => LongAction::Seek(SEEK_SPEED),
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Previous => write!(f, "previous"),
            Self::PlayPause => write!(f, "play/pause"),
            Self::Next => write!(f, "next"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ShortAction {
    Previous,
    /// Pause when playing, play otherwise.
    TogglePlayback,
    Next,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LongAction {
    /// Seek relative to the cached position, scaled by the time held.
    Seek(f64),
    /// Stop playback. Fires once per hold.
    Stop,
}

impl LongAction {
    fn repeats(self) -> bool {
        matches!(self, Self::Seek(_))
    }
}

/// Absolute seek target for a relative step, if it lies within the track.
///
/// Targets outside `0..=duration` are dropped rather than clamped.
#[must_use]
pub fn seek_target(state: &Snapshot, step: f64) -> Option<i64> {
    let target = (state.seek_position + step).round();

    #[expect(clippy::cast_precision_loss)]
    let duration = state.duration as f64;

    if !(0.0..=duration).contains(&target) {
        return None;
    }

    #[expect(clippy::cast_possible_truncation)]
    let target = target as i64;
    Some(target)
}

/// One input per button. Having a field per button guarantees every
/// button is wired before the classifier can be built.
#[derive(Clone)]
pub struct Inputs {
    pub previous: Arc<dyn Input>,
    pub play_pause: Arc<dyn Input>,
    pub next: Arc<dyn Input>,
}

impl Inputs {
    #[must_use]
    pub fn get(&self, button: Button) -> &Arc<dyn Input> {
        match button {
            Button::Previous => &self.previous,
            Button::PlayPause => &self.play_pause,
            Button::Next => &self.next,
        }
    }
}

struct Inner {
    inputs: Inputs,
    held: [AtomicBool; 3],
    dispatcher: Dispatcher,
    state: PlaybackState,
}

/// Classifies button presses and emits the resulting commands.
///
/// Cloning yields another handle to the same classifier.
#[derive(Clone)]
pub struct Classifier {
    inner: Arc<Inner>,
}

/// Clears the held flag of a button when its session ends, however it ends.
struct HeldGuard {
    inner: Arc<Inner>,
    button: Button,
}

impl Drop for HeldGuard {
    fn drop(&mut self) {
        self.inner.held[self.button.index()].store(false, Ordering::Release);
    }
}

impl Classifier {
    #[must_use]
    pub fn new(inputs: Inputs, dispatcher: Dispatcher, state: PlaybackState) -> Self {
        Self {
            inner: Arc::new(Inner {
                inputs,
                held: Default::default(),
                dispatcher,
                state,
            }),
        }
    }

    /// Handles a (debounced) falling edge of `button`.
    ///
    /// Spawns a hold session unless one is already running for the button.
    /// Must be called from within a tokio runtime.
    pub fn on_edge(&self, button: Button) -> Option<JoinHandle<()>> {
        if self.inner.held[button.index()].swap(true, Ordering::AcqRel) {
            trace!("{button} already held");
            return None;
        }

        let guard = HeldGuard {
            inner: Arc::clone(&self.inner),
            button,
        };
        let classifier = self.clone();
        Some(tokio::spawn(async move {
            classifier.hold(button).await;
            drop(guard);
        }))
    }

    /// Watches all buttons for presses, forever.
    pub fn watch(&self, debounce: Duration) -> Vec<JoinHandle<()>> {
        Button::ALL
            .into_iter()
            .map(|button| {
                let input = Arc::clone(self.inner.inputs.get(button));
                let classifier = self.clone();
                tokio::spawn(gpio::watch_falling_edges(input, debounce, move || {
                    classifier.on_edge(button);
                }))
            })
            .collect()
    }

    fn is_pressed(&self, button: Button) -> bool {
        match self.inner.inputs.get(button).level() {
            Ok(level) => level == Level::Low,
            Err(e) => {
                warn!("error reading {button} button: {e}");
                false
            }
        }
    }

    async fn hold(&self, button: Button) {
        // Spurious edges tend to follow the release of a long press.
        if !self.is_pressed(button) {
            trace!("ignoring spurious {button} edge");
            return;
        }

        let long_action = button.long_action();
        let press_start = Instant::now();
        let mut last_long_action = press_start + LONG_PRESS_GRACE;
        let mut long_pressed = false;

        while self.is_pressed(button) {
            let now = Instant::now();
            if (!long_pressed || long_action.repeats())
                && now.saturating_duration_since(last_long_action) > LONG_PRESS_REPEAT
            {
                self.long_press(long_action, now.duration_since(press_start));
                last_long_action = now;
                long_pressed = true;
            }

            tokio::time::sleep(HOLD_POLL_INTERVAL).await;
        }

        let held = press_start.elapsed();
        trace!("{button} held for {:.2}s", held.as_secs_f32());

        if (MIN_SHORT_PRESS..MAX_SHORT_PRESS).contains(&held) {
            self.short_press(button.short_action());
        }
    }

    fn short_press(&self, action: ShortAction) {
        let command = match action {
            ShortAction::Previous => Command::Prev,
            ShortAction::Next => Command::Next,
            ShortAction::TogglePlayback => {
                if self.inner.state.is_playing() {
                    Command::Pause
                } else {
                    Command::Play
                }
            }
        };
        self.inner.dispatcher.emit(command);
    }

    fn long_press(&self, action: LongAction, held: Duration) {
        match action {
            LongAction::Seek(speed) => {
                let step = speed * held.as_secs_f64();
                let snapshot = self.inner.state.snapshot();
                match seek_target(&snapshot, step) {
                    Some(target) => self.inner.dispatcher.emit(Command::Seek(target)),
                    None => trace!(
                        "dropping seek by {step:.1}s from {:.1}s of {}s",
                        snapshot.seek_position,
                        snapshot.duration
                    ),
                }
            }
            LongAction::Stop => self.inner.dispatcher.emit(Command::Stop),
        }
    }
}
