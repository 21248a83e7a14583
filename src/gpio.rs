//! Digital inputs and outputs.
//!
//! Pins are accessed through the Linux sysfs GPIO interface: one directory
//! per exported pin, holding a `direction` and a `value` file. Pull-up
//! resistors for the buttons and the presence sensor are expected to be
//! configured by the device tree or firmware; sysfs cannot set them.
//!
//! Edges are detected by sampling the level, which is plenty fast for
//! hands and paper cards and needs no interrupt plumbing.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Sampling period of the edge detector.
pub const EDGE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Back-off after a failed read before sampling again.
pub const READ_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Signal level of a digital pin.
///
/// Inputs are pulled up: a pressed button or blocked sensor reads `Low`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Edge {
    /// High to low.
    Falling,
    /// Low to high.
    Rising,
}

impl Edge {
    #[must_use]
    pub fn is_transition(self, from: Level, to: Level) -> bool {
        matches!(
            (self, from, to),
            (Self::Falling, Level::High, Level::Low) | (Self::Rising, Level::Low, Level::High)
        )
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

pub trait Input: Send + Sync {
    /// Samples the current level.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be read.
    fn level(&self) -> Result<Level>;
}

pub trait Output: Send + Sync {
    /// Drives the pin to `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    fn set(&self, level: Level) -> Result<()>;
}

/// A pin exported through sysfs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysfsPin {
    number: u32,
    value: PathBuf,
}

impl SysfsPin {
    /// Opens `number` as an input, exporting it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be exported or configured.
    pub fn input<P: AsRef<Path>>(root: P, number: u32) -> Result<Self> {
        Self::open(root.as_ref(), number, "in")
    }

    /// Opens `number` as an output driven low, exporting it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be exported or configured.
    pub fn output<P: AsRef<Path>>(root: P, number: u32) -> Result<Self> {
        // "low" sets the direction to output without a glitch to high.
        Self::open(root.as_ref(), number, "low")
    }

    fn open(root: &Path, number: u32, direction: &str) -> Result<Self> {
        let dir = root.join(format!("gpio{number}"));
        if !dir.exists() {
            debug!("exporting gpio{number}");
            fs::write(root.join("export"), number.to_string())?;
        }

        fs::write(dir.join("direction"), direction)?;
        trace!("gpio{number} direction: {direction}");

        Ok(Self {
            number,
            value: dir.join("value"),
        })
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl Input for SysfsPin {
    fn level(&self) -> Result<Level> {
        // sysfs values are served from kernel memory and never block, so
        // reading them inline on a runtime thread is fine.
        let value = fs::read_to_string(&self.value)?;
        match value.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(Error::data_loss(format!(
                "gpio{} has invalid value {other:?}",
                self.number
            ))),
        }
    }
}

impl Output for SysfsPin {
    fn set(&self, level: Level) -> Result<()> {
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };
        fs::write(&self.value, value)?;
        Ok(())
    }
}

/// Waits until `input` makes the transition `edge`.
///
/// The level at the time of the call is the starting point: a pin that is
/// already low does not satisfy a falling edge until it has been high.
///
/// # Errors
///
/// Returns an error if the pin cannot be read.
pub async fn wait_for_edge(input: &dyn Input, edge: Edge) -> Result<()> {
    let mut previous = input.level()?;
    let mut poll = tokio::time::interval(EDGE_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        poll.tick().await;
        let level = input.level()?;
        if edge.is_transition(previous, level) {
            return Ok(());
        }
        previous = level;
    }
}

/// Calls `on_edge` for every falling edge of `input`, forever.
///
/// Edges within `debounce` of the last reported edge are suppressed. Read
/// errors are logged and sampling resumes after a short back-off.
pub async fn watch_falling_edges<F>(input: Arc<dyn Input>, debounce: Duration, mut on_edge: F)
where
    F: FnMut() + Send,
{
    let mut last_edge: Option<Instant> = None;

    loop {
        if let Err(e) = wait_for_edge(input.as_ref(), Edge::Falling).await {
            warn!("error watching input: {e}");
            tokio::time::sleep(READ_RETRY_INTERVAL).await;
            continue;
        }

        let now = Instant::now();
        if last_edge.is_some_and(|last| now.duration_since(last) < debounce) {
            trace!("debounced edge");
            continue;
        }

        last_edge = Some(now);
        on_edge();
    }
}
