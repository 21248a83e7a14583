//! Configuration of the appliance.
//!
//! Everything has a default matching the reference hardware build, so an
//! empty (or absent) configuration file yields a working setup:
//!
//! ```toml
//! [remote]
//! url = "http://localhost:3000"
//!
//! [library]
//! base_directory = "mnt/"
//!
//! [scanner]
//! timeout_ms = 4000
//!
//! [pins]
//! sensor = 5
//! led = 22
//! prev = 10
//! play = 9
//! next = 11
//! ```

use std::{collections::HashSet, fs, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Configuration files should be small; refuse to parse anything larger.
const MAX_CONFIG_SIZE: u64 = 64 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub remote: RemoteConfig,
    pub library: LibraryConfig,
    pub sounds: SoundsConfig,
    pub scanner: ScannerConfig,
    pub pins: PinsConfig,
    pub gpio: GpioConfig,
    pub tray: TrayConfig,
}

/// Where the playback service listens.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: Url,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Prefix for scanned library paths, as the playback service sees it.
    /// Concatenated verbatim, so it should end in a separator.
    pub base_directory: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoundsConfig {
    pub scanning: String,
    pub scan_fail: String,
}

/// The external barcode decoder.
///
/// The decoder is started as `program args... device` and is expected to
/// print one line per decoded symbol on standard output.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub device: String,
    pub timeout_ms: u64,
}

/// BCM pin numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinsConfig {
    pub sensor: u32,
    pub led: u32,
    pub prev: u32,
    pub play: u32,
    pub next: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioConfig {
    /// Root of the sysfs GPIO class directory.
    pub root: String,
    pub debounce_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrayConfig {
    pub enabled: bool,
    pub device: String,
    /// Playback token queued or played when a disc is detected.
    pub token: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:3000").expect("default url is valid"),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_directory: "mnt/".to_owned(),
        }
    }
}

impl Default for SoundsConfig {
    fn default() -> Self {
        Self {
            scanning: "mnt/INTERNAL/qudio/sounds/scanning.mp3".to_owned(),
            scan_fail: "mnt/INTERNAL/qudio/sounds/fail-05.mp3".to_owned(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: "zbarcam".to_owned(),
            args: [
                "--quiet",
                "--nodisplay",
                "--raw",
                "-Sdisable",
                "-Sqrcode.enable",
                "--prescale=320x240",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            device: "/dev/video0".to_owned(),
            timeout_ms: 4000,
        }
    }
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            sensor: 5,
            led: 22,
            prev: 10,
            play: 9,
            next: 11,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            root: "/sys/class/gpio".to_owned(),
            debounce_ms: 400,
        }
    }
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/sr0".to_owned(),
            token: "cdda:///".to_owned(),
        }
    }
}

impl ScannerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GpioConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is unreasonably large,
    /// does not parse, or fails [`validate`](Self::validate).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: configuration should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > MAX_CONFIG_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Checks the invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when two functions share a pin, when the
    /// scan timeout is zero, or when the remote URL scheme is unsupported.
    pub fn validate(&self) -> Result<()> {
        let pins = [
            self.pins.sensor,
            self.pins.led,
            self.pins.prev,
            self.pins.play,
            self.pins.next,
        ];
        let unique: HashSet<_> = pins.iter().collect();
        if unique.len() != pins.len() {
            return Err(Error::invalid_argument(format!(
                "pins must be distinct: {pins:?}"
            )));
        }

        if self.scanner.timeout_ms == 0 {
            return Err(Error::invalid_argument("scan timeout must be non-zero"));
        }

        match self.remote.url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            scheme => {
                return Err(Error::invalid_argument(format!(
                    "unsupported remote scheme: {scheme}"
                )))
            }
        }

        if self.remote.url.host_str().is_none() {
            return Err(Error::invalid_argument("remote url has no host"));
        }

        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
