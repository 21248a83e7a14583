//! Optical disc tray: play a disc when it is inserted.
//!
//! The drive status is polled once a second. A transition into
//! [`TrayStatus::DiskPresent`] dispatches the disc token. A disc that is
//! already in the drive when polling starts is only queued, so that a
//! reboot does not start playing on its own.

use std::{
    fmt,
    fs::OpenOptions,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{Error, Result},
    intent::{Dispatcher, Intent, Playback},
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// `ioctl` request for the drive status, from `linux/cdrom.h`.
const CDROM_DRIVE_STATUS: u32 = 0x5326;

/// Slot argument for `CDROM_DRIVE_STATUS` meaning the current slot.
const CDSL_CURRENT: libc::c_int = libc::c_int::MAX;

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub enum TrayStatus {
    #[default]
    Unknown,
    NoDisk,
    TrayOpen,
    /// The drive is spinning up or reading the table of contents.
    Reading,
    DiskPresent,
}

/// Decodes `CDS_*` status codes.
impl From<i32> for TrayStatus {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::NoDisk,
            2 => Self::TrayOpen,
            3 => Self::Reading,
            4 => Self::DiskPresent,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TrayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::NoDisk => write!(f, "no disk"),
            Self::TrayOpen => write!(f, "tray open"),
            Self::Reading => write!(f, "reading"),
            Self::DiskPresent => write!(f, "disk present"),
        }
    }
}

pub trait TrayProbe: Send + Sync {
    fn status(&self) -> TrayStatus;
}

/// Probes a Linux CD-ROM device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CdromProbe {
    device: PathBuf,
}

impl CdromProbe {
    #[must_use]
    pub fn new<P: AsRef<Path>>(device: P) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
        }
    }

    /// Queries the drive status.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened or does not support
    /// the status request.
    pub fn query(&self) -> Result<TrayStatus> {
        // Non-blocking, or opening waits for the drive to close its tray.
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.device)?;

        // SAFETY: the descriptor is open for the duration of the call and
        // this request takes an integer argument, not a pointer.
        let code = unsafe { libc::ioctl(file.as_raw_fd(), CDROM_DRIVE_STATUS as _, CDSL_CURRENT) };
        if code < 0 {
            return Err(Error::from(std::io::Error::last_os_error()));
        }

        Ok(TrayStatus::from(code))
    }
}

impl TrayProbe for CdromProbe {
    fn status(&self) -> TrayStatus {
        self.query().unwrap_or_else(|e| {
            trace!("error probing {}: {e}", self.device.display());
            TrayStatus::Unknown
        })
    }
}

/// Watches the tray for inserted discs.
pub struct TrayWatcher {
    probe: Arc<dyn TrayProbe>,
    dispatcher: Dispatcher,
    token: String,
    previous: Option<TrayStatus>,
}

impl TrayWatcher {
    #[must_use]
    pub fn new(probe: Arc<dyn TrayProbe>, dispatcher: Dispatcher, token: &str) -> Self {
        Self {
            probe,
            dispatcher,
            token: token.to_owned(),
            previous: None,
        }
    }

    /// Records a status reading and tells whether and how to dispatch.
    pub fn observe(&mut self, status: TrayStatus) -> Option<Playback> {
        let previous = self.previous.replace(status);
        if status != TrayStatus::DiskPresent {
            return None;
        }

        match previous {
            None => Some(Playback::QueueOnly),
            Some(TrayStatus::DiskPresent) => None,
            Some(_) => Some(Playback::AutoPlay),
        }
    }

    /// Probes once and dispatches the disc if it was just inserted.
    pub fn poll(&mut self) -> Option<Playback> {
        let status = self.probe.status();
        if self.previous != Some(status) {
            debug!("tray: {status}");
        }

        let playback = self.observe(status);
        if let Some(playback) = playback {
            info!("disc detected");
            self.dispatcher
                .dispatch_with(Intent::LibraryPath(self.token.clone()), playback);
        }

        playback
    }

    /// Polls forever.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.poll();
        }
    }
}
