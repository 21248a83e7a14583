//! What a scanned token or an inserted disc asks the player to do.

use std::{fmt, sync::Arc};

use crate::{
    config::Config,
    remote::{Command, Remote, Service},
};

/// The classified meaning of a decoded token.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Intent {
    /// An internet radio stream, like `http://stream.example/radio.mp3`.
    WebStream(String),
    /// A streaming service URI, like `spotify:album:xyz`.
    StreamingService(String),
    /// A path in the local library, already prefixed with the base directory.
    LibraryPath(String),
    /// Nothing usable was scanned.
    FailureNotice,
}

impl Intent {
    /// Classifies a decoded token by its prefix.
    ///
    /// Prefixes are matched case-sensitively and in order: `http://` and
    /// `https://` are web streams, `spotify:` is the streaming service, and
    /// anything else is a library path relative to `base_directory`. One
    /// leading `/` is dropped from library paths so that absolute-looking
    /// codes stay inside the library.
    #[must_use]
    pub fn classify(token: &str, base_directory: &str) -> Self {
        if token.starts_with("http://") || token.starts_with("https://") {
            Self::WebStream(token.to_owned())
        } else if token.starts_with("spotify:") {
            Self::StreamingService(token.to_owned())
        } else {
            let relative = token.strip_prefix('/').unwrap_or(token);
            Self::LibraryPath(format!("{base_directory}{relative}"))
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebStream(uri) => write!(f, "web stream {uri}"),
            Self::StreamingService(uri) => write!(f, "streaming service {uri}"),
            Self::LibraryPath(path) => write!(f, "library path {path}"),
            Self::FailureNotice => write!(f, "failure notice"),
        }
    }
}

/// Whether a dispatched library path should start playing.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub enum Playback {
    #[default]
    AutoPlay,
    /// Replace the queue but leave the player idle.
    QueueOnly,
}

/// Feedback sounds played through the playback service.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Sound {
    Scanning,
    ScanFailed,
}

/// Turns intents and feedback sounds into commands on a [`Remote`].
///
/// Holds no state besides its configuration; clones share the remote.
#[derive(Clone)]
pub struct Dispatcher {
    remote: Arc<dyn Remote>,
    sound_scanning: String,
    sound_scan_fail: String,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: &Config, remote: Arc<dyn Remote>) -> Self {
        Self {
            remote,
            sound_scanning: config.sounds.scanning.clone(),
            sound_scan_fail: config.sounds.scan_fail.clone(),
        }
    }

    /// Emits a single command.
    pub fn emit(&self, command: Command) {
        self.remote.emit(command);
    }

    /// Plays a feedback sound. Fire and forget.
    pub fn sound(&self, sound: Sound) {
        let uri = match sound {
            Sound::Scanning => &self.sound_scanning,
            Sound::ScanFailed => &self.sound_scan_fail,
        };
        self.play(Service::Mpd, uri.clone());
    }

    /// Dispatches an intent, starting playback.
    pub fn dispatch(&self, intent: Intent) {
        self.dispatch_with(intent, Playback::AutoPlay);
    }

    /// Dispatches an intent. `playback` only applies to library paths;
    /// streams always start playing.
    pub fn dispatch_with(&self, intent: Intent, playback: Playback) {
        debug!("dispatching {intent}");
        match intent {
            Intent::WebStream(uri) => self.play(Service::WebRadio, uri),
            Intent::StreamingService(uri) => self.play(Service::Spotify, uri),
            Intent::LibraryPath(path) => match playback {
                Playback::AutoPlay => self.play(Service::Mpd, path),
                Playback::QueueOnly => {
                    self.remote.emit(Command::ClearQueue);
                    self.remote.emit(Command::AddToQueue {
                        service: Service::Mpd,
                        uri: path,
                    });
                }
            },
            Intent::FailureNotice => self.sound(Sound::ScanFailed),
        }
    }

    fn play(&self, service: Service, uri: String) {
        self.remote.emit(Command::ReplaceAndPlay { service, uri });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::remote::Handle;

    pub(crate) fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<Command>) {
        let (handle, rx) = Handle::channel();
        (Dispatcher::new(&Config::default(), Arc::new(handle)), rx)
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Command>) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn play(service: Service, uri: &str) -> Command {
        Command::ReplaceAndPlay {
            service,
            uri: uri.to_owned(),
        }
    }

    #[test]
    fn classifies_web_streams() {
        assert_eq!(
            Intent::classify("http://x", "mnt/"),
            Intent::WebStream("http://x".into())
        );
        assert_eq!(
            Intent::classify("https://x", "mnt/"),
            Intent::WebStream("https://x".into())
        );
    }

    #[test]
    fn classifies_streaming_service() {
        assert_eq!(
            Intent::classify("spotify:x", "mnt/"),
            Intent::StreamingService("spotify:x".into())
        );
    }

    #[test]
    fn classifies_library_paths() {
        assert_eq!(
            Intent::classify("/a/b", "mnt/"),
            Intent::LibraryPath("mnt/a/b".into())
        );
        assert_eq!(
            Intent::classify("a/b", "mnt/"),
            Intent::LibraryPath("mnt/a/b".into())
        );
        // Only one separator is stripped.
        assert_eq!(
            Intent::classify("//a", "mnt/"),
            Intent::LibraryPath("mnt//a".into())
        );
    }

    #[test]
    fn prefixes_are_case_sensitive() {
        assert_eq!(
            Intent::classify("HTTP://x", "mnt/"),
            Intent::LibraryPath("mnt/HTTP://x".into())
        );
        assert_eq!(
            Intent::classify("Spotify:x", ""),
            Intent::LibraryPath("Spotify:x".into())
        );
    }

    #[test]
    fn dispatches_to_services() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.dispatch(Intent::WebStream("http://radio".into()));
        dispatcher.dispatch(Intent::StreamingService("spotify:album:1".into()));
        dispatcher.dispatch(Intent::LibraryPath("mnt/USB/album".into()));

        assert_eq!(
            drain(&mut rx),
            vec![
                play(Service::WebRadio, "http://radio"),
                play(Service::Spotify, "spotify:album:1"),
                play(Service::Mpd, "mnt/USB/album"),
            ]
        );
    }

    #[test]
    fn queue_only_does_not_play() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.dispatch_with(Intent::LibraryPath("cdda:///".into()), Playback::QueueOnly);

        assert_eq!(
            drain(&mut rx),
            vec![
                Command::ClearQueue,
                Command::AddToQueue {
                    service: Service::Mpd,
                    uri: "cdda:///".into()
                },
            ]
        );
    }

    #[test]
    fn queue_only_is_ignored_for_streams() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.dispatch_with(Intent::WebStream("https://r".into()), Playback::QueueOnly);
        assert_eq!(drain(&mut rx), vec![play(Service::WebRadio, "https://r")]);
    }

    #[test]
    fn failure_notice_only_plays_sound() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.dispatch(Intent::FailureNotice);
        assert_eq!(
            drain(&mut rx),
            vec![play(Service::Mpd, &Config::default().sounds.scan_fail)]
        );
    }

    #[test]
    fn scanning_sound() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.sound(Sound::Scanning);
        assert_eq!(
            drain(&mut rx),
            vec![play(Service::Mpd, "mnt/INTERNAL/qudio/sounds/scanning.mp3")]
        );
    }
}
