//! Scan sessions: a card in front of the presence sensor gets its code read.
//!
//! One session per trigger of the presence sensor:
//!
//! 1. play the scanning sound and switch the illumination on
//! 2. start the barcode decoder and wait for one line of output, bounded
//!    by the scan timeout
//! 3. classify the line and dispatch it, or play the failure sound
//! 4. stop the decoder and switch the illumination off
//!
//! Every session has exactly one outcome. The decoder and the illumination
//! are released on every exit path, including cancellation of the session.
//!
//! Before the next session can start the sensor has to clear, so a card
//! left in the slot does not trigger again and again.

use std::{
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStdout, Command},
};

use crate::{
    config::{Config, ScannerConfig},
    error::{Error, Result},
    gpio::{self, Edge, Input, Level, Output},
    intent::{Dispatcher, Intent, Sound},
};

/// Pause after the sensor clears before it is armed again.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Keeps the illumination on while alive.
pub struct Illumination<'a> {
    led: &'a dyn Output,
}

impl<'a> Illumination<'a> {
    pub fn on(led: &'a dyn Output) -> Self {
        if let Err(e) = led.set(Level::High) {
            warn!("error switching illumination on: {e}");
        }
        Self { led }
    }
}

impl Drop for Illumination<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.led.set(Level::Low) {
            error!("error switching illumination off: {e}");
        }
    }
}

/// A running barcode decoder process.
///
/// The process is killed when dropped, so it cannot outlive its session.
pub struct Decoder {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Decoder {
    /// Starts the decoder as `program args... device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    pub fn spawn(config: &ScannerConfig) -> Result<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .arg(&config.device)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        debug!("started {} (pid {:?})", config.program, child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("decoder stdout not captured"))?;

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Reads the first decoded line, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout, when the decoder exits without output, or
    /// when its output cannot be read. Trailing whitespace is stripped.
    pub async fn read_token(&mut self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Some(line.trim_end().to_owned()),
            Ok(Ok(None)) => {
                warn!("decoder exited without output");
                None
            }
            Ok(Err(e)) => {
                warn!("error reading decoder output: {e}");
                None
            }
            Err(_) => {
                warn!("timeout on decoder");
                None
            }
        }
    }

    /// Kills the decoder and reaps it.
    ///
    /// Stopping a decoder that already exited just returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or waited on.
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        self.child.start_kill()?;
        Ok(self.child.wait().await?)
    }
}

/// Runs scan sessions gated by the presence sensor.
pub struct Scanner {
    sensor: Arc<dyn Input>,
    led: Arc<dyn Output>,
    dispatcher: Dispatcher,
    config: ScannerConfig,
    base_directory: String,
}

impl Scanner {
    #[must_use]
    pub fn new(
        config: &Config,
        sensor: Arc<dyn Input>,
        led: Arc<dyn Output>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            sensor,
            led,
            dispatcher,
            config: config.scanner.clone(),
            base_directory: config.library.base_directory.clone(),
        }
    }

    /// Waits for the sensor and scans, forever.
    ///
    /// Sensor read errors are logged and sampling resumes after a back-off.
    pub async fn run(&self) {
        loop {
            info!("waiting for photo sensor");
            if let Err(e) = gpio::wait_for_edge(self.sensor.as_ref(), Edge::Falling).await {
                warn!("error watching photo sensor: {e}");
                tokio::time::sleep(gpio::READ_RETRY_INTERVAL).await;
                continue;
            }

            self.session().await;
            self.rearm().await;
        }
    }

    /// Runs one scan session and returns what it dispatched.
    pub async fn session(&self) -> Intent {
        info!("photo sensor active, activating light and camera");
        self.dispatcher.sound(Sound::Scanning);
        let illumination = Illumination::on(self.led.as_ref());

        let mut decoder = Decoder::spawn(&self.config);
        let token = match &mut decoder {
            Ok(decoder) => decoder.read_token(self.config.timeout()).await,
            Err(e) => {
                error!("could not start {}: {e}", self.config.program);
                None
            }
        };

        let intent = match token {
            Some(token) => {
                info!("scanned code: {token}");
                Intent::classify(&token, &self.base_directory)
            }
            None => Intent::FailureNotice,
        };
        self.dispatcher.dispatch(intent.clone());

        if let Ok(mut decoder) = decoder {
            match decoder.terminate().await {
                Ok(status) => trace!("decoder exited: {status}"),
                Err(e) => error!("error stopping decoder: {e}"),
            }
        }
        drop(illumination);

        intent
    }

    /// Blocks while the sensor is still covered, then lets it settle.
    async fn rearm(&self) {
        match self.sensor.level() {
            Ok(Level::High) => return,
            Ok(Level::Low) => {
                debug!("waiting for photo sensor to clear");
                if let Err(e) = gpio::wait_for_edge(self.sensor.as_ref(), Edge::Rising).await {
                    warn!("error waiting for photo sensor: {e}");
                }
            }
            Err(e) => warn!("error reading photo sensor: {e}"),
        }

        tokio::time::sleep(SETTLE_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::{sync::mpsc, time::Instant};

    use super::*;
    use crate::{
        gpio::fake::{BrokenInput, RecordingOutput, ScriptedInput},
        intent::tests::{dispatcher, drain},
        remote::{Command as RemoteCommand, Service},
    };

    fn shell(script: &str, timeout_ms: u64) -> Config {
        let mut config = Config::default();
        config.scanner = ScannerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            // Becomes `$0` of the script.
            device: "/dev/video0".into(),
            timeout_ms,
        };
        config
    }

    fn scanner(
        config: &Config,
        sensor: Arc<dyn Input>,
    ) -> (Scanner, Arc<RecordingOutput>, mpsc::UnboundedReceiver<RemoteCommand>) {
        let led = Arc::new(RecordingOutput::default());
        let (dispatcher, rx) = dispatcher();
        let scanner = Scanner::new(config, sensor, Arc::clone(&led) as Arc<dyn Output>, dispatcher);
        (scanner, led, rx)
    }

    fn play(service: Service, uri: &str) -> RemoteCommand {
        RemoteCommand::ReplaceAndPlay {
            service,
            uri: uri.to_owned(),
        }
    }

    fn scanning_sound() -> RemoteCommand {
        play(Service::Mpd, &Config::default().sounds.scanning)
    }

    fn fail_sound() -> RemoteCommand {
        play(Service::Mpd, &Config::default().sounds.scan_fail)
    }

    /// Fails the first `failures` reads, then follows `input`.
    struct FlakyInput {
        failures: AtomicUsize,
        input: ScriptedInput,
    }

    impl Input for FlakyInput {
        fn level(&self) -> Result<Level> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::unavailable("sensor busy"));
            }
            self.input.level()
        }
    }

    /// Wraps `script` so that it first records its pid in `dir`. The shell
    /// `exec`s into the decoder, so the pid stays the decoder's.
    fn recording_pid(dir: &tempfile::TempDir, script: &str) -> String {
        format!("echo $$ > {}; {script}", dir.path().join("pid").display())
    }

    /// Asserts the process recorded in `dir` is gone and reaped.
    fn assert_reaped(dir: &tempfile::TempDir) {
        let pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        assert!(
            !std::path::Path::new("/proc").join(pid).exists(),
            "decoder {pid} still running"
        );
    }

    fn idle() -> Arc<dyn Input> {
        Arc::new(ScriptedInput::new(Level::High))
    }

    #[tokio::test]
    async fn decoded_stream_is_played() {
        // Keeps scanning after the first code, like the real decoder.
        let dir = tempfile::tempdir().unwrap();
        let script = recording_pid(&dir, "echo https://radio.example/live; exec sleep 10");
        let config = shell(&script, 4000);
        let (scanner, led, mut rx) = scanner(&config, idle());

        let start = Instant::now();
        let intent = scanner.session().await;

        assert_eq!(intent, Intent::WebStream("https://radio.example/live".into()));
        assert_eq!(
            drain(&mut rx),
            vec![scanning_sound(), play(Service::WebRadio, "https://radio.example/live")]
        );
        assert_eq!(led.levels(), vec![Level::High, Level::Low]);
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_reaped(&dir);
    }

    #[tokio::test]
    async fn decoded_path_is_trimmed_and_prefixed() {
        let config = shell("printf '/USB/Album  \\n'", 4000);
        let (scanner, _, mut rx) = scanner(&config, idle());

        let intent = scanner.session().await;
        assert_eq!(intent, Intent::LibraryPath("mnt/USB/Album".into()));
        assert_eq!(
            drain(&mut rx),
            vec![scanning_sound(), play(Service::Mpd, "mnt/USB/Album")]
        );
    }

    #[tokio::test]
    async fn only_first_line_counts() {
        let config = shell("echo spotify:album:1; echo http://other", 4000);
        let (scanner, _, mut rx) = scanner(&config, idle());

        assert_eq!(
            scanner.session().await,
            Intent::StreamingService("spotify:album:1".into())
        );
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn timeout_plays_failure_sound() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell(&recording_pid(&dir, "exec sleep 10"), 300);
        let (scanner, led, mut rx) = scanner(&config, idle());

        let start = Instant::now();
        let intent = scanner.session().await;

        assert_eq!(intent, Intent::FailureNotice);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(drain(&mut rx), vec![scanning_sound(), fail_sound()]);
        assert_eq!(led.levels(), vec![Level::High, Level::Low]);
        assert_reaped(&dir);
    }

    #[tokio::test]
    async fn missing_decoder_fails_session() {
        let mut config = Config::default();
        config.scanner.program = "/nonexistent/zbarcam".into();
        let (scanner, led, mut rx) = scanner(&config, idle());

        assert_eq!(scanner.session().await, Intent::FailureNotice);
        assert_eq!(drain(&mut rx), vec![scanning_sound(), fail_sound()]);
        assert_eq!(led.levels(), vec![Level::High, Level::Low]);
    }

    #[tokio::test]
    async fn silent_exit_fails_session() {
        let config = shell("exit 3", 4000);
        let (scanner, _, mut rx) = scanner(&config, idle());

        assert_eq!(scanner.session().await, Intent::FailureNotice);
        assert_eq!(drain(&mut rx), vec![scanning_sound(), fail_sound()]);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let config = shell("exec sleep 10", 4000);
        let mut decoder = Decoder::spawn(&config.scanner).unwrap();

        let first = decoder.terminate().await.unwrap();
        assert!(!first.success());
        let second = decoder.terminate().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn terminate_after_exit() {
        let config = shell("exit 0", 4000);
        let mut decoder = Decoder::spawn(&config.scanner).unwrap();
        assert_eq!(decoder.read_token(Duration::from_secs(4)).await, None);

        let status = decoder.terminate().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn cancelled_session_releases_illumination() {
        let config = shell("exec sleep 10", 4000);
        let (scanner, led, _rx) = scanner(&config, idle());

        let result = tokio::time::timeout(Duration::from_millis(200), scanner.session()).await;
        assert!(result.is_err());
        assert_eq!(led.levels(), vec![Level::High, Level::Low]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_waits_for_sensor_to_clear() {
        let sensor = Arc::new(ScriptedInput::new(Level::Low).then(Duration::from_secs(3), Level::High));
        let (scanner, _, _rx) = scanner(&Config::default(), sensor);

        let start = Instant::now();
        scanner.rearm().await;
        assert!(start.elapsed() >= Duration::from_secs(3) + SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_is_immediate_when_clear() {
        let (scanner, _, _rx) = scanner(&Config::default(), idle());

        let start = Instant::now();
        scanner.rearm().await;
        assert!(start.elapsed() < SETTLE_DELAY);
    }

    #[tokio::test]
    async fn prolonged_blockage_scans_once() {
        let sensor = Arc::new(
            ScriptedInput::new(Level::High)
                .then(Duration::from_millis(50), Level::Low)
                .then(Duration::from_millis(1500), Level::High),
        );
        let config = shell("echo spotify:playlist:9", 4000);
        let (scanner, _, mut rx) = scanner(&config, sensor);

        let result = tokio::time::timeout(Duration::from_millis(2000), scanner.run()).await;
        assert!(result.is_err(), "scanner stopped: {result:?}");
        assert_eq!(
            drain(&mut rx),
            vec![scanning_sound(), play(Service::Spotify, "spotify:playlist:9")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_sensor_keeps_loop_alive() {
        let (scanner, led, mut rx) = scanner(&Config::default(), Arc::new(BrokenInput));

        let result = tokio::time::timeout(Duration::from_secs(10), scanner.run()).await;
        assert!(result.is_err(), "scanner stopped");
        assert!(drain(&mut rx).is_empty());
        assert!(led.levels().is_empty());
    }

    #[tokio::test]
    async fn scans_after_sensor_recovers() {
        let sensor = Arc::new(FlakyInput {
            failures: AtomicUsize::new(1),
            input: ScriptedInput::new(Level::High)
                .then(Duration::from_millis(1200), Level::Low)
                .then(Duration::from_millis(1400), Level::High),
        });
        let config = shell("echo spotify:album:7", 4000);
        let (scanner, _, mut rx) = scanner(&config, sensor);

        let result = tokio::time::timeout(Duration::from_secs(3), scanner.run()).await;
        assert!(result.is_err(), "scanner stopped");
        assert_eq!(
            drain(&mut rx),
            vec![scanning_sound(), play(Service::Spotify, "spotify:album:7")]
        );
    }
}
