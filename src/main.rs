use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};

use qudio::{
    button::{Button, Classifier, Inputs},
    config::Config,
    gpio::{Input, Level, Output, SysfsPin},
    intent::Dispatcher,
    remote,
    scan::Scanner,
    signal,
    state::PlaybackState,
    tray::{CdromProbe, TrayProbe, TrayWatcher},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Group name for mutually exclusive hardware tests.
const ARGS_GROUP_TEST: &str = "test";

/// Sampling period of the button test.
const BUTTON_TEST_INTERVAL: Duration = Duration::from_millis(250);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Settings missing from the file, or all settings when no file is
    /// given, take their defaults for the reference hardware.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "QUDIO_CONFIG")]
    config: Option<String>,

    /// Log which buttons are held until interrupted
    #[arg(long, default_value_t = false, group = ARGS_GROUP_TEST)]
    test_buttons: bool,

    /// Log the disc tray status and exit
    #[arg(long, default_value_t = false, group = ARGS_GROUP_TEST)]
    test_tray: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
        logger.filter_module("qudio", level);
    }

    logger.init();
}

/// Loads the configuration file, or the defaults when none is given.
fn load_config(path: Option<&str>) -> qudio::error::Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path);
            if let Err(ref e) = config {
                if e.kind == qudio::error::ErrorKind::NotFound {
                    info!("copy qudio.toml.example to {path} to get started");
                }
            }
            config
        }
        None => {
            info!("no configuration file given, using defaults");
            Ok(Config::default())
        }
    }
}

/// Opens the three button inputs.
fn button_inputs(config: &Config) -> qudio::error::Result<Inputs> {
    let root = &config.gpio.root;
    Ok(Inputs {
        previous: Arc::new(SysfsPin::input(root, config.pins.prev)?),
        play_pause: Arc::new(SysfsPin::input(root, config.pins.play)?),
        next: Arc::new(SysfsPin::input(root, config.pins.next)?),
    })
}

/// Logs held buttons until interrupted.
async fn test_buttons(config: &Config) -> Result<(), Box<dyn Error>> {
    let inputs = button_inputs(config)?;
    info!("start button test - end with Ctrl-C");

    let mut interval = tokio::time::interval(BUTTON_TEST_INTERVAL);
    let mut signals = signal::Handler::new()?;

    loop {
        tokio::select! {
            _ = signals.recv() => break Ok(()),
            _ = interval.tick() => {
                for (number, button) in Button::ALL.into_iter().enumerate() {
                    if inputs.get(button).level()? == Level::Low {
                        info!("Button {} ({})", number + 1, button.to_string().to_uppercase());
                    }
                }
            }
        }
    }
}

/// Main application loop.
///
/// Runs the button watchers and the tray watcher in the background, the
/// scan loop in the foreground, and keeps the connection to the playback
/// service alive until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error when the hardware cannot be set up.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(args.config.as_deref())?;
    debug!("{config:#?}");

    if args.test_buttons {
        return test_buttons(&config).await;
    }

    if args.test_tray {
        let probe = CdromProbe::new(&config.tray.device);
        info!("{}: {}", config.tray.device, probe.status());
        return Ok(());
    }

    let root = &config.gpio.root;
    let sensor = Arc::new(SysfsPin::input(root, config.pins.sensor)?);
    let led = Arc::new(SysfsPin::output(root, config.pins.led)?);
    let inputs = button_inputs(&config)?;

    let state = PlaybackState::new();
    let (mut client, handle) = remote::Client::new(&config.remote, state.clone())?;
    let dispatcher = Dispatcher::new(&config, Arc::new(handle));

    let classifier = Classifier::new(inputs, dispatcher.clone(), state);
    let mut tasks = classifier.watch(config.gpio.debounce());

    if config.tray.enabled {
        let probe: Arc<dyn TrayProbe> = Arc::new(CdromProbe::new(&config.tray.device));
        let watcher = TrayWatcher::new(probe, dispatcher.clone(), &config.tray.token);
        tasks.push(tokio::spawn(watcher.run()));
    }

    let scanner = Scanner::new(&config, sensor, Arc::clone(&led) as Arc<dyn Output>, dispatcher);
    let mut scan_loop = Box::pin(scanner.run());

    let mut signals = signal::Handler::new()?;

    // Reconnect after sleeping some duration so that a playback service that
    // is still starting up is not hammered. The initial connection happens
    // immediately.
    let restart_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(restart_timer);

    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                info!("received {signal}, shutting down gracefully");
                break Ok(());
            }

            () = &mut scan_loop => break Ok(()),

            result = client.start(), if restart_timer.is_elapsed() => {
                if let Err(e) = result {
                    error!("{e}");
                }

                // Jitter spreads out reconnects of several players that lost
                // the service at the same time.
                let duration = Duration::from_millis(fastrand::u64(5_000..6_000));
                info!("reconnecting in {:.1}s", duration.as_secs_f32());
                restart_timer.as_mut().reset(tokio::time::Instant::now() + duration);
            }

            () = &mut restart_timer, if !restart_timer.is_elapsed() => {}
        }
    };

    // Dropping an in-flight scan session kills its decoder.
    drop(scan_loop);
    for task in tasks {
        task.abort();
    }
    client.stop().await;

    if let Err(e) = led.set(Level::Low) {
        error!("error switching illumination off: {e}");
    }

    result
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
