//! SurveyLink command-line client
//!
//! - `watch`: print live sensor telemetry in display units
//! - `measure`: run a dual measurement for one project, saving both steps
//!   to the survey API

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use surveylink::measurement::{DualMeasurement, MeasurementCapture, MeasurementError, MeasurementPhase};
use surveylink::store::HttpSensorStore;
use surveylink::telemetry::display::{CameraView, DistanceView, OrientationView};
use surveylink::telemetry::{
    live_channel, run_until, ChannelEvent, ConnectionStatus, LiveChannel, RunOutcome,
    TelemetryMessage,
};
use surveylink::{Result, SurveyConfig, SurveyError};

/// Config file picked up from the working directory
const DEFAULT_CONFIG: &str = "surveylink.toml";

#[derive(Parser)]
#[command(name = "surveylink")]
#[command(version, about = "Sensor telemetry and dual measurements for land surveys")]
struct Args {
    /// Configuration file (default: ./surveylink.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Telemetry endpoint, e.g. tcp://192.168.1.20:8765
    #[arg(short, long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print live telemetry until Ctrl-C
    Watch,

    /// Capture and save a two-step measurement
    Measure {
        /// Survey project id
        #[arg(short, long)]
        project: u64,

        /// Survey API base URL
        #[arg(long)]
        api: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("surveylink=info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.url {
        info!("Using telemetry endpoint: {}", url);
        config.telemetry.url = url;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    info!("SurveyLink v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Watch => watch(&config, &running),
        Commands::Measure { project, api } => {
            if let Some(api) = api {
                config.api.base_url = api;
            }
            measure(&config, project, &running)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SurveyConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            SurveyConfig::load(path)
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Loading configuration from {}", DEFAULT_CONFIG);
            SurveyConfig::load(Path::new(DEFAULT_CONFIG))
        }
        None => {
            info!("Using default configuration");
            Ok(SurveyConfig::default())
        }
    }
}

fn watch(config: &SurveyConfig, running: &AtomicBool) -> Result<()> {
    let mut channel = live_channel(&config.telemetry);
    channel.subscribe(|event| print_event(event));
    channel.connect(&config.telemetry.url)?;

    let outcome = run_until(
        &mut channel,
        running,
        config.telemetry.poll_interval(),
        |_| false,
    );
    finish(outcome, &channel)
}

fn measure(config: &SurveyConfig, project: u64, running: &AtomicBool) -> Result<()> {
    let store = HttpSensorStore::new(&config.api)?;
    info!("Saving to {} (project {})", config.api.base_url, project);

    let capture = Arc::new(Mutex::new(MeasurementCapture::new()));
    let mut channel = live_channel(&config.telemetry);
    {
        let capture = Arc::clone(&capture);
        channel.subscribe(move |event| {
            if let ChannelEvent::Connection(status) = event {
                print_status(status);
            }
            capture.lock().observe(event);
        });
    }
    channel.connect(&config.telemetry.url)?;

    let enter = spawn_enter_reader()?;
    let mut session = DualMeasurement::new(project);

    while !session.is_complete() {
        match session.phase() {
            MeasurementPhase::Initial => {
                println!("Place the device at the start of the span and press Enter")
            }
            _ => println!("Flip the device for the second reading and press Enter"),
        }

        let outcome = run_until(
            &mut channel,
            running,
            config.telemetry.poll_interval(),
            |_| enter.try_recv().is_ok(),
        );
        if !running.load(Ordering::Relaxed) || outcome == RunOutcome::GaveUp {
            return finish(outcome, &channel);
        }

        capture.lock().clear();
        let outcome = run_until(
            &mut channel,
            running,
            config.telemetry.poll_interval(),
            |_| capture.lock().is_complete(),
        );
        let Some(set) = capture.lock().take() else {
            return finish(outcome, &channel);
        };

        print_reading(&TelemetryMessage::Camera(set.camera.clone()));
        print_reading(&TelemetryMessage::Distance(set.distance.clone()));
        print_reading(&TelemetryMessage::Orientation(set.orientation.clone()));

        match session.save(&store, &set) {
            Ok(phase) => println!("Saved: {}", phase),
            Err(e @ MeasurementError::WriteFailed { .. }) if e.is_retryable() => {
                println!("{}", e);
                println!("Server unavailable, repeat this step to retry");
            }
            Err(e) => return Err(e.into()),
        }
    }

    channel.close();
    println!("Dual measurement for project {} complete", project);
    Ok(())
}

/// Deliver a unit for each line read from stdin
fn spawn_enter_reader() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn finish(outcome: RunOutcome, channel: &LiveChannel) -> Result<()> {
    match outcome {
        RunOutcome::Stopped => Ok(()),
        RunOutcome::GaveUp => Err(SurveyError::LinkLost {
            attempts: channel.retry_count(),
        }),
    }
}

fn print_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Connection(status) => print_status(status),
        ChannelEvent::Telemetry(message) => print_reading(message),
        ChannelEvent::Raw(text) => println!("[raw] {}", text),
    }
}

fn print_status(status: &ConnectionStatus) {
    match status {
        ConnectionStatus::Connected => println!("Connected"),
        ConnectionStatus::Disconnected { reason, .. } => println!("Disconnected: {}", reason),
        ConnectionStatus::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => println!(
            "Reconnecting in {:.1}s ({}/{})",
            delay.as_secs_f64(),
            attempt,
            max_attempts
        ),
        ConnectionStatus::PermanentlyDisconnected { attempts } => {
            println!("Connection lost after {} attempts", attempts)
        }
    }
}

fn print_reading(message: &TelemetryMessage) {
    match message {
        TelemetryMessage::Distance(d) => {
            let view = DistanceView::from(d);
            println!(
                "TF-Luna  {:>7.1} cm  signal {}  {:.1}°C",
                view.distance_cm, view.signal, view.temperature_c
            );
        }
        TelemetryMessage::Camera(c) => {
            let view = CameraView::from(c);
            println!(
                "IMX477   {}  brightness {:.0}%  contrast {:.1}",
                view.quality, view.brightness_percent, view.contrast
            );
        }
        TelemetryMessage::Orientation(o) => {
            let view = OrientationView::from(o);
            println!(
                "MPU6050  roll {:+.1}°  pitch {:+.1}°  heading {:.0}°  {}",
                view.roll, view.pitch, view.heading, view.level
            );
        }
        TelemetryMessage::Unknown { sensor, data } => println!("[{}] {}", sensor, data),
    }
}
