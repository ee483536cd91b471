use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multicam_sync::capture::{LocalSaver, TestPatternSource, Transmitter};
use multicam_sync::commands::{self, RecorderState};
use multicam_sync::config::{load_config_or_default, AppConfig, SinkKind};
use multicam_sync::recorder::{ffmpeg_available, sink_factory};
use multicam_sync::timecode::{spawn_listener, ClockConfig, FrameTagger, ListenerConfig, TimecodeClock};
use multicam_sync::transport::LocalTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "multicam-sync", version, about = "Timecode-synchronized multi-camera recording")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the timecode broadcast and log the current value
    Monitor {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Record synthetic cameras end to end over the in-process transport
    Loopback {
        /// Camera names; defaults to the configured expected cameras
        #[arg(long = "camera", value_name = "NAME")]
        cameras: Vec<String>,

        /// Recording length in seconds
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Override the configured output root
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Capture a synthetic camera and record it on this node, without a receiver
    Save {
        /// Camera name
        #[arg(long, default_value = "CAM_LOCAL")]
        camera: String,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,

        /// Override the configured output root
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    multicam_sync::init_tracing();
    let cli = Cli::parse();
    let config = load_config_or_default(cli.config.as_deref())?;

    tracing::info!("Starting multicam-sync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Monitor { seconds } => monitor(&config, seconds).await,
        Command::Loopback {
            cameras,
            seconds,
            output,
        } => loopback(config, cameras, seconds, output).await,
        Command::Save {
            camera,
            seconds,
            output,
        } => save(config, camera, seconds, output).await,
    }
}

/// Use raw containers when ffmpeg is selected but not installed
fn fall_back_to_raw(config: &mut AppConfig) {
    fall_back_to_raw(&mut config);
}

async fn start_clock(config: &AppConfig) -> Result<(Arc<TimecodeClock>, multicam_sync::timecode::ListenerHandle)> {
    let clock = Arc::new(TimecodeClock::new(ClockConfig::from(&config.timecode)));
    let listener = spawn_listener(clock.clone(), ListenerConfig::from(&config.timecode))
        .await
        .with_context(|| format!("Failed to bind timecode listener on port {}", config.timecode.port))?;
    Ok((clock, listener))
}

async fn monitor(config: &AppConfig, seconds: Option<u64>) -> Result<()> {
    let (clock, listener) = start_clock(config).await?;
    let mut events = clock.subscribe();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                let status = commands::timecode::get_timecode(&clock);
                match (&status.timecode, status.age_ms) {
                    (Some(tc), Some(age)) => tracing::info!(
                        "Timecode {} (age {:.1}ms, synchronized: {})",
                        tc,
                        age,
                        status.synchronized
                    ),
                    _ => tracing::info!("No timecode received yet"),
                }
            }
            Ok(event) = events.recv() => tracing::warn!("Clock event: {:?}", event),
        }
    }

    listener.stop().await;
    tracing::info!("Clock stats: {:?}", clock.stats());
    Ok(())
}

async fn loopback(mut config: AppConfig, cameras: Vec<String>, seconds: u64, output: Option<PathBuf>) -> Result<()> {
    if let Some(output) = output {
        config.recorder.output_root = output;
    }
    let cameras = if cameras.is_empty() {
        config.receiver.cameras.clone()
    } else {
        cameras
    };
    if cameras.is_empty() {
        anyhow::bail!("no cameras given; pass --camera or list receiver.cameras in the config");
    }

    fall_back_to_raw(&mut config);

    let (clock, listener) = start_clock(&config).await?;
    let transport = LocalTransport::new();
    let state = RecorderState::new(Arc::new(transport.clone()), &config.receiver, &config.recorder);
    commands::recording::register_expected_cameras(&state, cameras.clone());

    let mut transmitters = Vec::new();
    for name in &cameras {
        let source = TestPatternSource::new(
            name.clone(),
            config.recorder.width,
            config.recorder.height,
            config.transmitter.fps,
        );
        let tagger = Arc::new(FrameTagger::new(name.as_str().into(), clock.clone()));
        let publisher = Arc::new(transport.publish(name.as_str()));
        transmitters.push(Transmitter::spawn(
            Box::new(source),
            tagger,
            publisher,
            config.transmitter.queue_depth,
        ));
    }

    let report = commands::recording::wait_for_sources(&state).await;
    if !report.is_complete() {
        tracing::warn!("Cameras not ready: {:?}", report.timed_out);
    }

    let session = commands::recording::start_recording(&state).await?;
    tracing::info!("Recording {} for {}s", session.directory.display(), seconds);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    let status = commands::recording::get_status(&state);
    println!("{}", serde_json::to_string_pretty(&status)?);

    let result = commands::recording::stop_recording(&state).await?;
    for transmitter in transmitters {
        let stats = transmitter.stop().await;
        tracing::debug!("{:?}", stats);
    }
    commands::recording::shutdown(&state).await?;
    listener.stop().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn save(mut config: AppConfig, camera: String, seconds: Option<u64>, output: Option<PathBuf>) -> Result<()> {
    if let Some(output) = output {
        config.recorder.output_root = output;
    }
    fall_back_to_raw(&mut config);

    let (clock, listener) = start_clock(&config).await?;
    let factory = sink_factory(&config.recorder);
    let saver = Arc::new(LocalSaver::create(
        factory.as_ref(),
        camera.as_str().into(),
        &config.recorder.output_root,
    )?);
    tracing::info!("Saving {} to {}", camera, saver.session().directory.display());

    let source = TestPatternSource::new(
        camera.clone(),
        config.recorder.width,
        config.recorder.height,
        config.transmitter.fps,
    );
    let tagger = Arc::new(FrameTagger::new(camera.as_str().into(), clock.clone()));
    let transmitter = Transmitter::spawn(Box::new(source), tagger, saver.clone(), config.transmitter.queue_depth);

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = deadline => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    let stats = transmitter.stop().await;
    let result = tokio::task::spawn_blocking(move || saver.close()).await?;
    listener.stop().await;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
