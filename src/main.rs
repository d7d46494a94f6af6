use anyhow::Result;
use clap::{Parser, Subcommand};
use paxcount::{KeyboardListener, RecordingOptions, SessionConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "paxcount")]
#[command(about = "Multi-camera segmented recording and ROI-gated passenger counting")]
#[command(version)]
struct Args {
    /// Path to camera configuration file
    #[arg(
        short,
        long,
        default_value = "camera_config.yaml",
        help = "Path to YAML camera configuration file"
    )]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting a session")]
    validate_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record time-boxed 60-second segments from every configured camera
    Record {
        /// Frames per second
        #[arg(long, default_value_t = 20.0)]
        fps: f64,

        /// Frame width
        #[arg(long = "frame_width", default_value_t = 1280)]
        frame_width: u32,

        /// Frame height
        #[arg(long = "frame_height", default_value_t = 720)]
        frame_height: u32,

        /// Base path for saving videos
        #[arg(long = "base_path", default_value = "./videos")]
        base_path: PathBuf,
    },

    /// Count people inside each camera's ROI, flushing snapshots every 5 minutes
    Count {
        /// Path to the counts database
        #[arg(long, default_value = "people_counting.db")]
        database: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting paxcount v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SessionConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("No usable camera configuration found: {}", e);
            std::process::exit(1);
        }
    };

    if args.validate_config {
        println!("✓ Configuration is valid ({} camera(s))", config.cameras.len());
        return Ok(());
    }

    let cancel = CancellationToken::new();

    // Ctrl-C requests the same global cancellation as the 'q' key.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received - requesting session shutdown");
                cancel.cancel();
            }
        });
    }

    let keyboard_task = KeyboardListener::new(cancel.clone()).spawn();
    println!("Press 'q' to exit...");

    let result = match args.command {
        Command::Record {
            fps,
            frame_width,
            frame_height,
            base_path,
        } => {
            let options = RecordingOptions {
                fps,
                frame_size: (frame_width, frame_height),
                base_path,
            };
            run_record(config, options, cancel.clone()).await
        }
        Command::Count { database } => run_count(config, database, cancel.clone()).await,
    };

    // Unblock the keyboard listener if the session ended on its own.
    cancel.cancel();
    let _ = keyboard_task.await;

    match result {
        Ok(()) => {
            info!("Session finished");
            Ok(())
        }
        Err(e) => {
            error!("Session failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
async fn run_record(
    config: SessionConfig,
    options: RecordingOptions,
    cancel: CancellationToken,
) -> Result<()> {
    use paxcount::capture::{GstCaptureBackend, GstWriterFactory};
    use paxcount::SessionSupervisor;
    use std::sync::Arc;

    let backend = Arc::new(GstCaptureBackend::new(
        options.frame_size,
        options.fps.round().max(1.0) as u32,
    )?);
    let factory = Arc::new(GstWriterFactory::new()?);
    let supervisor = SessionSupervisor::new(config, backend, cancel);
    supervisor.run_recording(options, factory).await?;
    Ok(())
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
async fn run_record(
    _config: SessionConfig,
    _options: RecordingOptions,
    _cancel: CancellationToken,
) -> Result<()> {
    anyhow::bail!(
        "this build has no capture backend; rebuild with `--features camera` on Linux"
    )
}

async fn run_count(
    _config: SessionConfig,
    database: PathBuf,
    _cancel: CancellationToken,
) -> Result<()> {
    // The detection engine is an external collaborator; no binding ships in
    // this crate. Deployments wire their engine through the library API:
    // SessionSupervisor::run_counting(store, detector_factory).
    anyhow::bail!(
        "no detection engine integration is compiled into this build; \
         run a counting session against {} through the library API with a \
         Detector implementation",
        database.display()
    )
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{fmt, EnvFilter};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("paxcount={}", log_level)));

    fmt()
        .with_env_filter(env_filter)
        .with_target(args.debug)
        .init();
}
