// vistag command line interface
// Runs the tagging pipeline against a synthetic camera and inspects configuration

mod sim;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sim::{ConsolePreview, SyntheticCamera, SyntheticDetector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vistag_eye::{
    DetectionPipeline, DetectionStateStore, LensFacing, LifecycleOwner, Resolution, SessionBinder,
    VisionConfig,
};

#[derive(Parser)]
#[command(name = "vistag")]
#[command(about = "Live camera object tagging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against a synthetic camera and detector
    Run(RunArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Number of frames the synthetic camera produces
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..=1_000_000))]
    frames: u64,

    /// Synthetic camera frame rate
    #[arg(long, default_value = "15", value_parser = clap::value_parser!(u32).range(1..=240))]
    fps: u32,

    /// Mean detector latency in milliseconds
    #[arg(long, default_value = "150", value_parser = clap::value_parser!(u64).range(0..=60_000))]
    latency_ms: u64,

    /// Fraction of detections that fail (0.0 - 1.0)
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Sensor rotation of the synthetic frames in degrees
    #[arg(long, default_value = "90")]
    rotation: u32,

    /// Analysis resolution, e.g. 1280x720 (overrides the config)
    #[arg(long)]
    resolution: Option<Resolution>,

    /// Camera lens, back or front (overrides the config)
    #[arg(long)]
    lens: Option<LensFacing>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value_t = OutputFormat::Toml)]
        format: OutputFormat,
    },

    /// Check a configuration file
    Validate {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Toml,
    Yaml,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run(args) => {
            run(cli.config.as_deref(), args).await?;
        }
        Commands::Config(cmd) => {
            handle_config_command(cli.config.as_deref(), cmd)?;
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration from `path` (or defaults) with `VISTAG_*` overrides applied
fn load_config(path: Option<&Path>) -> anyhow::Result<VisionConfig> {
    let mut config: VisionConfig = match path {
        Some(path) => vistag_core::config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => VisionConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Run the pipeline until the synthetic camera runs dry or Ctrl-C
async fn run(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    if let Some(lens) = args.lens {
        config.lens_facing = lens;
    }
    config.validate().context("Invalid configuration")?;

    let camera = Arc::new(
        SyntheticCamera::new(args.frames, args.fps)?.with_rotation(args.rotation),
    );
    let detector = Arc::new(SyntheticDetector::new(
        Duration::from_millis(args.latency_ms),
        args.failure_rate,
    )?);

    let store = Arc::new(DetectionStateStore::from_config(&config));
    let pipeline = Arc::new(DetectionPipeline::new(
        detector,
        config.detector.clone(),
        store.spawn_updater(),
    )?);
    let binder = SessionBinder::new(config.clone(), camera.clone(), pipeline.clone())?;
    let preview = Arc::new(ConsolePreview::default());
    let lifecycle = LifecycleOwner::new("vistag-run");

    let mut published = store.subscribe();
    println!("{}", &**published.borrow_and_update());

    let handle = binder.bind(&lifecycle, preview.clone())?;
    lifecycle.start()?;

    let deadline = tokio::time::sleep(run_time(&args));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = published.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = published.borrow_and_update().clone();
                println!("{}", text);
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
        }
    }

    let frame_stats = binder.frame_stats().unwrap_or_default();
    lifecycle.destroy();
    handle.unbind();
    pipeline.wait_idle().await;

    let stats = pipeline.stats();
    info!(
        "Frames: {} acquired, {} delivered, {} dropped, {} released",
        frame_stats.acquired,
        frame_stats.delivered,
        frame_stats.dropped,
        camera.released()
    );
    info!(
        "Detections: {} completed, {} failed, {} skipped; {} preview frames",
        stats.completed,
        stats.failed,
        stats.skipped,
        preview.presented()
    );

    Ok(())
}

/// Time to capture every frame plus room for the slowest detections to land
fn run_time(args: &RunArgs) -> Duration {
    let fps = u64::from(args.fps.max(1));
    let capture = Duration::from_millis(args.frames.saturating_mul(1000) / fps);
    let drain = Duration::from_millis(args.latency_ms.saturating_mul(2).saturating_add(500));
    capture.saturating_add(drain)
}

fn handle_config_command(config_path: Option<&Path>, cmd: ConfigCommands) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show { format } => {
            let config = load_config(config_path)?;
            println!("{}", render_config(&config, format)?);
        }
        ConfigCommands::Validate { path } => {
            validate_file(&path)?;
            println!("{} is valid", path.display());
        }
    }

    Ok(())
}

fn validate_file(path: &Path) -> anyhow::Result<VisionConfig> {
    let config: VisionConfig = vistag_core::config::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    Ok(config)
}

fn render_config(config: &VisionConfig, format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(config)?,
        OutputFormat::Toml => toml::to_string_pretty(config)?,
        OutputFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(rendered)
}
