use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecount::camera::ImageSequence;
use framecount::{
    AppConfig, ClassifierLoader, ClassifierState, CoinDetector, FaceDetector, FrameDetector,
    PipelineController, SensorFacing, StatusSink,
};

#[derive(Parser)]
#[command(name = "framecount")]
#[command(about = "Count coins or faces in a stream of camera frames")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Detect coins and report the total value per frame
    Coins(FrameArgs),

    /// Detect faces with a Haar cascade, fetched on first use
    Faces {
        #[command(flatten)]
        frames: FrameArgs,

        /// Block until the classifier is loaded (or failed) before the first frame
        #[arg(long)]
        wait_for_classifier: bool,
    },
}

#[derive(Args)]
struct FrameArgs {
    /// Frame images, or directories of them (replayed in name order)
    #[arg(value_name = "FRAMES", required = true)]
    inputs: Vec<PathBuf>,

    /// Which way the sensor faces [default: back for coins, front for faces]
    #[arg(long, value_enum)]
    facing: Option<Facing>,

    /// Write annotated frames to this directory
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Facing {
    Front,
    Back,
}

impl From<Facing> for SensorFacing {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::Front => SensorFacing::Front,
            Facing::Back => SensorFacing::Back,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // Presentation context: prints each distinct status line.
    let (status_tx, mut status_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let presenter = tokio::spawn(async move {
        let mut last: Option<String> = None;
        while let Some(text) = status_rx.recv().await {
            if last.as_deref() != Some(text.as_str()) {
                println!("{}", text);
                last = Some(text);
            }
        }
    });
    let status: Arc<dyn StatusSink> = Arc::new(status_tx);

    match cli.mode {
        Mode::Coins(args) => {
            let detector = CoinDetector::from_config(&config);
            let facing = args.facing.map(Into::into).unwrap_or(SensorFacing::Back);
            run_frames(detector, facing, Arc::clone(&status), args).await?;
        }
        Mode::Faces {
            frames,
            wait_for_classifier,
        } => {
            let loader = ClassifierLoader::new(config.loader.clone()).with_status(Arc::clone(&status));
            let mut slot = loader.slot();
            // Runs independently; a fetch in flight is bounded by its timeouts.
            let _loader_thread = loader.spawn().context("Failed to start classifier loader")?;

            if wait_for_classifier {
                match slot.wait_settled().await {
                    ClassifierState::Ready(_) => info!("Classifier ready"),
                    other => warn!("Continuing without classifier ({:?})", other.phase()),
                }
            }

            let detector = FaceDetector::new(slot, config.cascade.clone());
            let facing = frames.facing.map(Into::into).unwrap_or(SensorFacing::Front);
            run_frames(detector, facing, Arc::clone(&status), frames).await?;
        }
    }

    drop(status);
    presenter.await?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Frame delivery runs on a blocking thread, one frame at a time.
async fn run_frames<D>(detector: D, facing: SensorFacing, status: Arc<dyn StatusSink>, args: FrameArgs) -> Result<()>
where
    D: FrameDetector + 'static,
{
    tokio::task::spawn_blocking(move || replay(detector, facing, status, args)).await?
}

fn replay<D: FrameDetector>(detector: D, facing: SensorFacing, status: Arc<dyn StatusSink>, args: FrameArgs) -> Result<()> {
    let frames = ImageSequence::from_paths(&args.inputs)?;
    let Some((width, height)) = frames.first_dimensions()? else {
        bail!("No frames found");
    };
    info!("Replaying {} frames ({}x{})", frames.len(), width, height);

    let mut controller = PipelineController::new(detector, facing, status);
    if let Some(dir) = args.debug_out {
        controller = controller.with_debug(dir)?;
    }
    if let Some(out) = &args.output {
        std::fs::create_dir_all(out).with_context(|| format!("Failed to create {:?}", out))?;
    }

    controller.start(width, height)?;
    for item in frames {
        let (path, frame) = item?;
        let output = controller.process_frame(&frame)?;
        info!("{}: {}", path.display(), output.summary.status_text());

        if let Some(out) = &args.output {
            let name = path
                .file_stem()
                .map(|s| format!("{}.png", s.to_string_lossy()))
                .unwrap_or_else(|| "frame.png".to_string());
            let dest = out.join(name);
            output
                .frame
                .save(&dest)
                .with_context(|| format!("Failed to save annotated frame {:?}", dest))?;
        }
    }
    controller.stop();

    Ok(())
}
