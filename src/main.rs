use anyhow::{Context, Result};
use backdrop::background::{BackgroundKind, BackgroundSelection};
use backdrop::capture::{CaptureSource, WebcamCapture};
use backdrop::engine;
use backdrop::pipeline::{Pipeline, PipelineConfig, INFERENCE_HEIGHT, INFERENCE_WIDTH};
use backdrop::sink::LoopbackSink;
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Background to composite against
    #[arg(long, value_enum, default_value = "white")]
    background: BackgroundKind,

    /// Image file for `--background file`
    #[arg(long)]
    background_file: Option<PathBuf>,

    /// Path to the matting model (ONNX file)
    /// If not provided, runs in passthrough mode without matting
    #[arg(long)]
    model: Option<String>,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Drop an inference that runs longer than this many milliseconds
    #[arg(long)]
    inference_deadline_ms: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Inference resolution: {}x{}", INFERENCE_WIDTH, INFERENCE_HEIGHT);
    tracing::info!("Target FPS: {}", args.fps);

    let mut capture = WebcamCapture::new(args.input_device, INFERENCE_WIDTH, INFERENCE_HEIGHT)
        .context("Failed to initialize webcam capture")?;

    let sink = LoopbackSink::new(&args.output_device, INFERENCE_WIDTH, INFERENCE_HEIGHT)
        .context("Failed to initialize v4l2loopback output")?;

    let model = match &args.model {
        Some(model_path) => {
            tracing::info!("Loading matting model from {}", model_path);
            let model =
                engine::load_model(model_path).context("Failed to load matting model")?;
            Some(model)
        }
        None => {
            tracing::info!("Running in passthrough mode (no matting model)");
            None
        }
    };
    let passthrough = model.is_none() || args.background == BackgroundKind::Origin;

    let selection = build_selection(&args)?;
    let config = PipelineConfig {
        inference_deadline: args.inference_deadline_ms.map(Duration::from_millis),
    };

    let pipeline = Pipeline::new(model, Box::new(sink), selection, config);
    if passthrough {
        pipeline.set_passthrough();
    }

    run_capture_loop(&mut capture, &pipeline, args.fps)
}

fn build_selection(args: &Args) -> Result<BackgroundSelection> {
    match args.background {
        BackgroundKind::Green => BackgroundSelection::solid("Green", [153, 255, 120]),
        BackgroundKind::Black => BackgroundSelection::solid("Black", [0, 0, 0]),
        BackgroundKind::LakeView => BackgroundSelection::lake_view(),
        BackgroundKind::DimBar => BackgroundSelection::dim_bar(),
        BackgroundKind::File => {
            let path = args
                .background_file
                .as_deref()
                .context("--background file requires --background-file")?;
            BackgroundSelection::from_file(path)
        }
        BackgroundKind::Transparent => {
            // Screen capture comes from a platform collaborator this build
            // does not carry.
            tracing::warn!("no screen capture source available, using White");
            BackgroundSelection::solid("White", [255, 255, 255])
        }
        BackgroundKind::Origin | BackgroundKind::White => {
            BackgroundSelection::solid("White", [255, 255, 255])
        }
    }
}

fn run_capture_loop<C: CaptureSource>(
    capture: &mut C,
    pipeline: &Pipeline,
    target_fps: u32,
) -> Result<()> {
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps as f32);
    let mut frame_count = 0u64;

    tracing::info!("Starting capture loop");
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let frame = capture.capture_frame().context("Failed to capture frame")?;
        pipeline.submit(frame);

        frame_count += 1;
        if frame_count % 30 == 0 {
            let snapshot = pipeline.metrics();
            tracing::info!(
                "Frame {}: submitted={}, dropped={}, drop_rate={:.0}%",
                frame_count,
                snapshot.submitted,
                snapshot.dropped,
                snapshot.drop_rate_percent()
            );
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
