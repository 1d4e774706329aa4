//! splinereg CLI — landmark-guided image registration from the command line.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use splinereg::{
    load_landmarks, pyramid_depth, save_landmarks, CancelToken, FloatImage, LandmarkDocument,
    Quality, Registrar, RegistrationConfig,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "splinereg")]
#[command(about = "Register a source image onto a target image guided by control-point landmarks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine landmarks by registering the source onto the target.
    Register(RegisterArgs),

    /// Warp the source image with an already-refined landmark file.
    Apply(ApplyArgs),

    /// Print a JSON summary of a landmark file.
    Info {
        /// Path to the landmark file.
        #[arg(long)]
        landmarks: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliQuality {
    /// Fewer iterations, nearest-neighbor output, no full-resolution pass.
    Accelerated,
    /// Full iteration budget and cubic-interpolated output.
    Accurate,
}

impl From<CliQuality> for Quality {
    fn from(q: CliQuality) -> Self {
        match q {
            CliQuality::Accelerated => Quality::Accelerated,
            CliQuality::Accurate => Quality::Accurate,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct RegisterArgs {
    /// Image to be aligned (grayscale; color inputs are converted).
    #[arg(long)]
    source: PathBuf,

    /// Reference image.
    #[arg(long)]
    target: PathBuf,

    /// Optional source weight mask; zero pixels are excluded from the error.
    #[arg(long)]
    source_mask: Option<PathBuf>,

    /// Optional target weight mask.
    #[arg(long)]
    target_mask: Option<PathBuf>,

    /// Landmark file providing the warp family and initial points.
    #[arg(long)]
    landmarks: PathBuf,

    /// Where to write the refined landmark file.
    #[arg(long)]
    out: PathBuf,

    /// Optional path for the warped source image (PNG).
    #[arg(long)]
    out_image: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CliQuality::Accurate)]
    quality: CliQuality,
}

#[derive(Debug, Clone, Args)]
struct ApplyArgs {
    /// Image to warp.
    #[arg(long)]
    source: PathBuf,

    /// Refined landmark file.
    #[arg(long)]
    landmarks: PathBuf,

    /// Where to write the warped image (PNG).
    #[arg(long)]
    out: PathBuf,

    /// Output width; defaults to the target size recorded in the file.
    #[arg(long)]
    width: Option<usize>,

    /// Output height; defaults to the target size recorded in the file.
    #[arg(long)]
    height: Option<usize>,

    #[arg(long, value_enum, default_value_t = CliQuality::Accurate)]
    quality: CliQuality,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Register(args) => run_register(&args),
        Commands::Apply(args) => run_apply(&args),
        Commands::Info { landmarks } => run_info(&landmarks),
    }
}

fn load_gray(path: &Path) -> CliResult<FloatImage> {
    let img = image::open(path)?.to_luma8();
    Ok(FloatImage::from_gray8(&img))
}

fn save_gray(path: &Path, img: &FloatImage) -> CliResult<()> {
    let pixels: Vec<u8> = img
        .as_slice()
        .iter()
        .map(|&v| v.clamp(0.0, 255.0).round() as u8)
        .collect();
    let out = image::GrayImage::from_raw(img.width() as u32, img.height() as u32, pixels)
        .ok_or("output buffer size mismatch")?;
    out.save(path)?;
    Ok(())
}

fn run_register(args: &RegisterArgs) -> CliResult<()> {
    let source = load_gray(&args.source)?;
    let target = load_gray(&args.target)?;
    let source_mask = args.source_mask.as_deref().map(load_gray).transpose()?;
    let target_mask = args.target_mask.as_deref().map(load_gray).transpose()?;
    let doc = load_landmarks(&args.landmarks)?;
    tracing::info!(
        "Registering {} ({}x{}) onto {} ({}x{}), {}",
        args.source.display(),
        source.width(),
        source.height(),
        args.target.display(),
        target.width(),
        target.height(),
        doc.landmarks.family.label(),
    );
    let registrar = Registrar::with_config(RegistrationConfig {
        quality: args.quality.into(),
    });
    let source_size = (source.width(), source.height());
    let target_size = (target.width(), target.height());
    let token = CancelToken::new();
    let refined = if let Some(out_image) = &args.out_image {
        let (refined, warped) = registrar.register_resampled(
            source,
            source_mask,
            target,
            target_mask,
            &doc.landmarks,
            &token,
        )?;
        save_gray(out_image, &warped.image)?;
        tracing::info!("Warped image written to {}", out_image.display());
        refined
    } else {
        registrar.register_masked(
            source,
            source_mask,
            target,
            target_mask,
            &doc.landmarks,
            &token,
        )?
    };
    let out_doc = LandmarkDocument {
        landmarks: refined,
        source_size,
        target_size,
    };
    save_landmarks(&args.out, &out_doc)?;
    tracing::info!("Refined landmarks written to {}", args.out.display());
    Ok(())
}

fn run_apply(args: &ApplyArgs) -> CliResult<()> {
    let source = load_gray(&args.source)?;
    let doc = load_landmarks(&args.landmarks)?;
    let width = args.width.unwrap_or(doc.target_size.0);
    let height = args.height.unwrap_or(doc.target_size.1);
    let registrar = Registrar::with_config(RegistrationConfig {
        quality: args.quality.into(),
    });
    let warped = registrar.transform(&source, None, &doc.landmarks, width, height)?;
    save_gray(&args.out, &warped.image)?;
    tracing::info!("Warped image written to {}", args.out.display());
    Ok(())
}

fn run_info(path: &Path) -> CliResult<()> {
    let doc = load_landmarks(path)?;
    let depth = pyramid_depth(
        doc.source_size.0,
        doc.source_size.1,
        doc.target_size.0,
        doc.target_size.1,
    );
    let summary = serde_json::json!({
        "transformation": doc.landmarks.family.label(),
        "landmark_pairs": doc.landmarks.source.len(),
        "source_size": [doc.source_size.0, doc.source_size.1],
        "target_size": [doc.target_size.0, doc.target_size.1],
        "pyramid_depth": depth,
        "source_landmarks": doc.landmarks.source,
        "target_landmarks": doc.landmarks.target,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
