use std::path::PathBuf;
use std::process;

use clap::Parser;
use dicom_mpr::{DicomFileLoader, Interpolation, MprConfig, MprEngine, Orientation, Result};
use log::{error, info, warn};

/// Reconstruct a slice from a directory of DICOM files
#[derive(Parser, Debug)]
#[command(name = "dicom-mpr")]
#[command(version)]
struct Cli {
    /// Directory containing the DICOM series
    #[arg(value_name = "DIRECTORY")]
    directory: PathBuf,

    /// Slice orientation: axial, sagittal or coronal
    #[arg(short, long, default_value = "axial")]
    orientation: Orientation,

    /// Slice position along the orientation axis, 0.0 to 1.0
    #[arg(short, long, default_value_t = 0.5)]
    position: f32,

    /// Output PNG file
    #[arg(short = 'O', long, default_value = "slice.png")]
    output: PathBuf,

    /// Images loaded concurrently per batch
    #[arg(long, default_value_t = dicom_mpr::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Use nearest-neighbour instead of trilinear sampling
    #[arg(long)]
    nearest: bool,

    /// Print volume diagnostics after building
    #[arg(short, long)]
    diagnostics: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if !cli.directory.is_dir() {
        eprintln!("Error: {} is not a directory", cli.directory.display());
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Processing directory: {}", cli.directory.display());
    let paths = DicomFileLoader::collect_from_directory(&cli.directory)?;
    info!("Found {} DICOM files", paths.len());

    let interpolation = if cli.nearest {
        Interpolation::Nearest
    } else {
        Interpolation::Trilinear
    };
    let config = MprConfig::default()
        .with_batch_size(cli.batch_size)
        .with_interpolation(interpolation);
    let engine = MprEngine::with_config(DicomFileLoader, config);

    let volume_info = engine.build_volume(&paths).await?;
    let d = volume_info.dimensions;
    info!(
        "Volume {}x{}x{} from {}/{} images",
        d.width, d.height, d.depth, volume_info.slice_count, volume_info.requested
    );

    if cli.diagnostics {
        print!("{}", engine.diagnostics());
    }

    let slice = engine.extract_slice(cli.orientation, cli.position)?;
    if slice.is_fallback() {
        warn!("{} reconstruction failed, writing placeholder image", cli.orientation);
    }

    match slice.to_image() {
        Some(image) => {
            image.save(&cli.output)?;
            println!(
                "Wrote {} slice {} ({}x{}, spacing {:.3} x {:.3}) to {}",
                slice.orientation,
                slice.plane_index,
                slice.width,
                slice.height,
                slice.pixel_spacing.column,
                slice.pixel_spacing.row,
                cli.output.display()
            );
        }
        None => warn!("Slice has no pixels, nothing written"),
    }
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}
