use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use hu_raycast::{Preset, RenderMode, SortBy, StandardView, Viewer, ViewerConfig, VolumeLoader};
use log::info;

/// Render a CT volume to PNG.
#[derive(Parser, Debug)]
#[command(name = "hu-raycast", version, about)]
struct Args {
    /// Directory of .dcm files. Without it the synthetic test sphere is used.
    dicom: Option<PathBuf>,

    /// Transfer function preset (ct-bone, ct-soft-tissue, ct-lung, mip)
    #[arg(short, long, default_value = "ct-bone")]
    preset: Preset,

    /// Render mode (vr, mip, minip)
    #[arg(short, long, default_value = "vr")]
    mode: RenderMode,

    /// Standard view (anterior, posterior, left, right, superior, inferior)
    #[arg(long)]
    view: Option<StandardView>,

    #[arg(long, default_value_t = 512)]
    width: u32,

    #[arg(long, default_value_t = 512)]
    height: u32,

    /// Use the software ray caster instead of the GPU
    #[arg(long)]
    cpu: bool,

    /// Autorotate for N frames, saving each one
    #[arg(long, default_value_t = 0)]
    frames: u32,

    #[arg(short, long, default_value = "result.png")]
    output: PathBuf,
}

fn numbered(output: &Path, index: u32) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    output.with_file_name(format!("{stem}_{index:04}.png"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ViewerConfig::default().with_size(args.width, args.height);
    let mut viewer = if args.cpu {
        Viewer::new_cpu(config)?
    } else {
        Viewer::new_gpu(config)
            .await
            .context("failed to create GPU viewer, try --cpu")?
    };

    let report = match &args.dicom {
        Some(dir) => {
            let volume = VolumeLoader::load_from_directory(dir, SortBy::ImagePositionPatient)
                .with_context(|| format!("failed to load DICOM files from {}", dir.display()))?;
            viewer.load_dataset(volume)?
        }
        None => viewer.load_test_volume()?,
    };
    for warning in &report.warnings {
        log::warn!("{warning:?}");
    }
    info!("Sampling: {:?}", report.sampling);

    viewer.apply_preset(args.preset);
    viewer.set_render_mode(args.mode);
    if let Some(view) = args.view {
        viewer.set_standard_view(view);
    }

    if args.frames == 0 {
        fs::write(&args.output, viewer.capture_screenshot()?)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    } else {
        viewer.toggle_animation();
        for index in 0..args.frames {
            viewer.tick();
            let path = numbered(&args.output, index);
            fs::write(&path, viewer.capture_screenshot()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }

    let stats = viewer.stats();
    info!(
        "Rendered {} frames, last in {:?}",
        stats.frames, stats.last_frame_time
    );
    viewer.dispose();
    Ok(())
}
