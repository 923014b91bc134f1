// Smooth a gradient colormap: row Y becomes row 0 blurred with a 4Y+1 Gaussian.
// Run with: cargo run --release --bin filter_colormap -- <input> [output]

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use glint_core::colormap::filter_colormap;
use glint_core::texture::{load_image, save_image};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input> [output]", args[0]);
        std::process::exit(1);
    }

    let input = PathBuf::from(&args[1]);
    // Default output sits next to the input: name_filtered.ext
    let output = match args.get(2) {
        Some(path) => PathBuf::from(path),
        None => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "colormap".to_string());
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_else(|| "png".to_string());
            input.with_file_name(format!("{}_filtered.{}", stem, ext))
        }
    };

    let mut image = load_image(&input)?;
    log::info!(
        "Filtering {} ({}x{}, {} channels)",
        input.display(),
        image.width,
        image.height,
        image.channels
    );

    filter_colormap(&mut image)?;
    save_image(&image, &output).with_context(|| format!("Saving {}", output.display()))?;

    log::info!("Wrote {}", output.display());
    Ok(())
}
