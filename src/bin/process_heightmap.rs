//! Heightmap tile processor: slices a large elevation image into a tileset.
//!
//! Usage: cargo run --release --bin process_heightmap -- [INPUT] [OUTPUT_DIR] [OPTIONS]
//!
//! Options:
//!   --tile-size <PX>   Tile edge in pixels (default: 512)
//!   --overviews <N>    Reduced-resolution levels to write (default: 3)
//!   --jobs <N>         Parallel tile writers (default: all cores)
//!
//! Output structure:
//!   <OUTPUT_DIR>/
//!     tileset.json          # Index: tile grid, value range, overviews
//!     tile_0_0.bin          # Full-resolution tiles
//!     ...
//!     ovr1_tile_0_0.bin     # Half-resolution overview tiles
//!     ...

use std::path::{Path, PathBuf};
use std::time::Instant;

use bathy::elevation::source_image::load_raster;
use bathy::elevation::tileset::{TilesetWriter, DEFAULT_TILE_SIZE};

const DEFAULT_INPUT: &str = "src_assets/World_elevation_map.png";
const DEFAULT_OUTPUT: &str = "assets/terrain/tiles";
const DEFAULT_OVERVIEWS: u32 = 3;

fn main() {
    bathy::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let positional = positional_args(&args);
    let input = PathBuf::from(positional.first().map_or(DEFAULT_INPUT, |s| s.as_str()));
    let output_dir = PathBuf::from(positional.get(1).map_or(DEFAULT_OUTPUT, |s| s.as_str()));
    let tile_size = parse_u32_arg(&args, "--tile-size").unwrap_or(DEFAULT_TILE_SIZE);
    let overviews = parse_u32_arg(&args, "--overviews").unwrap_or(DEFAULT_OVERVIEWS);

    if let Some(jobs) = parse_usize_arg(&args, "--jobs") {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global() {
            log::warn!("Could not limit thread pool to {} jobs: {}", jobs, e);
        }
    }

    println!("=== Bathy Heightmap Tile Processor ===");
    println!("Input:     {}", input.display());
    println!("Output:    {}", output_dir.display());
    println!("Tile size: {} px", tile_size);
    println!("Overviews: {}", overviews);
    println!();

    if !input.exists() {
        eprintln!("Error: input file not found: {}", input.display());
        std::process::exit(1);
    }

    let start = Instant::now();
    println!("Loading source image (this may take a moment)...");
    let raster = match load_raster(&input) {
        Ok(raster) => raster,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };
    println!("  Source image size: {} x {}", raster.width, raster.height);
    let (min_value, max_value) = raster.min_max();
    println!("  Value range: {:.4} to {:.4}", min_value, max_value);

    let index = match TilesetWriter::write(&raster, &output_dir, tile_size, overviews) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("Error: failed to write tileset: {}", e);
            std::process::exit(1);
        }
    };

    let overview_tiles: usize = index.overviews.iter().map(|o| o.tiles.len()).sum();
    println!();
    println!("=== Complete ===");
    println!("Tiles:     {} x {} ({} total)", index.tiles_x, index.tiles_y, index.tiles.len());
    println!("Overviews: {} levels ({} tiles)", index.overviews.len(), overview_tiles);
    println!("Size:      {:.1} MB on disk", dir_size_mb(&output_dir));
    println!("Time:      {:.1}s", start.elapsed().as_secs_f64());
    println!("Metadata:  {}", output_dir.join("tileset.json").display());
}

/// Arguments that are neither flags nor flag values
fn positional_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.clone());
        }
    }
    out
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn dir_size_mb(dir: &Path) -> f64 {
    let bytes: u64 = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0);
    bytes as f64 / (1024.0 * 1024.0)
}
