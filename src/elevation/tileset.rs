//! On-disk tileset format
//!
//! A tileset directory holds `tileset.json` plus one binary file per tile.
//! Tile files are a little-endian `u16 width, u16 height` header followed by
//! `width * height` little-endian `u16` samples, row-major, normalized over
//! the global min/max of the source raster. Overview levels are tiled the
//! same way at half, quarter, ... resolution.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::config::{ElevationRange, EVEREST_HEIGHT, MARIANA_DEPTH};
use crate::core::error::Error;
use crate::core::types::Result;

/// Current tileset format version
pub const TILESET_VERSION: u32 = 1;

/// Index file name inside a tileset directory
pub const INDEX_FILENAME: &str = "tileset.json";

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// One tile of a level, keyed `"{tx}_{ty}"` in the index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileEntry {
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub src_x: u32,
    pub src_y: u32,
}

/// A precomputed reduced-resolution level (`level` k is `1 / 2^k` scale)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverviewEntry {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tiles: BTreeMap<String, TileEntry>,
}

/// Contents of `tileset.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TilesetIndex {
    pub version: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub tile_size: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub min_value: f32,
    pub max_value: f32,
    pub mariana_depth: f32,
    pub everest_height: f32,
    pub tiles: BTreeMap<String, TileEntry>,
    #[serde(default)]
    pub overviews: Vec<OverviewEntry>,
}

impl TilesetIndex {
    pub fn tile_key(tx: u32, ty: u32) -> String {
        format!("{}_{}", tx, ty)
    }

    /// Vertical range the normalized samples map onto
    pub fn elevation_range(&self) -> ElevationRange {
        ElevationRange::new(self.mariana_depth, self.everest_height)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(dir.join(INDEX_FILENAME))?;
        let index: Self = serde_json::from_str(&json)?;
        if index.version != TILESET_VERSION {
            return Err(Error::DataUnavailable(format!(
                "unsupported tileset version {} in {}",
                index.version,
                dir.display()
            )));
        }
        if index.tile_size == 0 || index.source_width == 0 || index.source_height == 0 {
            return Err(Error::DataUnavailable(format!("empty tileset in {}", dir.display())));
        }
        Ok(index)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(INDEX_FILENAME), json)?;
        Ok(())
    }
}

/// Decoded tile samples
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationTile {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<u16>,
}

impl ElevationTile {
    /// Normalized sample at tile-local pixel coordinates
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.samples[(y * self.width + x) as usize] as f32 / u16::MAX as f32
    }

    pub fn memory_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<u16>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.samples.len() * 2);
        bytes.extend_from_slice(&(self.width as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.height as u16).to_le_bytes());
        for s in &self.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::DataUnavailable("tile shorter than its header".to_string()));
        }
        let width = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
        let height = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
        let expected = 4 + (width * height) as usize * 2;
        if bytes.len() != expected {
            return Err(Error::DataUnavailable(format!(
                "tile {}x{} should be {} bytes, found {}",
                width,
                height,
                expected,
                bytes.len()
            )));
        }
        let samples = bytes[4..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            width,
            height,
            samples,
        })
    }
}

pub fn read_tile(path: &Path) -> Result<ElevationTile> {
    let bytes = std::fs::read(path)?;
    ElevationTile::decode(&bytes)
        .map_err(|e| Error::DataUnavailable(format!("{}: {}", path.display(), e)))
}

pub fn write_tile(path: &Path, tile: &ElevationTile) -> Result<()> {
    std::fs::write(path, tile.encode())?;
    Ok(())
}

/// Single-channel raster of raw elevation values
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
}

impl Raster {
    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> Result<Self> {
        if samples.len() != (width * height) as usize {
            return Err(Error::DataUnavailable(format!(
                "raster {}x{} needs {} samples, got {}",
                width,
                height,
                width * height,
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.samples[(y * self.width + x) as usize]
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Same raster rescaled so `min..max` becomes `0..1`
    pub fn normalized(&self) -> Raster {
        let (min, max) = self.min_max();
        let range = if max > min { max - min } else { 1.0 };
        Raster {
            width: self.width,
            height: self.height,
            samples: self.samples.iter().map(|v| (v - min) / range).collect(),
        }
    }

    /// 2x2 box-filtered half-resolution raster (odd edges average what exists)
    pub fn downsample(&self) -> Raster {
        let width = self.width.div_ceil(2).max(1);
        let height = self.height.div_ceil(2).max(1);
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let mut sum = 0.0;
                let mut count = 0.0;
                for (sx, sy) in [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)] {
                    if sx < self.width && sy < self.height {
                        sum += self.get(sx, sy);
                        count += 1.0;
                    }
                }
                samples.push(sum / count);
            }
        }
        Raster {
            width,
            height,
            samples,
        }
    }
}

/// Slices rasters into tilesets
pub struct TilesetWriter;

impl TilesetWriter {
    /// Write `raster` as a tileset in `dir` with `overview_levels` reduced levels.
    pub fn write(raster: &Raster, dir: &Path, tile_size: u32, overview_levels: u32) -> Result<TilesetIndex> {
        if tile_size == 0 || tile_size > u16::MAX as u32 {
            return Err(Error::InvalidConfiguration(format!("tile size {} out of range", tile_size)));
        }
        std::fs::create_dir_all(dir)?;

        let (min_value, max_value) = raster.min_max();
        let normalized = raster.normalized();
        log::info!(
            "Writing {}x{} raster as {}px tiles (values {:.4}..{:.4})",
            raster.width,
            raster.height,
            tile_size,
            min_value,
            max_value
        );

        let (tiles_x, tiles_y, tiles) = write_level(&normalized, dir, tile_size, "tile")?;

        let mut overviews = Vec::new();
        let mut level_raster = normalized;
        for level in 1..=overview_levels {
            level_raster = level_raster.downsample();
            let prefix = format!("ovr{}_tile", level);
            let (ox, oy, otiles) = write_level(&level_raster, dir, tile_size, &prefix)?;
            log::info!("Overview {} is {}x{}", level, level_raster.width, level_raster.height);
            overviews.push(OverviewEntry {
                level,
                width: level_raster.width,
                height: level_raster.height,
                tiles_x: ox,
                tiles_y: oy,
                tiles: otiles,
            });
            if level_raster.width == 1 && level_raster.height == 1 {
                break;
            }
        }

        let index = TilesetIndex {
            version: TILESET_VERSION,
            source_width: raster.width,
            source_height: raster.height,
            tile_size,
            tiles_x,
            tiles_y,
            min_value,
            max_value,
            mariana_depth: MARIANA_DEPTH,
            everest_height: EVEREST_HEIGHT,
            tiles,
            overviews,
        };
        index.save(dir)?;
        Ok(index)
    }
}

/// Write every tile of one level in parallel. `raster` is already normalized.
fn write_level(
    raster: &Raster,
    dir: &Path,
    tile_size: u32,
    prefix: &str,
) -> Result<(u32, u32, BTreeMap<String, TileEntry>)> {
    let tiles_x = raster.width.div_ceil(tile_size);
    let tiles_y = raster.height.div_ceil(tile_size);
    let coords: Vec<(u32, u32)> = (0..tiles_y)
        .flat_map(|ty| (0..tiles_x).map(move |tx| (tx, ty)))
        .collect();

    let entries: Vec<Result<(String, TileEntry)>> = coords
        .par_iter()
        .map(|&(tx, ty)| {
            let src_x = tx * tile_size;
            let src_y = ty * tile_size;
            let width = tile_size.min(raster.width - src_x);
            let height = tile_size.min(raster.height - src_y);

            let mut samples = Vec::with_capacity((width * height) as usize);
            for y in 0..height {
                for x in 0..width {
                    let v = raster.get(src_x + x, src_y + y).clamp(0.0, 1.0);
                    samples.push((v * u16::MAX as f32) as u16);
                }
            }

            let key = TilesetIndex::tile_key(tx, ty);
            let file = format!("{}_{}.bin", prefix, key);
            write_tile(&dir.join(&file), &ElevationTile { width, height, samples })?;
            Ok((key, TileEntry { file, width, height, src_x, src_y }))
        })
        .collect();

    let mut tiles = BTreeMap::new();
    for entry in entries {
        let (key, tile) = entry?;
        tiles.insert(key, tile);
    }
    Ok((tiles_x, tiles_y, tiles))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Raster {
        let samples = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x + y) as f32))
            .collect();
        Raster::new(width, height, samples).unwrap()
    }

    #[test]
    fn test_tile_encode_decode() {
        let tile = ElevationTile {
            width: 3,
            height: 2,
            samples: vec![0, 1, 2, 65535, 4, 5],
        };
        let bytes = tile.encode();
        assert_eq!(&bytes[..4], &[3, 0, 2, 0]);
        assert_eq!(ElevationTile::decode(&bytes).unwrap(), tile);
        assert_eq!(tile.get(0, 1), 1.0);
    }

    #[test]
    fn test_truncated_tile_rejected() {
        let mut bytes = ElevationTile {
            width: 2,
            height: 2,
            samples: vec![1, 2, 3, 4],
        }
        .encode();
        bytes.pop();
        assert!(ElevationTile::decode(&bytes).is_err());
        assert!(ElevationTile::decode(&[1]).is_err());
    }

    #[test]
    fn test_downsample_box_filter() {
        let raster = Raster::new(3, 2, vec![0.0, 2.0, 4.0, 2.0, 4.0, 6.0]).unwrap();
        let half = raster.downsample();
        assert_eq!((half.width, half.height), (2, 1));
        assert_eq!(half.samples, vec![2.0, 5.0]);
    }

    #[test]
    fn test_write_tileset_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raster = gradient(10, 6);
        let index = TilesetWriter::write(&raster, dir.path(), 4, 2).unwrap();

        assert_eq!((index.tiles_x, index.tiles_y), (3, 2));
        assert_eq!(index.tiles.len(), 6);
        assert_eq!(index.min_value, 0.0);
        assert_eq!(index.max_value, 14.0);

        let edge = &index.tiles["2_1"];
        assert_eq!((edge.width, edge.height, edge.src_x, edge.src_y), (2, 2, 8, 4));
        assert_eq!(edge.file, "tile_2_1.bin");

        assert_eq!(index.overviews.len(), 2);
        assert_eq!((index.overviews[0].width, index.overviews[0].height), (5, 3));
        assert_eq!((index.overviews[1].width, index.overviews[1].height), (3, 2));

        let loaded = TilesetIndex::load(dir.path()).unwrap();
        assert_eq!(loaded, index);

        let corner = read_tile(&dir.path().join(&index.tiles["0_0"].file)).unwrap();
        assert_eq!(corner.samples[0], 0);
        let last = read_tile(&dir.path().join(&edge.file)).unwrap();
        assert_eq!(*last.samples.last().unwrap(), u16::MAX);
    }

    #[test]
    fn test_index_json_field_names() {
        let dir = tempfile::tempdir().unwrap();
        TilesetWriter::write(&gradient(4, 4), dir.path(), 4, 0).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(INDEX_FILENAME)).unwrap()).unwrap();
        assert_eq!(json["mariana_depth"], -10994.0);
        assert_eq!(json["everest_height"], 8849.0);
        assert_eq!(json["tiles"]["0_0"]["file"], "tile_0_0.bin");
    }

    #[test]
    fn test_index_without_overviews_parses() {
        let json = r#"{
            "version": 1, "source_width": 2, "source_height": 2, "tile_size": 512,
            "tiles_x": 1, "tiles_y": 1, "min_value": 0.0, "max_value": 1.0,
            "mariana_depth": -10994.0, "everest_height": 8849.0,
            "tiles": { "0_0": { "file": "tile_0_0.bin", "width": 2, "height": 2, "src_x": 0, "src_y": 0 } }
        }"#;
        let index: TilesetIndex = serde_json::from_str(json).unwrap();
        assert!(index.overviews.is_empty());
        assert_eq!(index.elevation_range(), ElevationRange::planetary());
    }
}
