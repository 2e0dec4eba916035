use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::raster::{Raster, Region, MARKER_UNTOUCHED};

/// Requested raster resolution relative to the content size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Smallest factor that still keeps a touch at least one raster pixel.
    Low,
    Medium,
    High,
    Custom(f32),
}

impl Quality {
    pub fn validate(&self) -> Result<()> {
        if let Quality::Custom(factor) = self {
            if !factor.is_finite() || *factor <= 0.0 || *factor > 1.0 {
                bail!("custom quality factor must be within (0.0, 1.0], got {factor}");
            }
        }
        Ok(())
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::High
    }
}

/// Smallest allowed factor: one raster pixel per touch radius or per content
/// dimension, whichever is smallest.
pub fn minimum_quality(touch_radius_px: u32, content_size: (u32, u32)) -> f32 {
    let smallest = touch_radius_px
        .min(content_size.0)
        .min(content_size.1)
        .max(1);
    1.0 / smallest as f32
}

/// Resolve a requested quality into a factor within `[minimum, 1.0]`.
pub fn constrain_quality(touch_radius_px: u32, requested: Quality, content_size: (u32, u32)) -> f32 {
    let minimum = minimum_quality(touch_radius_px, content_size);
    let factor = match requested {
        Quality::Low => minimum,
        Quality::Medium => 0.5,
        Quality::High => 1.0,
        Quality::Custom(factor) => factor,
    };
    if factor.is_nan() {
        return 1.0;
    }
    factor.clamp(minimum, 1.0)
}

/// Raster dimensions for content scaled by `factor`, preserving aspect ratio.
pub fn raster_size(content_size: (u32, u32), factor: f32) -> (u32, u32) {
    let (width, height) = content_size;
    let scaled_width = width as f32 * factor;
    let aspect = height as f32 / width.max(1) as f32;
    let raster_width = (scaled_width as u32).max(1);
    let raster_height = ((scaled_width * aspect) as u32).max(1);
    (raster_width, raster_height)
}

/// Supplies the raster regions whose average coverage is measured.
pub trait RegionsProvider: Send + Sync {
    fn create_regions(&self, raster_width: u32, raster_height: u32) -> Vec<Region>;
}

/// Measures the whole raster as one region.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullRasterRegions;

impl RegionsProvider for FullRasterRegions {
    fn create_regions(&self, raster_width: u32, raster_height: u32) -> Vec<Region> {
        vec![Region::full(raster_width, raster_height)]
    }
}

impl<F> RegionsProvider for F
where
    F: Fn(u32, u32) -> Vec<Region> + Send + Sync,
{
    fn create_regions(&self, raster_width: u32, raster_height: u32) -> Vec<Region> {
        self(raster_width, raster_height)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoverageCalculator {
    untouched: u8,
}

impl Default for CoverageCalculator {
    fn default() -> Self {
        Self::new(MARKER_UNTOUCHED)
    }
}

impl CoverageCalculator {
    pub const fn new(untouched: u8) -> Self {
        Self { untouched }
    }

    /// Mean touched fraction over `regions`. Regions are clipped to the
    /// raster; an empty clip counts as zero coverage. No regions yields 0.
    pub fn calculate(&self, raster: &Raster, regions: &[Region]) -> f32 {
        if regions.is_empty() {
            return 0.0;
        }

        let (width, height) = raster.dimensions();
        let total: f32 = regions
            .iter()
            .map(|region| match region.clipped_to(width, height) {
                Some(clipped) => fraction(
                    raster.count_not_matching(self.untouched, clipped),
                    clipped.area(),
                ),
                None => 0.0,
            })
            .sum();

        (total / regions.len() as f32).clamp(0.0, 1.0)
    }
}

fn fraction(touched: u64, area: u64) -> f32 {
    if area == 0 {
        return 0.0;
    }
    (touched as f64 / area as f64).clamp(0.0, 1.0) as f32
}
