use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma};
use std::path::Path;

use super::strokes::{Point, StrokePaint, StrokeTarget};

/// Marker of pixels no stroke has touched.
pub const MARKER_UNTOUCHED: u8 = 0xFF;
/// Marker painted by strokes.
pub const MARKER_ERASED: u8 = 0x00;

/// Axis-aligned pixel rectangle in raster coordinates, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Region {
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Intersection with a `width`x`height` raster, or `None` when empty.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<Region> {
        let clipped = Region::new(
            self.left.min(width),
            self.top.min(height),
            self.right.min(width),
            self.bottom.min(height),
        );
        (clipped.area() > 0).then_some(clipped)
    }
}

/// Offscreen single-channel mask strokes are rendered into.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    image: GrayImage,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("raster dimensions must be non-zero, got {width}x{height}");
        }
        Ok(Self {
            image: GrayImage::from_pixel(width, height, Luma([MARKER_UNTOUCHED])),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        (x < self.width() && y < self.height()).then(|| self.image.get_pixel(x, y).0[0])
    }

    pub fn is_erased(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y)
            .map_or(false, |value| value != MARKER_UNTOUCHED)
    }

    /// Pixels inside `region` whose value differs from `marker`. The region
    /// must already be clipped to the raster.
    pub fn count_not_matching(&self, marker: u8, region: Region) -> u64 {
        let mut count = 0;
        for y in region.top..region.bottom {
            for x in region.left..region.right {
                if self.image.get_pixel(x, y).0[0] != marker {
                    count += 1;
                }
            }
        }
        count
    }

    pub fn fill(&mut self, marker: u8) {
        for pixel in self.image.pixels_mut() {
            *pixel = Luma([marker]);
        }
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write raster png {}", path.display()))
    }

    /// Paint every pixel whose center lies within `radius` of segment a-b.
    fn draw_segment_capsule(&mut self, a: Point, b: Point, radius: f32, marker: u8) {
        if radius <= 0.0 {
            return;
        }

        let width = self.width() as f32;
        let height = self.height() as f32;
        let min_x = (a.x.min(b.x) - radius).floor().clamp(0.0, width) as u32;
        let max_x = (a.x.max(b.x) + radius).ceil().clamp(0.0, width) as u32;
        let min_y = (a.y.min(b.y) - radius).floor().clamp(0.0, height) as u32;
        let max_y = (a.y.max(b.y) + radius).ceil().clamp(0.0, height) as u32;
        let radius_sq = radius * radius;

        for y in min_y..max_y {
            for x in min_x..max_x {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                if point_segment_distance_sq(center, a, b) <= radius_sq {
                    self.image.put_pixel(x, y, Luma([marker]));
                }
            }
        }
    }
}

impl StrokeTarget for Raster {
    fn draw_polyline(&mut self, points: &[Point], paint: &StrokePaint) {
        let radius = paint.width / 2.0;
        for segment in points.windows(2) {
            self.draw_segment_capsule(segment[0], segment[1], radius, paint.marker);
        }
    }
}

fn point_segment_distance_sq(p: Point, a: Point, b: Point) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let apx = p.x - a.x;
    let apy = p.y - a.y;
    let ab_len_sq = abx * abx + aby * aby;
    if ab_len_sq <= f32::EPSILON {
        return apx * apx + apy * apy;
    }
    let t = ((apx * abx + apy * aby) / ab_len_sq).clamp(0.0, 1.0);
    let cx = a.x + abx * t;
    let cy = a.y + aby * t;
    let dx = p.x - cx;
    let dy = p.y - cy;
    dx * dx + dy * dy
}
