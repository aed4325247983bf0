//! Pixel grid module
//!
//! Wraps a decoded page raster together with its optional background and
//! text-mask layers, and exposes the 0..=127 brightness channel that every
//! analysis stage works on.
//!
//! Brightness for a color pixel is the mid-point of its brightest and darkest
//! channel after dropping the low bit, which keeps the scale identical for
//! gray and RGB pages. The brightness plane is computed lazily and cached
//! until the raster is mutated.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use super::types::{ImagingError, Result};
use super::view::{Rect, RegionView};

// ============================================================
// Constants
// ============================================================

/// Maximum value of the brightness scale (pure white)
pub const MAX_BRIGHTNESS: u8 = 127;

/// Pixels darker than this brightness count as ink
pub const INK_LIMIT: u8 = 100;

/// Default scan resolution when none is known
pub const DEFAULT_DPI: u32 = 300;

// ============================================================
// Brightness helpers
// ============================================================

/// Brightness of an RGB triple on the 0..=127 scale
#[inline]
pub fn byte_brightness(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r >> 1, g >> 1, b >> 1);
    let max = r.max(g).max(b) as u16;
    let min = r.min(g).min(b) as u16;
    ((max + min) / 2) as u8
}

/// Byte value that reads back as the given brightness
#[inline]
pub fn brightness_to_byte(brightness: u8) -> u8 {
    (u16::from(brightness.min(MAX_BRIGHTNESS)) * 255 / u16::from(MAX_BRIGHTNESS)) as u8
}

/// Whether a brightness value counts as ink
#[inline]
pub fn is_ink(brightness: u8) -> bool {
    brightness < INK_LIMIT
}

// ============================================================
// Raster
// ============================================================

/// A decoded page raster, either 8-bit gray or 24-bit RGB
#[derive(Clone, PartialEq)]
pub enum Raster {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        let kind = if self.is_color() { "Rgb" } else { "Gray" };
        write!(f, "Raster::{kind}({w}x{h})")
    }
}

impl Raster {
    /// Convert a decoded image, keeping color only when the source has it
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Raster::Gray(gray),
            DynamicImage::ImageRgb8(rgb) => Raster::Rgb(rgb),
            other if other.color().has_color() => Raster::Rgb(other.to_rgb8()),
            other => Raster::Gray(other.to_luma8()),
        }
    }

    /// A white raster of the given size
    pub fn white(width: u32, height: u32, color: bool) -> Self {
        if color {
            Raster::Rgb(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
        } else {
            Raster::Gray(GrayImage::from_pixel(width, height, Luma([255])))
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Gray(img) => img.dimensions(),
            Raster::Rgb(img) => img.dimensions(),
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Raster::Rgb(_))
    }

    /// Brightness of a single pixel
    #[inline]
    pub fn brightness_at(&self, x: u32, y: u32) -> u8 {
        match self {
            Raster::Gray(img) => img.get_pixel(x, y).0[0] >> 1,
            Raster::Rgb(img) => {
                let [r, g, b] = img.get_pixel(x, y).0;
                byte_brightness(r, g, b)
            }
        }
    }

    /// Overwrite a pixel so that it reads back as `brightness`
    ///
    /// RGB pixels keep their hue: the channels are scaled by the ratio of new
    /// to old brightness. Black RGB pixels become neutral gray.
    pub fn set_brightness(&mut self, x: u32, y: u32, brightness: u8) {
        match self {
            Raster::Gray(img) => img.put_pixel(x, y, Luma([brightness_to_byte(brightness)])),
            Raster::Rgb(img) => {
                let px = img.get_pixel_mut(x, y);
                let [r, g, b] = px.0;
                let old = byte_brightness(r, g, b);
                if old == brightness {
                    return;
                }
                if old == 0 || brightness >= MAX_BRIGHTNESS {
                    let v = brightness_to_byte(brightness);
                    px.0 = [v, v, v];
                } else {
                    let ratio = f32::from(brightness) / f32::from(old);
                    px.0 = [r, g, b].map(|c| (f32::from(c) * ratio).round().clamp(0.0, 255.0) as u8);
                }
            }
        }
    }

    /// Brightness plane in row-major order
    pub fn brightness_plane(&self) -> Vec<u8> {
        match self {
            Raster::Gray(img) => img.as_raw().iter().map(|&v| v >> 1).collect(),
            Raster::Rgb(img) => img
                .as_raw()
                .chunks_exact(3)
                .map(|c| byte_brightness(c[0], c[1], c[2]))
                .collect(),
        }
    }

    /// Copy out a rectangle of the raster
    pub fn crop(&self, rect: Rect) -> Raster {
        let (x, y) = (rect.left as u32, rect.top as u32);
        let (w, h) = (rect.width() as u32, rect.height() as u32);
        match self {
            Raster::Gray(img) => Raster::Gray(image::imageops::crop_imm(img, x, y, w, h).to_image()),
            Raster::Rgb(img) => Raster::Rgb(image::imageops::crop_imm(img, x, y, w, h).to_image()),
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            Raster::Gray(img) => DynamicImage::ImageLuma8(img.clone()),
            Raster::Rgb(img) => DynamicImage::ImageRgb8(img.clone()),
        }
    }
}

// ============================================================
// PixelGrid
// ============================================================

/// A page raster plus derived layers and its cached brightness plane
#[derive(Clone)]
pub struct PixelGrid {
    raster: Raster,
    background: Option<Raster>,
    text_mask: Option<Raster>,
    brightness: OnceLock<Vec<u8>>,
    rotation: f64,
    dpi: u32,
}

impl fmt::Debug for PixelGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelGrid")
            .field("raster", &self.raster)
            .field("background", &self.background)
            .field("text_mask", &self.text_mask)
            .field("rotation", &self.rotation)
            .field("dpi", &self.dpi)
            .finish()
    }
}

impl PixelGrid {
    pub fn new(raster: Raster, dpi: u32) -> Self {
        Self {
            raster,
            background: None,
            text_mask: None,
            brightness: OnceLock::new(),
            rotation: 0.0,
            dpi: if dpi == 0 { DEFAULT_DPI } else { dpi },
        }
    }

    pub fn from_dynamic(image: DynamicImage, dpi: u32) -> Self {
        Self::new(Raster::from_dynamic(image), dpi)
    }

    /// Decode a page from disk
    pub fn open(path: &Path, dpi: u32) -> Result<Self> {
        if !path.exists() {
            return Err(ImagingError::ImageNotFound(path.to_path_buf()));
        }
        let image = image::open(path).map_err(|e| ImagingError::InvalidImage(e.to_string()))?;
        Ok(Self::from_dynamic(image, dpi))
    }

    /// Attach a background and/or text-mask layer
    ///
    /// Layers whose size differs from the main raster are ignored.
    #[must_use]
    pub fn with_layers(mut self, background: Option<Raster>, text_mask: Option<Raster>) -> Self {
        let dims = self.raster.dimensions();
        self.background = background.filter(|layer| layer.dimensions() == dims);
        self.text_mask = text_mask.filter(|layer| layer.dimensions() == dims);
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.raster.dimensions().0 as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.raster.dimensions().1 as usize
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Accumulated rotation applied to this page, in degrees
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn background(&self) -> Option<&Raster> {
        self.background.as_ref()
    }

    pub fn text_mask(&self) -> Option<&Raster> {
        self.text_mask.as_ref()
    }

    pub fn is_color(&self) -> bool {
        self.raster.is_color()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, self.width(), 0, self.height())
    }

    /// The view spanning the whole page
    pub fn full_view(&self) -> RegionView<'_> {
        RegionView::new(self, self.bounds())
    }

    /// Cached brightness plane, row-major, one byte per pixel
    pub fn brightness(&self) -> &[u8] {
        self.brightness.get_or_init(|| self.raster.brightness_plane())
    }

    #[inline]
    pub fn brightness_at(&self, x: usize, y: usize) -> u8 {
        self.brightness()[y * self.width() + x]
    }

    /// Brightness at a possibly off-canvas location; outside reads as white
    #[inline]
    pub fn brightness_or_white(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x as usize >= self.width() || y as usize >= self.height() {
            MAX_BRIGHTNESS
        } else {
            self.brightness_at(x as usize, y as usize)
        }
    }

    /// Mutable access to the raster; drops the cached brightness plane
    pub fn raster_mut(&mut self) -> &mut Raster {
        self.brightness.take();
        &mut self.raster
    }

    /// Rewrite every pixel whose brightness differs from `plane`
    ///
    /// Gray rasters store the plane directly so it stays cached; RGB rasters
    /// are rescaled channel-wise and their plane is recomputed on demand.
    pub fn apply_brightness(&mut self, plane: Vec<u8>) {
        let width = self.width();
        debug_assert_eq!(plane.len(), width * self.height());
        let old = self
            .brightness
            .take()
            .unwrap_or_else(|| self.raster.brightness_plane());
        for (i, (&before, &after)) in old.iter().zip(plane.iter()).enumerate() {
            if before != after {
                self.raster
                    .set_brightness((i % width) as u32, (i / width) as u32, after);
            }
        }
        if !self.raster.is_color() {
            let _ = self.brightness.set(plane);
        }
    }

    /// Swap in a transformed raster set, adding `degrees` to the rotation
    pub(crate) fn replace_layers(
        &mut self,
        raster: Raster,
        background: Option<Raster>,
        text_mask: Option<Raster>,
        degrees: f64,
    ) {
        self.raster = raster;
        self.background = background;
        self.text_mask = text_mask;
        self.brightness.take();
        self.rotation += degrees;
    }
}
