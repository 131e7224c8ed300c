//! Pixel-level helpers shared by the site strategies.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Spreads are wider than this multiple of their height.
pub const SPREAD_RATIO: f64 = 1.3;
/// Pages with at most this fraction of content pixels count as blank.
pub const BLANK_CONTENT_FRACTION: f64 = 0.01;
const NEAR_WHITE: u8 = 245;
const NEAR_BLACK: u8 = 20;
const BLACK_PROBE_SIZE: u32 = 50;
const MOSTLY_BLACK_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Same-size copy of the source surface.
pub fn direct_copy(source: &RgbaImage) -> RgbaImage {
    let mut out = RgbaImage::new(source.width(), source.height());
    imageops::replace(&mut out, source, 0, 0);
    out
}

pub fn crop(source: &RgbaImage, rect: CropRect) -> RgbaImage {
    imageops::crop_imm(source, rect.x, rect.y, rect.width, rect.height).to_image()
}

pub fn is_spread(width: u32, height: u32) -> bool {
    f64::from(width) > f64::from(height) * SPREAD_RATIO
}

/// Splits a double-page surface into halves in reading order (right half
/// first). Single pages come back as one full copy.
pub fn split_spread(source: &RgbaImage) -> Vec<RgbaImage> {
    let (width, height) = source.dimensions();
    if !is_spread(width, height) {
        return vec![direct_copy(source)];
    }
    let half = width / 2;
    vec![
        crop(source, CropRect::new(width - half, 0, half, height)),
        crop(source, CropRect::new(0, 0, half, height)),
    ]
}

/// What counts as "content" when deciding whether a page is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankRule {
    /// Any visible pixel that is not near-white. Transparent pixels are ignored.
    NearWhite,
    /// Any pixel that is neither transparent nor pure black.
    TransparentOrBlack,
}

impl BlankRule {
    fn is_content(&self, pixel: &Rgba<u8>) -> bool {
        let [r, g, b, a] = pixel.0;
        if a == 0 {
            return false;
        }
        match self {
            BlankRule::NearWhite => !(r > NEAR_WHITE && g > NEAR_WHITE && b > NEAR_WHITE),
            BlankRule::TransparentOrBlack => !(r == 0 && g == 0 && b == 0),
        }
    }
}

pub fn is_blank(image: &RgbaImage, rule: BlankRule) -> bool {
    let total = f64::from(image.width()) * f64::from(image.height());
    let limit = total * BLANK_CONTENT_FRACTION;
    let mut content = 0usize;
    for pixel in image.pixels() {
        if rule.is_content(pixel) {
            content += 1;
            if content as f64 > limit {
                return false;
            }
        }
    }
    true
}

/// Tight box around non-transparent, non-black pixels, or `None` when the
/// box would be degenerate.
pub fn content_bounds(image: &RgbaImage) -> Option<CropRect> {
    let (width, height) = image.dimensions();
    let mut top = height;
    let mut bottom = 0;
    let mut left = width;
    let mut right = 0;

    for (x, y, pixel) in image.enumerate_pixels() {
        if !BlankRule::TransparentOrBlack.is_content(pixel) {
            continue;
        }
        top = top.min(y);
        bottom = bottom.max(y);
        left = left.min(x);
        right = right.max(x);
    }

    if right <= left || bottom <= top {
        return None;
    }
    Some(CropRect::new(left, top, right - left + 1, bottom - top + 1))
}

pub fn autocrop(image: &RgbaImage) -> RgbaImage {
    match content_bounds(image) {
        Some(bounds) => crop(image, bounds),
        None => direct_copy(image),
    }
}

/// Crop geometry defined once against a known viewer resolution and
/// rescaled to whatever resolution the canvas actually has.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCrop {
    pub reference_width: f64,
    pub reference_height: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Canvases wider than this aspect ratio are treated as spreads.
    pub spread_aspect: f64,
}

impl Default for ReferenceCrop {
    fn default() -> Self {
        Self {
            reference_width: 2390.0,
            reference_height: 1165.0,
            x: 375.0,
            y: 0.0,
            width: 820.0,
            height: 1165.0,
            spread_aspect: 1.05,
        }
    }
}

struct Scaled {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

impl ReferenceCrop {
    fn scaled(&self, canvas_width: u32, canvas_height: u32) -> Scaled {
        let sx = f64::from(canvas_width) / self.reference_width;
        let sy = f64::from(canvas_height) / self.reference_height;
        Scaled {
            x: (self.x * sx).round() as i64,
            y: (self.y * sy).round() as i64,
            width: (self.width * sx).round() as i64,
            height: (self.height * sy).round() as i64,
        }
    }

    pub fn is_spread(&self, canvas_width: u32, canvas_height: u32) -> bool {
        canvas_height > 0 && f64::from(canvas_width) / f64::from(canvas_height) > self.spread_aspect
    }

    pub fn single_rect(&self, canvas_width: u32, canvas_height: u32) -> CropRect {
        let s = self.scaled(canvas_width, canvas_height);
        let cw = i64::from(canvas_width);
        let ch = i64::from(canvas_height);
        let x = s.x.min(cw - s.width).max(0);
        let y = s.y.min(ch - s.height).max(0);
        clamp_rect(canvas_width, canvas_height, x, y, s.width, s.height)
    }

    /// Right page first, then left.
    pub fn spread_rects(&self, canvas_width: u32, canvas_height: u32) -> [CropRect; 2] {
        let s = self.scaled(canvas_width, canvas_height);
        let cw = i64::from(canvas_width);
        let left_x = s.x.min(cw - s.width).max(0);
        let right_x = (s.x + s.width).min(cw - s.width).max(0);
        [
            clamp_rect(canvas_width, canvas_height, right_x, s.y, s.width, s.height),
            clamp_rect(canvas_width, canvas_height, left_x, s.y, s.width, s.height),
        ]
    }

    pub fn rects(&self, canvas_width: u32, canvas_height: u32) -> Vec<CropRect> {
        if self.is_spread(canvas_width, canvas_height) {
            self.spread_rects(canvas_width, canvas_height).to_vec()
        } else {
            vec![self.single_rect(canvas_width, canvas_height)]
        }
    }
}

/// Keeps a source rectangle inside the canvas with at least one pixel on
/// each axis.
pub fn clamp_rect(canvas_width: u32, canvas_height: u32, x: i64, y: i64, width: i64, height: i64) -> CropRect {
    let cw = i64::from(canvas_width.max(1));
    let ch = i64::from(canvas_height.max(1));
    let x = x.clamp(0, cw - 1);
    let y = y.clamp(0, ch - 1);
    let width = width.min(cw - x).max(1);
    let height = height.min(ch - y).max(1);
    CropRect::new(x as u32, y as u32, width as u32, height as u32)
}

/// Downsampled probe: more than 90% of sampled pixels near-black.
pub fn is_mostly_black(image: &RgbaImage) -> bool {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return false;
    }
    let probe = imageops::resize(
        image,
        width.min(BLACK_PROBE_SIZE).max(1),
        height.min(BLACK_PROBE_SIZE).max(1),
        FilterType::Triangle,
    );
    let total = (probe.width() * probe.height()) as usize;
    let dark = probe
        .pixels()
        .filter(|pixel| {
            let [r, g, b, _] = pixel.0;
            r < NEAR_BLACK && g < NEAR_BLACK && b < NEAR_BLACK
        })
        .count();
    dark as f64 / total as f64 > MOSTLY_BLACK_FRACTION
}

/// Scales an image to `width`×`height`, as drawing an `<img>` into a
/// device-pixel-sized surface does.
pub fn resample(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return direct_copy(image);
    }
    imageops::resize(image, width.max(1), height.max(1), FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const INK: Rgba<u8> = Rgba([30, 30, 30, 255]);

    #[test]
    fn reference_resolution_crop_is_unscaled() {
        let crop = ReferenceCrop::default();
        assert_eq!(crop.single_rect(2390, 1165), CropRect::new(375, 0, 820, 1165));
    }

    #[test]
    fn reference_crop_scales_and_orders_spread() {
        let crop = ReferenceCrop::default();
        let [right, left] = crop.spread_rects(1195, 582);
        assert_eq!(left, CropRect::new(188, 0, 410, 582));
        assert_eq!(right, CropRect::new(598, 0, 410, 582));
        assert!(crop.is_spread(2390, 1165));
        assert!(!crop.is_spread(800, 1165));
    }

    #[test]
    fn crop_rects_stay_inside_canvas() {
        let crop = ReferenceCrop {
            x: 2000.0,
            ..ReferenceCrop::default()
        };
        for rect in crop.spread_rects(2390, 1165) {
            assert!(rect.x + rect.width <= 2390);
            assert!(rect.y + rect.height <= 1165);
        }
        let clamped = clamp_rect(10, 10, 12, -3, 50, 50);
        assert_eq!(clamped, CropRect::new(9, 0, 1, 10));
    }

    #[test]
    fn blank_halves_are_dropped_by_rule() {
        let mut spread = RgbaImage::from_pixel(200, 100, WHITE);
        for y in 10..90 {
            for x in 10..90 {
                spread.put_pixel(x, y, INK);
            }
        }
        let halves = split_spread(&spread);
        assert_eq!(halves.len(), 2);
        // Right half first: it is the untouched white one.
        assert!(is_blank(&halves[0], BlankRule::NearWhite));
        assert!(!is_blank(&halves[1], BlankRule::NearWhite));

        let transparent = RgbaImage::new(100, 100);
        assert!(is_blank(&transparent, BlankRule::NearWhite));
        assert!(is_blank(&transparent, BlankRule::TransparentOrBlack));
    }

    #[test]
    fn single_page_is_not_split() {
        let page = RgbaImage::from_pixel(100, 130, WHITE);
        assert_eq!(split_spread(&page).len(), 1);
        assert!(!is_spread(130, 100));
        assert!(is_spread(131, 100));
    }

    #[test]
    fn autocrop_finds_content_box() {
        let mut page = RgbaImage::new(50, 40);
        for y in 5..15 {
            for x in 20..30 {
                page.put_pixel(x, y, INK);
            }
        }
        assert_eq!(content_bounds(&page), Some(CropRect::new(20, 5, 10, 10)));
        assert_eq!(autocrop(&page).dimensions(), (10, 10));

        let empty = RgbaImage::new(50, 40);
        assert_eq!(content_bounds(&empty), None);
        assert_eq!(autocrop(&empty).dimensions(), (50, 40));
    }

    #[test]
    fn mostly_black_probe() {
        let black = RgbaImage::from_pixel(400, 300, Rgba([0, 0, 0, 255]));
        assert!(is_mostly_black(&black));
        let page = RgbaImage::from_pixel(400, 300, WHITE);
        assert!(!is_mostly_black(&page));
    }
}
