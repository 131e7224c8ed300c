//! Viewers drawing pages into WebGL canvases, where a plain readback may
//! come back black.

use std::cmp::Ordering;

use image::RgbaImage;

use super::{no_pixels, ChapterSource, SiteId, SiteStrategy};
use crate::capture::CaptureError;
use crate::document::{CanvasSource, Document, Element};
use crate::extract;
use crate::geometry::{Rect, Viewport, Visibility};
use crate::logging::debug_log;

const VISIBLE: Visibility = Visibility::Intersects { min_size: 1.0 };

#[derive(Debug, Clone)]
pub struct OutlierRule {
    pub min_pixels: f64,
    pub max_relative_diff: f64,
    pub max_aspect_diff: f64,
    /// Reference size as a fraction of the viewport when nothing is visible.
    pub fallback_fraction: f64,
}

impl Default for OutlierRule {
    fn default() -> Self {
        Self {
            min_pixels: 100.0,
            max_relative_diff: 0.25,
            max_aspect_diff: 0.20,
            fallback_fraction: 0.7,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

fn nonzero(value: f64) -> f64 {
    if value == 0.0 {
        1.0
    } else {
        value
    }
}

impl OutlierRule {
    /// Drops canvases far from the median page size (thumbnails, banners,
    /// overlays). If that leaves nothing, every canvas is kept.
    pub fn apply<'d>(
        &self,
        canvases: &[&'d Element],
        reference: &[Rect],
        viewport: &Viewport,
    ) -> Vec<&'d Element> {
        let mut widths: Vec<f64> = reference.iter().map(|rect| rect.width).collect();
        let mut heights: Vec<f64> = reference.iter().map(|rect| rect.height).collect();
        let mut ref_w = median(&mut widths);
        if ref_w == 0.0 {
            ref_w = viewport.width * self.fallback_fraction;
        }
        let mut ref_h = median(&mut heights);
        if ref_h == 0.0 {
            ref_h = viewport.height * self.fallback_fraction;
        }
        let ref_aspect = if ref_w != 0.0 && ref_h != 0.0 { ref_w / ref_h } else { 1.0 };

        let kept: Vec<&Element> = canvases
            .iter()
            .copied()
            .filter(|element| {
                let (w, h) = (element.rect.width, element.rect.height);
                if w < self.min_pixels || h < self.min_pixels {
                    debug_log("ynjn", format!("excluded canvas: too small {w:.0}x{h:.0}"));
                    return false;
                }
                let rel_w = (w - ref_w).abs() / nonzero(ref_w);
                let rel_h = (h - ref_h).abs() / nonzero(ref_h);
                let aspect_diff = (w / h - ref_aspect).abs() / nonzero(ref_aspect);
                if rel_w > self.max_relative_diff
                    || rel_h > self.max_relative_diff
                    || aspect_diff > self.max_aspect_diff
                {
                    debug_log(
                        "ynjn",
                        format!(
                            "excluded canvas: outlier relW={rel_w:.2} relH={rel_h:.2} aspectDiff={aspect_diff:.2} size={w:.0}x{h:.0}"
                        ),
                    );
                    return false;
                }
                true
            })
            .collect();

        debug_log(
            "ynjn",
            format!(
                "ref size {ref_w:.0}x{ref_h:.0} aspect {ref_aspect:.3}; {} canvases -> {}",
                canvases.len(),
                kept.len()
            ),
        );
        if kept.is_empty() {
            canvases.to_vec()
        } else {
            kept
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebglSite {
    pub id: SiteId,
    pub containers: &'static [&'static str],
    pub outliers: OutlierRule,
    pub chapter: ChapterSource,
}

impl WebglSite {
    pub fn ynjn() -> Self {
        Self {
            id: SiteId::Ynjn,
            containers: &[
                "div[data-v-006a2a88]",
                ".viewer",
                ".reading-view",
                ".manga-page",
                "article",
            ],
            outliers: OutlierRule::default(),
            chapter: ChapterSource::Text("h1.typography-heading-xs"),
        }
    }

    fn in_scope(&self, doc: &dyn Document, element: &Element, tag: &str) -> bool {
        let scoped = self
            .containers
            .iter()
            .filter(|container| doc.query(container).is_some())
            .collect::<Vec<_>>();
        if scoped.is_empty() {
            return element.matches(tag);
        }
        scoped
            .iter()
            .any(|container| element.matches(&format!("{container} {tag}")))
    }

    /// First image in the canvas's enclosing `div`, if it is on screen.
    fn sibling_image<'d>(&self, doc: &'d dyn Document, canvas: &Element) -> Option<&'d Element> {
        let group = canvas.group?;
        let viewport = doc.viewport();
        doc.elements()
            .iter()
            .find(|element| element.group == Some(group) && element.image().is_some())
            .filter(|element| VISIBLE.admits(&element.rect, &viewport))
    }

    /// Draws an `<img>` at its on-screen size in device pixels.
    fn render_image(&self, doc: &dyn Document, element: &Element) -> Option<RgbaImage> {
        let natural = element.image()?.natural.as_ref()?;
        let dpr = doc.device_pixel_ratio();
        let width = (element.rect.width * dpr).round().max(1.0) as u32;
        let height = (element.rect.height * dpr).round().max(1.0) as u32;
        Some(extract::resample(natural, width, height))
    }

    fn read_canvas(&self, doc: &dyn Document, element: &Element, canvas: &CanvasSource) -> Option<RgbaImage> {
        let fallback = || {
            self.sibling_image(doc, element)
                .and_then(|img| self.render_image(doc, img))
        };

        let Some(frame) = canvas
            .read_direct()
            .or_else(|| canvas.read_blob())
            .or_else(|| canvas.read_gl())
            .or_else(fallback)
        else {
            debug_log(self.id.as_str(), "no pixel data from canvas; skipping");
            return None;
        };

        if !extract::is_mostly_black(&frame) {
            return Some(frame);
        }

        debug_log(self.id.as_str(), "canvas looks black; retrying via GPU readback and image fallback");
        if let Some(gl) = canvas.read_gl() {
            if !extract::is_mostly_black(&gl) {
                return Some(gl);
            }
        }
        if let Some(alt) = fallback() {
            return Some(alt);
        }
        debug_log(self.id.as_str(), "canvas still black after every attempt; skipping");
        None
    }
}

impl SiteStrategy for WebglSite {
    fn id(&self) -> SiteId {
        self.id
    }

    fn mount_anchor(&self) -> Option<&'static str> {
        Some("h1.typography-heading-xs")
    }

    fn locate<'d>(&self, doc: &'d dyn Document) -> Result<Vec<&'d Element>, CaptureError> {
        let found: Vec<&Element> = doc
            .elements()
            .iter()
            .filter(|element| match (element.canvas(), element.image()) {
                (Some(_), _) => self.in_scope(doc, element, "canvas"),
                (_, Some(_)) => self.in_scope(doc, element, "img"),
                _ => false,
            })
            .collect();
        if found.is_empty() {
            return Err(CaptureError::NotFound("no canvas or image in the viewer".to_string()));
        }
        Ok(found)
    }

    /// Visible canvases that survive the outlier filter, followed by every
    /// visible image.
    fn filter_and_order<'d>(
        &self,
        doc: &dyn Document,
        candidates: Vec<&'d Element>,
    ) -> Result<Vec<&'d Element>, CaptureError> {
        let viewport = doc.viewport();
        let visible: Vec<&Element> = candidates
            .into_iter()
            .filter(|element| VISIBLE.admits(&element.rect, &viewport))
            .collect();
        if visible.is_empty() {
            return Err(CaptureError::NoVisiblePage);
        }

        let canvases: Vec<&Element> = visible.iter().copied().filter(|e| e.canvas().is_some()).collect();
        let images: Vec<&Element> = visible.iter().copied().filter(|e| e.image().is_some()).collect();
        let reference: Vec<Rect> = canvases.iter().chain(images.iter()).map(|e| e.rect).collect();

        let mut ordered = self.outliers.apply(&canvases, &reference, &viewport);
        ordered.extend(images);
        Ok(ordered)
    }

    fn extract(&self, doc: &dyn Document, targets: &[&Element]) -> Result<Vec<RgbaImage>, CaptureError> {
        let mut frames = Vec::new();
        for element in targets {
            if let Some(canvas) = element.canvas() {
                frames.extend(self.read_canvas(doc, element, canvas));
            }
        }

        if frames.is_empty() {
            for element in targets.iter().filter(|element| element.image().is_some()) {
                match self.render_image(doc, element) {
                    Some(frame) => frames.push(frame),
                    None => debug_log(self.id.as_str(), "visible image has no pixels yet"),
                }
            }
        }

        if frames.is_empty() {
            return Err(no_pixels(self.id, "no page could be captured"));
        }
        Ok(frames)
    }

    fn chapter_key(&self, doc: &dyn Document) -> String {
        self.chapter.resolve(doc)
    }
}
