//! Viewers with fixed chrome around the page, cropped by reference ratios.

use image::RgbaImage;

use super::{no_pixels, ChapterSource, SiteId, SiteStrategy};
use crate::capture::CaptureError;
use crate::document::{Document, Element};
use crate::extract::{self, ReferenceCrop};
use crate::geometry::Viewport;
use crate::logging::debug_log;

const CURRENT_SCREEN: [&str; 2] = [
    "#viewport1.currentScreen canvas",
    "#viewport0.currentScreen canvas",
];
const SCREENS: [&str; 2] = ["#viewport1 canvas", "#viewport0 canvas"];
const RENDERER: &str = "#renderer";
const DISTANCE_WEIGHT: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct FixedCropSite {
    pub id: SiteId,
    pub crop: ReferenceCrop,
    pub chapter: ChapterSource,
}

impl FixedCropSite {
    pub fn bookwalker() -> Self {
        Self {
            id: SiteId::Bookwalker,
            crop: ReferenceCrop::default(),
            chapter: ChapterSource::Text("#pagetitle span"),
        }
    }

    fn pick_current<'d>(&self, doc: &'d dyn Document) -> Option<&'d Element> {
        let canvases_matching = |selectors: &[&str]| -> Vec<&'d Element> {
            doc.elements()
                .iter()
                .filter(|element| element.canvas().is_some())
                .filter(|element| selectors.iter().any(|sel| element.matches(sel)))
                .collect()
        };

        if let Some(current) = canvases_matching(&CURRENT_SCREEN).first().copied() {
            debug_log(self.id.as_str(), "using current-screen canvas");
            return Some(current);
        }

        let screens = canvases_matching(&SCREENS);
        if screens.is_empty() {
            return canvases_matching(&["canvas"]).first().copied();
        }

        let viewport = doc.viewport();
        let (cx, cy) = match doc.query(RENDERER) {
            Some(renderer) => (renderer.rect.center_x(), renderer.rect.center_y()),
            None => (viewport.center_x(), viewport.center_y()),
        };
        if let Some(under_center) = screens
            .iter()
            .find(|element| element.rect.contains_point(cx, cy))
        {
            return Some(*under_center);
        }

        best_visible(&screens, &viewport)
    }
}

/// Largest on-screen area, penalised by distance from the viewport centre.
fn best_visible<'d>(canvases: &[&'d Element], viewport: &Viewport) -> Option<&'d Element> {
    let mut best: Option<(&'d Element, f64)> = None;
    for &element in canvases {
        let visible = viewport.visible_area(&element.rect);
        if visible <= 0.0 {
            continue;
        }
        let dist = (element.rect.center_x() - viewport.center_x())
            .hypot(element.rect.center_y() - viewport.center_y());
        let score = visible - dist * DISTANCE_WEIGHT;
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((element, score));
        }
    }
    best.map(|(element, _)| element)
}

impl SiteStrategy for FixedCropSite {
    fn id(&self) -> SiteId {
        self.id
    }

    /// The viewer page is the mount point.
    fn mount_anchor(&self) -> Option<&'static str> {
        None
    }

    fn locate<'d>(&self, doc: &'d dyn Document) -> Result<Vec<&'d Element>, CaptureError> {
        self.pick_current(doc)
            .map(|canvas| vec![canvas])
            .ok_or_else(|| CaptureError::NotFound("viewer canvas not found".to_string()))
    }

    fn filter_and_order<'d>(
        &self,
        _doc: &dyn Document,
        candidates: Vec<&'d Element>,
    ) -> Result<Vec<&'d Element>, CaptureError> {
        Ok(candidates)
    }

    fn extract(&self, _doc: &dyn Document, targets: &[&Element]) -> Result<Vec<RgbaImage>, CaptureError> {
        let mut frames = Vec::new();
        for element in targets {
            let surface = element
                .canvas()
                .and_then(|canvas| canvas.read_direct())
                .ok_or_else(|| no_pixels(self.id, "viewer canvas could not be read"))?;
            let (width, height) = surface.dimensions();
            let rects = self.crop.rects(width, height);
            debug_log(
                self.id.as_str(),
                format!("canvas {width}x{height}, {} crop(s): {rects:?}", rects.len()),
            );
            frames.extend(rects.into_iter().map(|rect| extract::crop(&surface, rect)));
        }
        Ok(frames)
    }

    fn chapter_key(&self, doc: &dyn Document) -> String {
        self.chapter.resolve(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CanvasSource, Drawable, Snapshot};
    use crate::geometry::Rect;
    use image::Rgba;

    fn canvas(width: u32, height: u32) -> Option<Drawable> {
        Some(Drawable::Canvas(CanvasSource {
            width,
            height,
            direct: Some(RgbaImage::from_pixel(width, height, Rgba([9, 9, 9, 255]))),
            ..CanvasSource::default()
        }))
    }

    #[test]
    fn current_screen_wins() {
        let mut doc = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(1000.0, 600.0));
        doc.push(&["#viewport0 canvas"], Rect::new(0.0, 0.0, 1000.0, 600.0), canvas(10, 10));
        let current = doc.push(
            &["#viewport1 canvas", "#viewport1.currentScreen canvas"],
            Rect::new(2000.0, 0.0, 1000.0, 600.0),
            canvas(10, 10),
        );
        let site = FixedCropSite::bookwalker();
        assert_eq!(site.locate(&doc).unwrap()[0].id, current);
    }

    #[test]
    fn canvas_under_renderer_center_then_best_score() {
        let mut doc = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(1000.0, 600.0));
        doc.push(&["#viewport0 canvas"], Rect::new(0.0, 0.0, 400.0, 600.0), canvas(10, 10));
        let under = doc.push(&["#viewport1 canvas"], Rect::new(500.0, 0.0, 400.0, 600.0), canvas(10, 10));
        doc.push(&[RENDERER], Rect::new(400.0, 0.0, 400.0, 600.0), None);
        let site = FixedCropSite::bookwalker();
        assert_eq!(site.locate(&doc).unwrap()[0].id, under);

        let mut scored = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(1000.0, 600.0));
        scored.push(&["#viewport0 canvas"], Rect::new(-350.0, 0.0, 400.0, 600.0), canvas(10, 10));
        let best = scored.push(&["#viewport1 canvas"], Rect::new(520.0, 0.0, 400.0, 300.0), canvas(10, 10));
        assert_eq!(site.locate(&scored).unwrap()[0].id, best);
    }

    #[test]
    fn falls_back_to_any_canvas_or_fails() {
        let site = FixedCropSite::bookwalker();
        let empty = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(10.0, 10.0));
        assert!(matches!(site.locate(&empty), Err(CaptureError::NotFound(_))));

        let mut doc = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(10.0, 10.0));
        let any = doc.push(&["canvas"], Rect::new(0.0, 0.0, 5.0, 5.0), canvas(10, 10));
        assert_eq!(site.locate(&doc).unwrap()[0].id, any);
    }

    #[test]
    fn reference_canvas_spread_yields_two_crops() {
        let mut doc = Snapshot::new("viewer.bookwalker.jp", "/", Viewport::new(1195.0, 582.0))
            .with_text("#pagetitle span", "Volume 2");
        doc.push(
            &["#viewport1.currentScreen canvas"],
            Rect::new(0.0, 0.0, 1195.0, 582.0),
            canvas(2390, 1165),
        );
        let site = FixedCropSite::bookwalker();
        let targets = site.locate(&doc).unwrap();
        let frames = site.extract(&doc, &targets).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.dimensions() == (820, 1165)));
        assert_eq!(site.chapter_key(&doc), "Volume 2");

        let portrait = FixedCropSite::bookwalker().crop.rects(1000, 1165);
        assert_eq!(portrait.len(), 1);
    }
}
