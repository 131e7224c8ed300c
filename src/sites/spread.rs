//! Single-canvas viewers that render two facing pages side by side.

use image::RgbaImage;

use super::{no_pixels, ChapterSource, SiteId, SiteStrategy};
use crate::capture::CaptureError;
use crate::document::{Document, Element};
use crate::extract::{self, BlankRule};
use crate::logging::debug_log;

#[derive(Debug, Clone)]
pub struct SpreadSite {
    pub id: SiteId,
    pub canvas_selector: &'static str,
    pub blank_rule: BlankRule,
    pub chapter: ChapterSource,
}

impl SpreadSite {
    pub fn firecross() -> Self {
        Self {
            id: SiteId::Firecross,
            canvas_selector: "#screen_layer canvas",
            blank_rule: BlankRule::NearWhite,
            chapter: ChapterSource::TextOrPath("title"),
        }
    }
}

impl SiteStrategy for SpreadSite {
    fn id(&self) -> SiteId {
        self.id
    }

    fn mount_anchor(&self) -> Option<&'static str> {
        Some(self.canvas_selector)
    }

    fn locate<'d>(&self, doc: &'d dyn Document) -> Result<Vec<&'d Element>, CaptureError> {
        let canvases: Vec<&Element> = doc
            .query_all(self.canvas_selector)
            .into_iter()
            .filter(|element| element.canvas().is_some())
            .collect();
        // Hidden canvases under `#screen_layer` are stale pages; the first
        // shown one wins, the first in document order only as a fallback.
        let picked = canvases
            .iter()
            .find(|element| !element.hidden)
            .or_else(|| canvases.first())
            .copied();
        match picked {
            Some(canvas) => Ok(vec![canvas]),
            None => Err(CaptureError::NotFound("viewer canvas not found".to_string())),
        }
    }

    /// The viewer shows one surface at a time; there is nothing to rank.
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

            for (idx, half) in extract::split_spread(&surface).into_iter().enumerate() {
                if extract::is_blank(&half, self.blank_rule) {
                    debug_log(self.id.as_str(), format!("skipping blank page {idx}"));
                    continue;
                }
                frames.push(extract::autocrop(&half));
            }
        }
        Ok(frames)
    }

    fn chapter_key(&self, doc: &dyn Document) -> String {
        self.chapter.resolve(doc)
    }
}
