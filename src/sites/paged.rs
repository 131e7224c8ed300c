//! Viewers that lay pages out as individual `<img>` or `<canvas>` elements.

use std::sync::Arc;

use image::RgbaImage;

use super::{no_pixels, ChapterSource, SiteId, SiteStrategy};
use crate::capture::CaptureError;
use crate::document::{Document, Element};
use crate::extract;
use crate::geometry::{self, PageOrder, Visibility};
use crate::logging::debug_log;
use crate::sink::CounterPolicy;

const PAGE_IMAGE: &str = "img.G54Y0W_page";
const RENDERED_PAGE: &str = ".-cv-page.mode-loaded.mode-rendered";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Image,
    Canvas,
}

#[derive(Debug, Clone)]
pub struct PagedSite {
    pub id: SiteId,
    pub anchor: &'static str,
    /// Container that must exist before pages are looked for.
    pub container: Option<&'static str>,
    pub candidates: &'static [&'static str],
    pub source: PageSource,
    pub visibility: Visibility,
    pub order: PageOrder,
    pub dedupe_by_src: bool,
    /// Drop canvases whose backing store has zero width or height.
    pub skip_empty_canvas: bool,
    pub chapter: ChapterSource,
    pub policy: CounterPolicy,
}

impl PagedSite {
    pub fn comic_fuz() -> Self {
        Self {
            id: SiteId::ComicFuz,
            anchor: "h2.title_detail_viewer__detail__info__viewerTitle__GrN4D",
            container: None,
            candidates: &[PAGE_IMAGE],
            source: PageSource::Image,
            visibility: Visibility::FullyContained,
            order: PageOrder::RightToLeftByCenter,
            dedupe_by_src: false,
            skip_empty_canvas: false,
            chapter: ChapterSource::Text("h2.title_detail_viewer__detail__info__viewerTitle__GrN4D"),
            policy: CounterPolicy::ResetOthers,
        }
    }

    pub fn cycomi() -> Self {
        Self {
            id: SiteId::Cycomi,
            anchor: ".MuiGrid2-root.MuiGrid2-container.css-1lzw85y",
            container: None,
            candidates: &["canvas.page-image", "canvas.css-1gvy8c4"],
            source: PageSource::Canvas,
            visibility: Visibility::FullyContained,
            order: PageOrder::RightToLeft,
            dedupe_by_src: false,
            skip_empty_canvas: false,
            chapter: ChapterSource::Path,
            policy: CounterPolicy::ResetOthers,
        }
    }

    pub fn takecomic() -> Self {
        Self {
            id: SiteId::Takecomic,
            anchor: ".ep-main-h-main",
            container: Some("#xCVPages"),
            candidates: &["#xCVPages .-cv-page.mode-loaded.mode-rendered"],
            source: PageSource::Canvas,
            visibility: Visibility::AreaRatio(0.4),
            order: PageOrder::RightToLeft,
            dedupe_by_src: false,
            skip_empty_canvas: true,
            chapter: ChapterSource::Text(".ep-main-h-h"),
            policy: CounterPolicy::ResetOthers,
        }
    }

    pub fn manga_mee() -> Self {
        Self {
            id: SiteId::MangaMee,
            anchor: "h1.text-xl.font-semibold.leading-5.text-greyish-brown",
            container: None,
            candidates: &[PAGE_IMAGE],
            source: PageSource::Image,
            visibility: Visibility::FullyContained,
            order: PageOrder::RightToLeft,
            dedupe_by_src: false,
            skip_empty_canvas: false,
            chapter: ChapterSource::Text("h1.text-xl.font-semibold.leading-5.text-greyish-brown"),
            policy: CounterPolicy::ResetOthers,
        }
    }

    pub fn championcross() -> Self {
        Self {
            id: SiteId::Championcross,
            anchor: ".article-title-section",
            container: None,
            candidates: &[RENDERED_PAGE],
            source: PageSource::Canvas,
            visibility: Visibility::HorizontalOverlap,
            order: PageOrder::NearestToCenter { keep: 2 },
            dedupe_by_src: false,
            skip_empty_canvas: false,
            chapter: ChapterSource::Text(".article-title"),
            policy: CounterPolicy::KeepOthers,
        }
    }

    pub fn manga_one() -> Self {
        Self {
            id: SiteId::MangaOne,
            anchor: r"h1.truncate.text-lg.font-bold.text-white.switch\:text-xl",
            container: None,
            candidates: &[PAGE_IMAGE],
            source: PageSource::Image,
            visibility: Visibility::FullyContained,
            order: PageOrder::RightToLeftByCenter,
            dedupe_by_src: true,
            skip_empty_canvas: false,
            chapter: ChapterSource::Text(r"h1.truncate.text-lg.font-bold.text-white.switch\:text-xl"),
            policy: CounterPolicy::KeepOthers,
        }
    }

    fn usable(&self, element: &Element) -> bool {
        match self.source {
            PageSource::Image => element.image().is_some(),
            PageSource::Canvas => match element.canvas() {
                Some(canvas) => !self.skip_empty_canvas || (canvas.width > 0 && canvas.height > 0),
                None => false,
            },
        }
    }
}

pub fn builtin() -> Vec<Arc<dyn SiteStrategy>> {
    vec![
        Arc::new(PagedSite::comic_fuz()),
        Arc::new(PagedSite::cycomi()),
        Arc::new(PagedSite::takecomic()),
        Arc::new(PagedSite::manga_mee()),
        Arc::new(PagedSite::championcross()),
        Arc::new(PagedSite::manga_one()),
    ]
}

/// Keeps one element per `src`: the last one seen, at the position of the
/// first. Images without a `src` are dropped.
fn dedupe_by_src<'d>(elements: Vec<&'d Element>) -> Vec<&'d Element> {
    let mut unique: Vec<(&str, &'d Element)> = Vec::new();
    for element in elements {
        let Some(image) = element.image() else {
            continue;
        };
        if image.src.is_empty() {
            continue;
        }
        match unique.iter_mut().find(|(src, _)| *src == image.src) {
            Some(slot) => slot.1 = element,
            None => unique.push((image.src.as_str(), element)),
        }
    }
    unique.into_iter().map(|(_, element)| element).collect()
}

impl SiteStrategy for PagedSite {
    fn id(&self) -> SiteId {
        self.id
    }

    fn counter_policy(&self) -> CounterPolicy {
        self.policy
    }

    fn mount_anchor(&self) -> Option<&'static str> {
        Some(self.anchor)
    }

    fn locate<'d>(&self, doc: &'d dyn Document) -> Result<Vec<&'d Element>, CaptureError> {
        if let Some(container) = self.container {
            if doc.query(container).is_none() {
                return Err(CaptureError::NotFound(format!(
                    "page container {container} not found"
                )));
            }
        }
        let found: Vec<&Element> = doc
            .elements()
            .iter()
            .filter(|element| self.candidates.iter().any(|sel| element.matches(sel)))
            .collect();
        if found.is_empty() {
            return Err(CaptureError::NotFound(match self.source {
                PageSource::Image => "no page images found".to_string(),
                PageSource::Canvas => "no page canvases found".to_string(),
            }));
        }
        debug_log(self.id.as_str(), format!("located {} candidates", found.len()));
        Ok(found)
    }

    fn filter_and_order<'d>(
        &self,
        doc: &dyn Document,
        candidates: Vec<&'d Element>,
    ) -> Result<Vec<&'d Element>, CaptureError> {
        let mut usable: Vec<&Element> = candidates
            .into_iter()
            .filter(|element| self.usable(element))
            .collect();
        if self.dedupe_by_src {
            usable = dedupe_by_src(usable);
        }

        let rects: Vec<_> = usable.iter().map(|element| element.rect).collect();
        let picked = geometry::select(&rects, &doc.viewport(), self.visibility, self.order);
        debug_log(
            self.id.as_str(),
            format!("{} of {} candidates visible", picked.len(), usable.len()),
        );
        if picked.is_empty() {
            return Err(CaptureError::NoVisiblePage);
        }
        Ok(picked.into_iter().map(|idx| usable[idx]).collect())
    }

    fn extract(&self, _doc: &dyn Document, targets: &[&Element]) -> Result<Vec<RgbaImage>, CaptureError> {
        targets
            .iter()
            .map(|element| match self.source {
                PageSource::Image => element
                    .image()
                    .and_then(|image| image.natural.as_ref())
                    .map(extract::direct_copy)
                    .ok_or_else(|| no_pixels(self.id, "page image has not finished loading")),
                PageSource::Canvas => element
                    .canvas()
                    .and_then(|canvas| canvas.read_direct())
                    .ok_or_else(|| no_pixels(self.id, "page canvas could not be read")),
            })
            .collect()
    }

    fn chapter_key(&self, doc: &dyn Document) -> String {
        self.chapter.resolve(doc)
    }
}
