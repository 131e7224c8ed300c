//! The capture flow: gate first, then locate, filter, extract and save.

use std::io;
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use thiserror::Error;

use crate::document::Document;
use crate::gate::{CheckOutcome, GateUi, UpdateGateService};
use crate::logging::{debug_log, error_log};
use crate::sink::{DownloadSink, ExportFormat, SavedFile};
use crate::sites::{Registry, SiteId, SiteStrategy};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture strategy for {0}")]
    UnsupportedSite(String),
    #[error("{0}")]
    NotFound(String),
    #[error("no page is visible on screen")]
    NoVisiblePage,
    #[error("{0}")]
    Extraction(String),
    #[error("could not encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: image::ImageError,
    },
    #[error("could not save {name}: {source}")]
    Save {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Runs a site's locate, filter/order and extract steps.
pub fn capture_frames(site: &dyn SiteStrategy, doc: &dyn Document) -> Result<Vec<RgbaImage>, CaptureError> {
    let candidates = site.locate(doc)?;
    let targets = site.filter_and_order(doc, candidates)?;
    site.extract(doc, &targets)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub site: SiteId,
    pub chapter: String,
    pub files: Vec<SavedFile>,
}

impl CaptureReport {
    pub fn status_message(&self) -> String {
        let count = self.files.len();
        let noun = if count == 1 { "page" } else { "pages" };
        format!("Downloading images... ({count} {noun})")
    }
}

#[derive(Clone)]
struct Pipeline {
    registry: Arc<Registry>,
    sink: Arc<DownloadSink>,
    ui: Arc<dyn GateUi>,
}

impl Pipeline {
    fn run(&self, doc: &dyn Document, format: ExportFormat) -> Result<CaptureReport, CaptureError> {
        let site = self
            .registry
            .for_host(doc.host())
            .ok_or_else(|| CaptureError::UnsupportedSite(doc.host().to_string()))?;
        self.ui.status("Preparing images...");

        let chapter = site.chapter_key(doc);
        let frames = capture_frames(site.as_ref(), doc)?;
        debug_log(
            site.id().as_str(),
            format!("{} frame(s) for chapter {chapter:?}", frames.len()),
        );
        let counter_key = site.id().counter_key();
        let files = self
            .sink
            .save(&counter_key, site.counter_policy(), &frames, &chapter, format)?;
        Ok(CaptureReport {
            site: site.id(),
            chapter,
            files,
        })
    }

    fn run_reported(&self, doc: &dyn Document, format: ExportFormat) -> Result<CaptureReport, CaptureError> {
        let result = self.run(doc, format);
        match &result {
            Ok(report) => self.ui.status(&report.status_message()),
            Err(err) => {
                error_log("capture", err.to_string());
                self.ui.status(&format!("Error: {err}"));
            }
        }
        result
    }
}

#[derive(Debug)]
pub struct FlowResult {
    pub gate: CheckOutcome,
    /// `None` when the gate held the capture back.
    pub capture: Option<Result<CaptureReport, CaptureError>>,
}

pub struct CaptureFlow {
    gate: Arc<UpdateGateService>,
    pipeline: Pipeline,
}

impl CaptureFlow {
    pub fn new(
        gate: Arc<UpdateGateService>,
        registry: Arc<Registry>,
        sink: Arc<DownloadSink>,
        ui: Arc<dyn GateUi>,
    ) -> Self {
        Self {
            gate,
            pipeline: Pipeline { registry, sink, ui },
        }
    }

    pub fn gate(&self) -> &Arc<UpdateGateService> {
        &self.gate
    }

    pub fn registry(&self) -> &Registry {
        &self.pipeline.registry
    }

    /// Registers the capture as the gate's continuation and runs the check.
    pub fn trigger(&self, doc: Arc<dyn Document>, format: ExportFormat, force: bool) -> FlowResult {
        let slot: Arc<Mutex<Option<Result<CaptureReport, CaptureError>>>> = Arc::new(Mutex::new(None));
        let pipeline = self.pipeline.clone();
        let filled = slot.clone();
        self.gate.set_continuation(Box::new(move || {
            let result = pipeline.run_reported(doc.as_ref(), format);
            *filled.lock() = Some(result);
        }));

        let gate = self.gate.check(force);
        let capture = slot.lock().take();
        FlowResult { gate, capture }
    }

    /// Captures without consulting the gate.
    pub fn capture_now(&self, doc: &dyn Document, format: ExportFormat) -> Result<CaptureReport, CaptureError> {
        self.pipeline.run_reported(doc, format)
    }

    pub fn reset_counter(&self, site: SiteId) {
        self.pipeline.sink.reset_counter(&site.counter_key());
        self.pipeline.ui.status("Counter reset.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Drawable, ImageSource, Snapshot};
    use crate::feed::{FeedError, FeedResponse, ReleaseInfo};
    use crate::gate::tests::{FixedClock, RecordingUi, ScriptedFeed};
    use crate::gate::GateConfig;
    use crate::geometry::{Rect, Viewport};
    use crate::sink::tests::MemoryTarget;
    use crate::storage::MemoryStore;
    use image::Rgba;
    use std::time::Duration;

    struct Harness {
        flow: CaptureFlow,
        target: Arc<MemoryTarget>,
        ui: Arc<RecordingUi>,
    }

    fn harness(responses: Vec<Result<FeedResponse, FeedError>>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ui = Arc::new(RecordingUi::default());
        let target = Arc::new(MemoryTarget::default());
        let gate = UpdateGateService::new(
            store.clone(),
            ScriptedFeed::with(responses),
            FixedClock::at(1_000_000),
            ui.clone(),
            GateConfig {
                fail_open_delay: Duration::ZERO,
                declared_version: Some("1.0.0".into()),
                ..GateConfig::default()
            },
        );
        let flow = CaptureFlow::new(
            Arc::new(gate),
            Arc::new(Registry::builtin()),
            Arc::new(DownloadSink::new(store, target.clone())),
            ui.clone(),
        );
        Harness { flow, target, ui }
    }

    fn release(tag: &str) -> Result<FeedResponse, FeedError> {
        Ok(FeedResponse::Release(ReleaseInfo {
            tag: Some(tag.into()),
            ..ReleaseInfo::default()
        }))
    }

    fn comic_fuz_doc(pages: usize) -> Arc<dyn Document> {
        let mut doc = Snapshot::new("comic-fuz.com", "/viewer/1", Viewport::new(1280.0, 800.0))
            .with_text("h2.title_detail_viewer__detail__info__viewerTitle__GrN4D", "Ep. 1");
        for idx in 0..pages {
            doc.push(
                &["img.G54Y0W_page"],
                Rect::new(idx as f64 * 400.0, 0.0, 400.0, 800.0),
                Some(Drawable::Image(ImageSource {
                    src: format!("p{idx}"),
                    natural: Some(RgbaImage::from_pixel(8, 12, Rgba([idx as u8, 0, 0, 255]))),
                })),
            );
        }
        Arc::new(doc)
    }

    #[test]
    fn up_to_date_gate_runs_capture() {
        let h = harness(vec![release("1.0.0")]);
        let result = h.flow.trigger(comic_fuz_doc(3), ExportFormat::Png, false);

        assert!(matches!(result.gate, CheckOutcome::UpToDate { .. }));
        let report = result.capture.unwrap().unwrap();
        assert_eq!(report.chapter, "Ep. 1");
        assert_eq!(report.status_message(), "Downloading images... (3 pages)");
        assert_eq!(h.target.names(), vec!["01.png", "02.png", "03.png"]);
    }

    #[test]
    fn update_notice_holds_capture_back() {
        let h = harness(vec![release("2.0.0")]);
        let result = h.flow.trigger(comic_fuz_doc(1), ExportFormat::Png, false);

        assert!(matches!(result.gate, CheckOutcome::UpdateAvailable(_)));
        assert!(result.capture.is_none());
        assert!(h.target.names().is_empty());
        assert!(h.flow.gate().has_continuation());
    }

    #[test]
    fn feed_failure_still_captures() {
        let h = harness(vec![Err(FeedError::Status {
            status: 503,
            reason: "Service Unavailable".into(),
            body: String::new(),
        })]);
        let result = h.flow.trigger(comic_fuz_doc(1), ExportFormat::Jpeg, false);
        assert!(matches!(result.gate, CheckOutcome::Failed { .. }));
        assert_eq!(result.capture.unwrap().unwrap().status_message(), "Downloading images... (1 page)");
        assert_eq!(h.target.names(), vec!["01.jpg"]);
    }

    #[test]
    fn capture_errors_become_status_messages() {
        let h = harness(vec![release("1.0.0")]);
        let result = h.flow.trigger(comic_fuz_doc(0), ExportFormat::Png, false);
        assert!(matches!(result.capture, Some(Err(CaptureError::NotFound(_)))));
        assert!(h
            .ui
            .statuses
            .lock()
            .iter()
            .any(|status| status == "Error: no page images found"));

        let unknown: Arc<dyn Document> = Arc::new(Snapshot::new("example.com", "/", Viewport::new(1.0, 1.0)));
        assert!(matches!(
            h.flow.capture_now(unknown.as_ref(), ExportFormat::Png),
            Err(CaptureError::UnsupportedSite(_))
        ));
    }

    #[test]
    fn reset_counter_restarts_numbering() {
        let h = harness(vec![]);
        let doc = comic_fuz_doc(1);
        h.flow.capture_now(doc.as_ref(), ExportFormat::Png).unwrap();
        h.flow.capture_now(doc.as_ref(), ExportFormat::Png).unwrap();
        h.flow.reset_counter(SiteId::ComicFuz);
        h.flow.capture_now(doc.as_ref(), ExportFormat::Png).unwrap();
        assert_eq!(h.target.names(), vec!["01.png", "02.png", "01.png"]);
    }
}
