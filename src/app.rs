use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::bridge::Bridge;
use crate::capture::{CaptureError, CaptureFlow, FlowResult};
use crate::config::{self, Config};
use crate::document::{Document, Snapshot};
use crate::feed::{ClientConfig, GithubFeed, ReleaseFeed};
use crate::gate::{CheckOutcome, GateConfig, GateUi, SystemClock, UpdateGateService, UpdateNotice};
use crate::logging::debug_log;
use crate::mount::MountObserver;
use crate::sink::{DirectoryTarget, DownloadSink, ExportFormat, SaveTarget};
use crate::sites::{Registry, SiteId};
use crate::storage::{self, KeyValueStore};

const NOTICE_WIDTH: usize = 78;
const MOUNT_POLL: std::time::Duration = std::time::Duration::from_millis(200);

/// Prints gate and capture progress on stderr, leaving stdout to results.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl GateUi for ConsoleUi {
    fn status(&self, message: &str) {
        eprintln!("{message}");
    }

    fn update_available(&self, notice: &UpdateNotice) {
        eprintln!("{}", render_notice(notice, NOTICE_WIDTH));
    }
}

pub fn render_notice(notice: &UpdateNotice, width: usize) -> String {
    let mut out = String::new();
    match notice.tag.as_deref() {
        Some(tag) if tag != notice.name => {
            out.push_str(&format!("Update available: {} ({tag})\n", notice.name));
        }
        _ => out.push_str(&format!("Update available: {}\n", notice.name)),
    }
    let notes = notice.notes_preview.trim();
    if !notes.is_empty() {
        out.push('\n');
        for paragraph in notes.lines() {
            out.push_str(&textwrap::fill(paragraph, width));
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str(&format!("Release page: {}\n", notice.url));
    out.push_str("Update, then retry the capture. --open-release opens the page in a browser.");
    out
}

pub struct App {
    config: Config,
    gate: Arc<UpdateGateService>,
    flow: CaptureFlow,
}

impl App {
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let cfg = config::load(config::LoadOptions {
            config_file,
            env_prefix: None,
        })
        .context("load config")?;
        Self::build(cfg)
    }

    pub fn build(cfg: Config) -> Result<Self> {
        let store = storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?;
        let feed = GithubFeed::new(ClientConfig {
            url: cfg.feed.url.clone(),
            user_agent: cfg.feed.user_agent.clone(),
            timeout: Some(cfg.feed.timeout),
            http_client: None,
        })
        .context("build release feed")?;
        let download_dir = match cfg.capture.download_dir.clone() {
            Some(dir) => dir,
            None => env::current_dir().context("resolve download directory")?,
        };
        debug_log("app", format!("saving into {}", download_dir.display()));

        Ok(Self::assemble(
            cfg,
            Arc::new(store),
            Arc::new(feed),
            Arc::new(DirectoryTarget::new(download_dir)),
            Arc::new(ConsoleUi),
        ))
    }

    pub fn assemble(
        cfg: Config,
        store: Arc<dyn KeyValueStore>,
        feed: Arc<dyn ReleaseFeed>,
        target: Arc<dyn SaveTarget>,
        ui: Arc<dyn GateUi>,
    ) -> Self {
        let gate = Arc::new(UpdateGateService::new(
            store.clone(),
            feed,
            Arc::new(SystemClock),
            ui.clone(),
            GateConfig {
                check_interval: cfg.gate.check_interval,
                fail_open_delay: cfg.gate.fail_open_delay,
                declared_version: Some(crate::VERSION.to_string()),
                release_page: cfg.feed.release_page.clone(),
            },
        ));
        let flow = CaptureFlow::new(
            gate.clone(),
            Arc::new(Registry::builtin()),
            Arc::new(DownloadSink::new(store, target)),
            ui,
        );
        Self {
            config: cfg,
            gate,
            flow,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &Arc<UpdateGateService> {
        &self.gate
    }

    pub fn check_updates(&self, force: bool) -> CheckOutcome {
        self.gate.check(force)
    }

    /// Loads a page snapshot, waits for the viewer's mount point, then runs
    /// the gated capture.
    pub fn capture_snapshot(&self, path: &Path, format: Option<ExportFormat>, force: bool) -> Result<FlowResult> {
        let snapshot = Snapshot::load(path)?;
        let site = self
            .flow
            .registry()
            .for_host(snapshot.host())
            .ok_or_else(|| CaptureError::UnsupportedSite(snapshot.host().to_string()))?;

        let snapshot = match site.mount_anchor() {
            Some(anchor) if !has_anchor(&snapshot, anchor) => {
                debug_log("app", format!("waiting for {anchor} in {}", path.display()));
                let watched = path.to_path_buf();
                let observer = MountObserver::spawn(
                    move || Snapshot::load(&watched).is_ok_and(|doc| has_anchor(&doc, anchor)),
                    MOUNT_POLL,
                );
                if !observer.wait_available(self.config.capture.mount_timeout) {
                    bail!("{}: viewer not ready ({anchor} never appeared)", site.id());
                }
                Snapshot::load(path)?
            }
            _ => snapshot,
        };

        let format = format.unwrap_or(self.config.capture.format);
        Ok(self.flow.trigger(Arc::new(snapshot), format, force))
    }

    pub fn reset_counter(&self, site: SiteId) {
        self.flow.reset_counter(site);
    }

    pub fn serve_bridge<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<()> {
        Bridge::new(self.gate.clone()).serve(input, output)
    }

    pub fn serve_bridge_stdio(&self) -> Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.serve_bridge(stdin.lock(), stdout.lock())
    }

    pub fn open_release_page(&self) -> Result<()> {
        let url = self.gate.release_page();
        webbrowser::open(url).with_context(|| format!("open {url}"))?;
        Ok(())
    }
}

fn has_anchor(doc: &dyn Document, anchor: &str) -> bool {
    doc.query(anchor).is_some() || doc.text(anchor).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedResponse, ReleaseInfo};
    use crate::gate::tests::{RecordingUi, ScriptedFeed};
    use crate::storage::MemoryStore;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::fs;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::tempdir;

    fn data_url(image: &RgbaImage) -> String {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
    }

    fn app(dir: &Path, tag: &str) -> App {
        let mut cfg = Config::default();
        cfg.gate.fail_open_delay = Duration::ZERO;
        cfg.capture.mount_timeout = Duration::from_millis(50);
        App::assemble(
            cfg,
            Arc::new(MemoryStore::new()),
            ScriptedFeed::with(vec![Ok(FeedResponse::Release(ReleaseInfo {
                tag: Some(tag.into()),
                ..ReleaseInfo::default()
            }))]),
            Arc::new(DirectoryTarget::new(dir.join("out"))),
            Arc::new(RecordingUi::default()),
        )
    }

    fn write_cycomi_snapshot(dir: &Path, with_anchor: bool) -> PathBuf {
        let page = RgbaImage::from_pixel(4, 6, Rgba([120, 10, 10, 255]));
        let mut elements = vec![
            serde_json::json!({
                "matches": ["canvas.page-image"],
                "rect": {"left": 420.0, "top": 0.0, "width": 400.0, "height": 600.0},
                "canvas": {"width": 4, "height": 6, "direct": data_url(&page)}
            }),
            serde_json::json!({
                "matches": ["canvas.css-1gvy8c4"],
                "rect": {"left": 10.0, "top": 0.0, "width": 400.0, "height": 600.0},
                "canvas": {"width": 4, "height": 6, "direct": data_url(&page)}
            }),
        ];
        if with_anchor {
            elements.push(serde_json::json!({
                "matches": [".MuiGrid2-root.MuiGrid2-container.css-1lzw85y"],
                "rect": {"left": 0.0, "top": 0.0, "width": 900.0, "height": 40.0}
            }));
        }
        let raw = serde_json::json!({
            "host": "cycomi.com",
            "path": "/viewer/chapter/42",
            "viewport": {"width": 900.0, "height": 700.0},
            "elements": elements
        });
        let path = dir.join("snapshot.json");
        fs::write(&path, raw.to_string()).unwrap();
        path
    }

    #[test]
    fn capture_snapshot_writes_numbered_files() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), "0.0.1");
        let snapshot = write_cycomi_snapshot(dir.path(), true);

        let result = app.capture_snapshot(&snapshot, None, false).unwrap();
        assert!(matches!(result.gate, CheckOutcome::UpToDate { .. }));
        let report = result.capture.unwrap().unwrap();
        assert_eq!(report.chapter, "/viewer/chapter/42");
        assert!(dir.path().join("out/01.png").exists());
        assert!(dir.path().join("out/02.png").exists());
    }

    #[test]
    fn capture_waits_for_mount_point() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), "0.0.1");
        let snapshot = write_cycomi_snapshot(dir.path(), false);
        let err = app.capture_snapshot(&snapshot, None, false).unwrap_err();
        assert!(err.to_string().contains("viewer not ready"));
    }

    #[test]
    fn unsupported_host_is_rejected() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), "0.0.1");
        let path = dir.path().join("other.json");
        fs::write(&path, r#"{"host": "example.com", "viewport": {"width": 1, "height": 1}}"#).unwrap();
        let err = app.capture_snapshot(&path, None, false).unwrap_err();
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn notice_is_wrapped() {
        let notice = UpdateNotice {
            tag: Some("v2.0.0".into()),
            name: "Spring release".into(),
            notes_preview: "word ".repeat(40),
            url: "https://example.test/r".into(),
        };
        let text = render_notice(&notice, 30);
        assert!(text.starts_with("Update available: Spring release (v2.0.0)"));
        assert!(text.lines().all(|line| line.len() <= 30 || line.starts_with("Update") || line.starts_with("Release")));
        assert!(text.contains("Release page: https://example.test/r"));
    }
}
