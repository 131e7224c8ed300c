//! Release check that sits in front of every capture.
//!
//! The gate either lets the capture continuation run (up to date, or the
//! check failed and we fail open) or surfaces an update notice and holds the
//! continuation back until the user retries.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::feed::{FeedResponse, ReleaseFeed, ReleaseInfo, DEFAULT_RELEASE_PAGE};
use crate::logging::{debug_log, error_log};
use crate::storage::{self, KeyValueStore};
use crate::version::{self, FALLBACK_VERSION};

pub const STATE_KEY: &str = "pagesaver_state_v1";
pub const LOCAL_VERSION_KEY: &str = "pagesaver_local_version_override";
pub const NOTES_PREVIEW_LIMIT: usize = 2000;

pub type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckState {
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_checked: Option<i64>,
    #[serde(default)]
    pub latest_tag: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub latest_body: Option<String>,
    #[serde(default)]
    pub is_latest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GateState {
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotice {
    pub tag: Option<String>,
    pub name: String,
    pub notes_preview: String,
    pub url: String,
}

impl UpdateNotice {
    fn build(release: &ReleaseInfo, state: &CheckState, release_page: &str) -> Self {
        let name = release
            .display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| release.usable_tag())
            .unwrap_or("release")
            .to_string();
        let notes = release
            .notes()
            .or(state.latest_body.as_deref())
            .unwrap_or_default();
        let url = release
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| release_page.to_string());
        Self {
            tag: release.usable_tag().map(str::to_string),
            name,
            notes_preview: notes.chars().take(NOTES_PREVIEW_LIMIT).collect(),
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CheckOutcome {
    #[serde(rename_all = "camelCase")]
    UpToDate {
        local: String,
        remote: Option<String>,
        cached: bool,
    },
    UpdateAvailable(UpdateNotice),
    Failed { message: String },
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where the gate reports progress. Rendering is left to the host.
pub trait GateUi: Send + Sync {
    fn status(&self, message: &str);
    fn update_available(&self, notice: &UpdateNotice);
    fn state_changed(&self, _state: GateState) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl GateUi for LogUi {
    fn status(&self, message: &str) {
        debug_log("gate", format!("status: {message}"));
    }

    fn update_available(&self, notice: &UpdateNotice) {
        debug_log("gate", format!("update available: {} ({})", notice.name, notice.url));
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub check_interval: Duration,
    pub fail_open_delay: Duration,
    pub declared_version: Option<String>,
    pub release_page: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(24 * 60 * 60),
            fail_open_delay: Duration::from_millis(1200),
            declared_version: Some(crate::VERSION.to_string()),
            release_page: DEFAULT_RELEASE_PAGE.to_string(),
        }
    }
}

pub struct UpdateGateService {
    store: Arc<dyn KeyValueStore>,
    feed: Arc<dyn ReleaseFeed>,
    clock: Arc<dyn Clock>,
    ui: Arc<dyn GateUi>,
    config: GateConfig,
    phase: Mutex<GateState>,
    continuation: Mutex<Option<Continuation>>,
}

impl UpdateGateService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        feed: Arc<dyn ReleaseFeed>,
        clock: Arc<dyn Clock>,
        ui: Arc<dyn GateUi>,
        config: GateConfig,
    ) -> Self {
        Self {
            store,
            feed,
            clock,
            ui,
            config,
            phase: Mutex::new(GateState::Idle),
            continuation: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> GateState {
        *self.phase.lock()
    }

    pub fn release_page(&self) -> &str {
        &self.config.release_page
    }

    /// Registers the action run once the gate lets the user through.
    pub fn set_continuation(&self, continuation: Continuation) {
        *self.continuation.lock() = Some(continuation);
    }

    pub fn has_continuation(&self) -> bool {
        self.continuation.lock().is_some()
    }

    pub fn read_state(&self) -> CheckState {
        storage::read_json(self.store.as_ref(), STATE_KEY)
    }

    pub fn reset_state(&self) {
        storage::remove_key(self.store.as_ref(), STATE_KEY);
        storage::remove_key(self.store.as_ref(), LOCAL_VERSION_KEY);
        debug_log("gate", "state reset");
    }

    pub fn set_local_version(&self, version: &str) {
        match self.store.set(LOCAL_VERSION_KEY, version) {
            Ok(()) => debug_log("gate", format!("local version override set to {version}")),
            Err(err) => error_log("gate", format!("set local version: {err}")),
        }
    }

    /// Override slot first, then the declared version, then `0.0.0`.
    pub fn local_version(&self) -> String {
        match self.store.get(LOCAL_VERSION_KEY) {
            Ok(Some(value)) if !value.trim().is_empty() => return value,
            Ok(_) => {}
            Err(err) => error_log("gate", format!("read local version override: {err}")),
        }
        self.config
            .declared_version
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(FALLBACK_VERSION)
            .to_string()
    }

    pub fn force_set_remote_tag(&self, tag: &str) -> CheckState {
        let mut state = self.read_state();
        state.latest_tag = Some(tag.to_string());
        state.is_latest = version::is_at_least(&self.local_version(), tag);
        state.last_checked = Some(self.clock.now().timestamp_millis());
        storage::write_json(self.store.as_ref(), STATE_KEY, &state);
        debug_log("gate", format!("remote tag forced to {tag}"));
        state
    }

    pub fn check(&self, force: bool) -> CheckOutcome {
        debug_log("gate", format!("check requested (force={force})"));
        self.transition(GateState::Checking);
        self.ui.status("checking for updates");

        let state = self.read_state();
        let local = self.local_version();

        if !force && self.recently_checked(&state) {
            match state.latest_tag.as_deref() {
                Some(tag) if version::is_at_least(&local, tag) => {
                    self.ui.status(
                        "local version is the latest (checked earlier). starting downloader...",
                    );
                    let cached = ReleaseInfo {
                        tag: Some(tag.to_string()),
                        etag: state.etag.clone(),
                        ..ReleaseInfo::default()
                    };
                    self.record_check(&cached, true);
                    return self.finish_up_to_date(local, Some(tag.to_string()), true);
                }
                _ => debug_log(
                    "gate",
                    "recent check but local version is behind; fetching to confirm",
                ),
            }
        }

        match self.feed.fetch_latest(state.etag.as_deref()) {
            Ok(FeedResponse::NotModified) => self.on_not_modified(&state, local),
            Ok(FeedResponse::Release(release)) => self.on_release(release, local),
            Err(err) => self.on_failure(err.to_string()),
        }
    }

    fn on_not_modified(&self, state: &CheckState, local: String) -> CheckOutcome {
        let remembered = ReleaseInfo {
            tag: state.latest_tag.clone(),
            etag: state.etag.clone(),
            ..ReleaseInfo::default()
        };
        match remembered.usable_tag() {
            Some(tag) if !version::is_at_least(&local, tag) => {
                self.ui.status(&format!("new version available: {tag}"));
                let state = self.record_check(&remembered, false);
                self.finish_update_available(&remembered, &state)
            }
            remote => {
                let remote = remote.map(str::to_string);
                self.ui
                    .status("no new release found (304). starting downloader...");
                self.record_check(&remembered, true);
                self.finish_up_to_date(local, remote, false)
            }
        }
    }

    fn on_release(&self, release: ReleaseInfo, local: String) -> CheckOutcome {
        let Some(remote) = release.usable_tag().map(str::to_string) else {
            error_log("gate", "release received without a tag; failing open");
            self.ui
                .status("error: release has no tag. starting downloader to be safe.");
            self.record_check(&release, true);
            return self.finish_up_to_date(local, None, false);
        };

        debug_log(
            "gate",
            format!(
                "comparing local {local} ({}) with remote {remote} ({})",
                version::normalize(&local),
                version::normalize(&remote)
            ),
        );

        if version::is_at_least(&local, &remote) {
            self.ui.status(&format!(
                "you are on the latest version ({local}). starting downloader..."
            ));
            self.record_check(&release, true);
            self.finish_up_to_date(local, Some(remote), false)
        } else {
            self.ui.status(&format!("new version available: {remote}"));
            let state = self.record_check(&release, false);
            self.finish_update_available(&release, &state)
        }
    }

    fn on_failure(&self, message: String) -> CheckOutcome {
        error_log("gate", format!("update check failed: {message}"));
        self.transition(GateState::Failed);
        self.ui
            .status(&format!("error while checking for updates: {message}"));
        if !self.config.fail_open_delay.is_zero() {
            thread::sleep(self.config.fail_open_delay);
        }
        self.ui.status("opening downloader (fallback)...");
        self.run_continuation();
        self.transition(GateState::Idle);
        CheckOutcome::Failed { message }
    }

    fn finish_up_to_date(&self, local: String, remote: Option<String>, cached: bool) -> CheckOutcome {
        self.transition(GateState::UpToDate);
        self.run_continuation();
        self.transition(GateState::Idle);
        CheckOutcome::UpToDate {
            local,
            remote,
            cached,
        }
    }

    fn finish_update_available(&self, release: &ReleaseInfo, state: &CheckState) -> CheckOutcome {
        self.transition(GateState::UpdateAvailable);
        let notice = UpdateNotice::build(release, state, &self.config.release_page);
        self.ui.update_available(&notice);
        self.transition(GateState::Idle);
        CheckOutcome::UpdateAvailable(notice)
    }

    fn recently_checked(&self, state: &CheckState) -> bool {
        let Some(last) = state.last_checked else {
            return false;
        };
        let elapsed = self.clock.now().timestamp_millis() - last;
        let window = i64::try_from(self.config.check_interval.as_millis()).unwrap_or(i64::MAX);
        elapsed < window
    }

    /// Persists what this check learned before the outcome is acted on.
    fn record_check(&self, release: &ReleaseInfo, treat_as_up_to_date: bool) -> CheckState {
        let mut state = self.read_state();
        state.last_checked = Some(self.clock.now().timestamp_millis());

        let tag = release.usable_tag().map(str::to_string);
        if tag.is_some() {
            state.latest_tag = tag.clone();
        }
        if let Some(etag) = release.etag.clone() {
            state.etag = Some(etag);
        }
        if let Some(notes) = release.notes() {
            state.latest_body = Some(notes.to_string());
        }

        if treat_as_up_to_date {
            state.is_latest = true;
        } else if let Some(tag) = tag.as_deref() {
            state.is_latest = version::is_at_least(&self.local_version(), tag);
        }

        storage::write_json(self.store.as_ref(), STATE_KEY, &state);
        debug_log("gate", format!("state updated: {state:?}"));
        state
    }

    fn run_continuation(&self) {
        let continuation = self.continuation.lock().take();
        match continuation {
            Some(continuation) => continuation(),
            None => debug_log("gate", "no continuation registered; nothing to open"),
        }
    }

    fn transition(&self, next: GateState) {
        let previous = std::mem::replace(&mut *self.phase.lock(), next);
        debug_log("gate", format!("{previous:?} -> {next:?}"));
        self.ui.state_changed(next);
    }
}
