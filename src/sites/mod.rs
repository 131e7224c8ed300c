//! Per-site capture strategies and the registry that picks one by host.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Error};
use image::RgbaImage;

use crate::capture::CaptureError;
use crate::document::{Document, Element};
use crate::sink::CounterPolicy;

pub mod fixed;
pub mod paged;
pub mod spread;
pub mod webgl;

pub use fixed::FixedCropSite;
pub use paged::{PageSource, PagedSite};
pub use spread::SpreadSite;
pub use webgl::WebglSite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteId {
    ComicFuz,
    Cycomi,
    Takecomic,
    MangaMee,
    Championcross,
    Firecross,
    Bookwalker,
    MangaOne,
    Ynjn,
}

impl SiteId {
    pub const ALL: [SiteId; 9] = [
        SiteId::ComicFuz,
        SiteId::Cycomi,
        SiteId::Takecomic,
        SiteId::MangaMee,
        SiteId::Championcross,
        SiteId::Firecross,
        SiteId::Bookwalker,
        SiteId::MangaOne,
        SiteId::Ynjn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteId::ComicFuz => "comic-fuz",
            SiteId::Cycomi => "cycomi",
            SiteId::Takecomic => "takecomic",
            SiteId::MangaMee => "manga-mee",
            SiteId::Championcross => "championcross",
            SiteId::Firecross => "firecross",
            SiteId::Bookwalker => "bookwalker",
            SiteId::MangaOne => "manga-one",
            SiteId::Ynjn => "ynjn",
        }
    }

    /// Hostname fragment the site is recognised by.
    pub fn host_marker(&self) -> &'static str {
        match self {
            SiteId::ComicFuz => "comic-fuz.com",
            SiteId::Cycomi => "cycomi.com",
            SiteId::Takecomic => "takecomic.jp",
            SiteId::MangaMee => "manga-mee.jp",
            SiteId::Championcross => "championcross.jp",
            SiteId::Firecross => "firecross.jp",
            SiteId::Bookwalker => "viewer.bookwalker",
            SiteId::MangaOne => "manga-one.com",
            SiteId::Ynjn => "ynjn.jp",
        }
    }

    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| host.contains(site.host_marker()))
    }

    /// Storage key of this site's chapter counter map.
    pub fn counter_key(&self) -> String {
        format!("{}_page_counter", self.as_str().replace('-', ""))
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| site.as_str() == wanted || site.as_str().replace('-', "") == wanted)
            .ok_or_else(|| anyhow!("unknown site '{s}'"))
    }
}

/// Where a site's chapter key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterSource {
    /// Text of the first element matching `selector`, else `"default"`.
    Text(&'static str),
    /// Text of `selector`, else the URL path.
    TextOrPath(&'static str),
    Path,
}

pub const DEFAULT_CHAPTER: &str = "default";

impl ChapterSource {
    pub fn resolve(&self, doc: &dyn Document) -> String {
        let text = |selector: &str| doc.text(selector).filter(|text| !text.is_empty());
        match *self {
            ChapterSource::Text(selector) => text(selector).unwrap_or_else(|| DEFAULT_CHAPTER.to_string()),
            ChapterSource::TextOrPath(selector) => text(selector).unwrap_or_else(|| doc.path().to_string()),
            ChapterSource::Path => doc.path().to_string(),
        }
    }
}

/// The per-site bundle: find candidates, keep and order the visible ones,
/// turn them into frames, and name the chapter they belong to.
pub trait SiteStrategy: Send + Sync {
    fn id(&self) -> SiteId;

    fn counter_policy(&self) -> CounterPolicy {
        CounterPolicy::ResetOthers
    }

    /// Element whose presence means the capture control can be mounted.
    /// `None` mounts unconditionally.
    fn mount_anchor(&self) -> Option<&'static str>;

    fn locate<'d>(&self, doc: &'d dyn Document) -> Result<Vec<&'d Element>, CaptureError>;

    fn filter_and_order<'d>(
        &self,
        doc: &dyn Document,
        candidates: Vec<&'d Element>,
    ) -> Result<Vec<&'d Element>, CaptureError>;

    fn extract(&self, doc: &dyn Document, targets: &[&Element]) -> Result<Vec<RgbaImage>, CaptureError>;

    fn chapter_key(&self, doc: &dyn Document) -> String;
}

pub struct Registry {
    sites: Vec<Arc<dyn SiteStrategy>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self { sites: Vec::new() }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for site in paged::builtin() {
            registry.register(site);
        }
        registry.register(Arc::new(SpreadSite::firecross()));
        registry.register(Arc::new(FixedCropSite::bookwalker()));
        registry.register(Arc::new(WebglSite::ynjn()));
        registry
    }

    /// Adds a strategy, replacing any previous one with the same id.
    pub fn register(&mut self, site: Arc<dyn SiteStrategy>) {
        self.sites.retain(|existing| existing.id() != site.id());
        self.sites.push(site);
    }

    pub fn get(&self, id: SiteId) -> Option<Arc<dyn SiteStrategy>> {
        self.sites.iter().find(|site| site.id() == id).cloned()
    }

    pub fn for_host(&self, host: &str) -> Option<Arc<dyn SiteStrategy>> {
        SiteId::from_host(host).and_then(|id| self.get(id))
    }

    pub fn ids(&self) -> Vec<SiteId> {
        self.sites.iter().map(|site| site.id()).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn no_pixels(site: SiteId, what: &str) -> CaptureError {
    CaptureError::Extraction(format!("{site}: {what}"))
}
