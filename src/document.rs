//! The page as seen by the capture pipeline.
//!
//! A collector running inside the reader page evaluates the real selectors
//! and records what matched, where it sat on screen and what pixels it could
//! read back. Everything downstream works from that record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{imageops, RgbaImage};
use serde::Deserialize;

use crate::geometry::{Rect, Viewport};

pub type ElementId = usize;

#[derive(Debug, Clone)]
pub struct ImageSource {
    pub src: String,
    /// Decoded natural-size pixels; `None` while the image is still loading.
    pub natural: Option<RgbaImage>,
}

/// The readback paths a canvas offers. Each may be unavailable (tainted,
/// lost context, WebGL without preserved drawing buffer...).
#[derive(Debug, Clone, Default)]
pub struct CanvasSource {
    pub width: u32,
    pub height: u32,
    pub webgl: bool,
    pub direct: Option<RgbaImage>,
    pub blob: Option<RgbaImage>,
    /// RGBA rows bottom-up, as `readPixels` returns them.
    pub gl: Option<Vec<u8>>,
}

impl CanvasSource {
    pub fn read_direct(&self) -> Option<RgbaImage> {
        self.direct.clone()
    }

    pub fn read_blob(&self) -> Option<RgbaImage> {
        self.blob.clone()
    }

    /// GPU readback with rows flipped back to top-down.
    pub fn read_gl(&self) -> Option<RgbaImage> {
        if !self.webgl {
            return None;
        }
        let raw = self.gl.as_ref()?;
        let flipped = RgbaImage::from_raw(self.width, self.height, raw.clone())?;
        Some(imageops::flip_vertical(&flipped))
    }
}

#[derive(Debug, Clone)]
pub enum Drawable {
    Image(ImageSource),
    Canvas(CanvasSource),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub id: ElementId,
    /// Selectors this element (or, for wrappers, its drawable) matched.
    pub matches: Vec<String>,
    pub rect: Rect,
    /// Inline `display: none`.
    pub hidden: bool,
    /// Closest enclosing `div`, used to find sibling fallbacks.
    pub group: Option<usize>,
    pub drawable: Option<Drawable>,
}

impl Element {
    pub fn matches(&self, selector: &str) -> bool {
        self.matches.iter().any(|candidate| candidate == selector)
    }

    pub fn canvas(&self) -> Option<&CanvasSource> {
        match &self.drawable {
            Some(Drawable::Canvas(canvas)) => Some(canvas),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&ImageSource> {
        match &self.drawable {
            Some(Drawable::Image(image)) => Some(image),
            _ => None,
        }
    }
}

pub trait Document: Send + Sync {
    fn host(&self) -> &str;
    fn path(&self) -> &str;
    fn viewport(&self) -> Viewport;
    fn device_pixel_ratio(&self) -> f64;
    fn elements(&self) -> &[Element];
    /// Trimmed inner text of the first element matching `selector`.
    fn text(&self, selector: &str) -> Option<String>;

    fn query_all(&self, selector: &str) -> Vec<&Element> {
        self.elements()
            .iter()
            .filter(|element| element.matches(selector))
            .collect()
    }

    fn query(&self, selector: &str) -> Option<&Element> {
        self.elements().iter().find(|element| element.matches(selector))
    }

    fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements().get(id)
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    host: String,
    path: String,
    viewport: Viewport,
    device_pixel_ratio: f64,
    texts: BTreeMap<String, String>,
    elements: Vec<Element>,
}

impl Snapshot {
    pub fn new(host: &str, path: &str, viewport: Viewport) -> Self {
        Self {
            host: host.to_string(),
            path: path.to_string(),
            viewport,
            device_pixel_ratio: 1.0,
            texts: BTreeMap::new(),
            elements: Vec::new(),
        }
    }

    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    /// Appends an element and returns its id.
    pub fn push(
        &mut self,
        matches: &[&str],
        rect: Rect,
        drawable: Option<Drawable>,
    ) -> ElementId {
        let id = self.elements.len();
        self.elements.push(Element {
            id,
            matches: matches.iter().map(|s| s.to_string()).collect(),
            rect,
            hidden: false,
            group: None,
            drawable,
        });
        id
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("snapshot: read {}", path.display()))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&raw, &base)
            .with_context(|| format!("snapshot: parse {}", path.display()))
    }

    /// Pixel payloads are data URLs or paths relative to `base_dir`.
    pub fn from_json(raw: &str, base_dir: &Path) -> Result<Self> {
        let parsed: RawSnapshot = serde_json::from_str(raw).context("snapshot: decode json")?;
        let mut snapshot = Snapshot::new(
            &parsed.host,
            &parsed.path,
            Viewport::new(parsed.viewport.width, parsed.viewport.height),
        )
        .with_device_pixel_ratio(parsed.device_pixel_ratio.unwrap_or(1.0));
        snapshot.texts = parsed
            .texts
            .into_iter()
            .map(|(selector, text)| (selector, text.trim().to_string()))
            .collect();

        for (idx, raw_element) in parsed.elements.into_iter().enumerate() {
            let drawable = match (raw_element.image, raw_element.canvas) {
                (Some(_), Some(_)) => bail!("snapshot: element {idx} is both image and canvas"),
                (Some(image), None) => Some(Drawable::Image(ImageSource {
                    src: image.src,
                    natural: load_optional(image.natural.as_deref(), base_dir)?,
                })),
                (None, Some(canvas)) => Some(Drawable::Canvas(CanvasSource {
                    width: canvas.width,
                    height: canvas.height,
                    webgl: canvas.webgl,
                    direct: load_optional(canvas.direct.as_deref(), base_dir)?,
                    blob: load_optional(canvas.blob.as_deref(), base_dir)?,
                    gl: load_optional(canvas.gl.as_deref(), base_dir)?.map(RgbaImage::into_raw),
                })),
                (None, None) => None,
            };
            snapshot.elements.push(Element {
                id: idx,
                matches: raw_element.matches,
                rect: raw_element.rect,
                hidden: raw_element.hidden,
                group: raw_element.group,
                drawable,
            });
        }
        Ok(snapshot)
    }
}

impl Document for Snapshot {
    fn host(&self) -> &str {
        &self.host
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    fn elements(&self) -> &[Element] {
        &self.elements
    }

    fn text(&self, selector: &str) -> Option<String> {
        self.texts
            .get(selector)
            .map(|text| text.trim().to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    host: String,
    #[serde(default)]
    path: String,
    viewport: RawViewport,
    #[serde(default)]
    device_pixel_ratio: Option<f64>,
    #[serde(default)]
    texts: BTreeMap<String, String>,
    #[serde(default)]
    elements: Vec<RawElement>,
}

#[derive(Deserialize)]
struct RawViewport {
    width: f64,
    height: f64,
}

#[derive(Deserialize)]
struct RawElement {
    #[serde(default)]
    matches: Vec<String>,
    rect: Rect,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    group: Option<usize>,
    #[serde(default)]
    image: Option<RawImage>,
    #[serde(default)]
    canvas: Option<RawCanvas>,
}

#[derive(Deserialize)]
struct RawImage {
    #[serde(default)]
    src: String,
    #[serde(default)]
    natural: Option<String>,
}

#[derive(Deserialize)]
struct RawCanvas {
    width: u32,
    height: u32,
    #[serde(default)]
    webgl: bool,
    #[serde(default)]
    direct: Option<String>,
    #[serde(default)]
    blob: Option<String>,
    #[serde(default)]
    gl: Option<String>,
}

fn load_optional(payload: Option<&str>, base_dir: &Path) -> Result<Option<RgbaImage>> {
    match payload {
        None => Ok(None),
        Some(payload) if payload.trim().is_empty() => Ok(None),
        Some(payload) => decode_payload(payload, base_dir).map(Some),
    }
}

fn decode_payload(payload: &str, base_dir: &Path) -> Result<RgbaImage> {
    if let Some(rest) = payload.strip_prefix("data:") {
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("snapshot: malformed data url"))?;
        if !meta.ends_with(";base64") {
            bail!("snapshot: only base64 data urls are supported");
        }
        let bytes = STANDARD
            .decode(data.trim())
            .context("snapshot: decode base64 payload")?;
        let image = image::load_from_memory(&bytes).context("snapshot: decode image payload")?;
        return Ok(image.to_rgba8());
    }

    let path: PathBuf = base_dir.join(payload);
    let image = image::open(&path)
        .with_context(|| format!("snapshot: open image {}", path.display()))?;
    Ok(image.to_rgba8())
}
