//! Encodes captured frames and saves them under per-chapter sequence numbers.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Error};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::error::{EncodingError, ImageFormatHint};
use image::{DynamicImage, ImageError, ImageFormat, ImageResult, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureError;
use crate::logging::debug_log;
use crate::storage::{self, KeyValueStore};

pub const JPEG_QUALITY: u8 = 92;
pub const WEBP_QUALITY: f32 = 92.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Webp => "image/webp",
        }
    }

    /// PNG is lossless. JPEG drops alpha and uses [`JPEG_QUALITY`]; WEBP is
    /// lossy at [`WEBP_QUALITY`].
    pub fn encode(&self, frame: &RgbaImage) -> ImageResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        match self {
            ExportFormat::Png => frame.write_with_encoder(PngEncoder::new(&mut buffer))?,
            ExportFormat::Webp => return encode_webp(frame),
            ExportFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))?
            }
        }
        Ok(buffer.into_inner())
    }
}

fn encode_webp(frame: &RgbaImage) -> ImageResult<Vec<u8>> {
    webp::Encoder::from_rgba(frame.as_raw(), frame.width(), frame.height())
        .encode_simple(false, WEBP_QUALITY)
        .map(|memory| memory.to_vec())
        .map_err(|err| {
            ImageError::Encoding(EncodingError::new(
                ImageFormatHint::Exact(ImageFormat::WebP),
                format!("{err:?}"),
            ))
        })
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(ExportFormat::Png),
            "jpg" | "jpeg" | "image/jpeg" => Ok(ExportFormat::Jpeg),
            "webp" | "image/webp" => Ok(ExportFormat::Webp),
            other => bail!("unsupported format '{other}' (expected png, jpg or webp)"),
        }
    }
}

/// Whether opening a new chapter forgets the counters of every other chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterPolicy {
    ResetOthers,
    KeepOthers,
}

/// Chapter key to the next page number to hand out.
pub type CounterMap = BTreeMap<String, u32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub name: String,
    pub location: PathBuf,
    pub bytes: usize,
}

/// Receives encoded files, the way a browser download would.
pub trait SaveTarget: Send + Sync {
    fn save(&self, name: &str, mime: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Writes into a directory. An existing file is never overwritten; the new
/// one gets a ` (n)` suffix instead.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    dir: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, name: &str) -> PathBuf {
        let candidate = self.dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (name, String::new()),
        };
        (1..)
            .map(|n| self.dir.join(format!("{stem} ({n}){ext}")))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

impl SaveTarget for DirectoryTarget {
    fn save(&self, name: &str, _mime: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.free_path(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

pub struct DownloadSink {
    store: Arc<dyn KeyValueStore>,
    target: Arc<dyn SaveTarget>,
}

impl DownloadSink {
    pub fn new(store: Arc<dyn KeyValueStore>, target: Arc<dyn SaveTarget>) -> Self {
        Self { store, target }
    }

    pub fn counters(&self, counter_key: &str) -> CounterMap {
        storage::read_json(self.store.as_ref(), counter_key)
    }

    pub fn reset_counter(&self, counter_key: &str) {
        storage::remove_key(self.store.as_ref(), counter_key);
        debug_log("sink", format!("counter {counter_key} reset"));
    }

    /// Saves `frames` in order as `01.ext`, `02.ext`, ... continuing from the
    /// chapter's stored counter. The counter is persisted after every emitted
    /// file, so a failure partway through never hands out a used name again.
    pub fn save(
        &self,
        counter_key: &str,
        policy: CounterPolicy,
        frames: &[RgbaImage],
        chapter_key: &str,
        format: ExportFormat,
    ) -> Result<Vec<SavedFile>, CaptureError> {
        let mut counters = self.counters(counter_key);
        let next = match counters.get(chapter_key) {
            Some(&next) if next > 0 => next,
            _ => {
                if policy == CounterPolicy::ResetOthers {
                    counters.clear();
                }
                1
            }
        };

        let mut saved = Vec::with_capacity(frames.len());
        let mut page = next;
        for frame in frames {
            let name = format!("{page:02}.{}", format.extension());
            let bytes = format.encode(frame).map_err(|source| CaptureError::Encode {
                name: name.clone(),
                source,
            })?;
            let location = self
                .target
                .save(&name, format.mime(), &bytes)
                .map_err(|source| CaptureError::Save {
                    name: name.clone(),
                    source,
                })?;
            debug_log("sink", format!("saved {name} -> {}", location.display()));
            saved.push(SavedFile {
                name,
                location,
                bytes: bytes.len(),
            });
            page += 1;
            counters.insert(chapter_key.to_string(), page);
            storage::write_json(self.store.as_ref(), counter_key, &counters);
        }

        Ok(saved)
    }
}
