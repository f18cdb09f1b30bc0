// src/extension/preview.rs

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, LazyLock};

use image::ImageReader;
use parking_lot::Mutex;
use regex::Regex;

use super::{Extension, ExtensionContext};
use crate::error::FieldError;
use crate::file::{decode_data_url, FileRecord};
use crate::view::escape_html;

const IMAGE_EXTENSIONS: &[&str] = &["png", "apng", "jpg", "jpeg", "gif", "svg", "ico"];

static SVG_ROOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<svg\b([^>]*)>").expect("valid svg root regex"));
static SVG_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)(width|height|viewBox)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid svg attribute regex")
});

/// Natural dimensions of a preloaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
enum CacheEntry {
    Loading,
    /// Loaded. Vector images without readable dimensions carry no metadata.
    Ready(Option<ImageMeta>),
    Failed,
}

/// Preloaded image metadata keyed by the exact URL it was loaded from.
///
/// Entries are never invalidated. One cache belongs to one extension instance unless it
/// is explicitly shared through [`ImagePreviewExtension::with_cache`].
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `url`, if it finished loading.
    pub fn get(&self, url: &str) -> Option<ImageMeta> {
        self.loaded(url).flatten()
    }

    /// `Some` once `url` finished loading, with its metadata when the size is known.
    fn loaded(&self, url: &str) -> Option<Option<ImageMeta>> {
        match self.entries.lock().get(url) {
            Some(CacheEntry::Ready(meta)) => Some(*meta),
            _ => None,
        }
    }

    pub fn insert(&self, url: impl Into<String>, meta: ImageMeta) {
        self.entries
            .lock()
            .insert(url.into(), CacheEntry::Ready(Some(meta)));
    }

    fn insert_unsized(&self, url: impl Into<String>) {
        self.entries.lock().insert(url.into(), CacheEntry::Ready(None));
    }

    /// Marks `url` as loading. Returns false when the URL is already known (loading,
    /// loaded or failed), in which case no new load should start.
    fn claim(&self, url: &str) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(url) {
            return false;
        }
        entries.insert(url.to_string(), CacheEntry::Loading);
        true
    }

    fn fail(&self, url: &str) {
        self.entries.lock().insert(url.to_string(), CacheEntry::Failed);
    }

    pub fn is_failed(&self, url: &str) -> bool {
        matches!(self.entries.lock().get(url), Some(CacheEntry::Failed))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Renders an inline preview with the image resolution for image files.
///
/// The first render for a URL preloads the image to learn its dimensions and renders
/// nothing; the field is re-rendered when the preload finishes.
#[derive(Debug, Clone)]
pub struct ImagePreviewExtension {
    cache: Arc<ImageCache>,
    http_client: reqwest::Client,
}

impl Default for ImagePreviewExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePreviewExtension {
    /// Creates the extension with a cache of its own.
    pub fn new() -> Self {
        Self::with_cache(Arc::new(ImageCache::new()))
    }

    /// Creates the extension on top of an explicitly shared cache.
    pub fn with_cache(cache: Arc<ImageCache>) -> Self {
        ImagePreviewExtension {
            cache,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }
}

impl Extension for ImagePreviewExtension {
    fn name(&self) -> &str {
        "image-preview"
    }

    fn matches(&self, _ctx: &ExtensionContext<'_>, record: &FileRecord) -> bool {
        looks_like_image(record)
    }

    fn render(&self, ctx: &mut ExtensionContext<'_>, record: &FileRecord) -> String {
        let Some(url) = record.url.as_deref() else {
            return String::new();
        };

        match self.cache.loaded(url) {
            Some(Some(meta)) => {
                return format!(
                    r#"<div class="UbImageExtension"><div class="ext-image-preview"><img src="{url}" width="{w}" height="{h}" alt="Preview"/></div><div class="ext-image-stats"><span class="resolution">{w} × {h} px</span></div></div>"#,
                    url = escape_html(url),
                    w = meta.width,
                    h = meta.height,
                );
            }
            Some(None) => {
                return format!(
                    r#"<div class="UbImageExtension"><div class="ext-image-preview"><img src="{url}" alt="Preview"/></div></div>"#,
                    url = escape_html(url),
                );
            }
            None => {}
        }

        if self.cache.claim(url) {
            let cache = Arc::clone(&self.cache);
            let client = self.http_client.clone();
            let url = url.to_string();
            ctx.defer_render(async move {
                match probe(&client, &url).await {
                    Ok(Some(meta)) => cache.insert(url, meta),
                    Ok(None) => cache.insert_unsized(url),
                    Err(e) => {
                        log::warn!("Image preview could not be loaded: {}", e);
                        cache.fail(&url);
                    }
                }
            });
        }

        String::new()
    }
}

/// Whether a record should be treated as an image: it needs a URL, and either an
/// `image/*` MIME type or a known image extension at the end of its name (or of the URL
/// path when the record has no name).
pub fn looks_like_image(record: &FileRecord) -> bool {
    let Some(url) = record.url.as_deref().filter(|u| !u.is_empty()) else {
        return false;
    };

    if record.mime_type.starts_with("image/") {
        return true;
    }

    let candidate = if record.name.is_empty() {
        url.split(['?', '#']).next().unwrap_or_default()
    } else {
        record.name.as_str()
    };

    match candidate.rsplit_once('.') {
        Some((_, extension)) => {
            let extension = extension.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&extension.as_str())
        }
        None => false,
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<Option<ImageMeta>, FieldError> {
    let data = if url.starts_with("data:") {
        decode_data_url(url)?.1
    } else {
        client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
    };
    measure(&data)
}

/// Dimensions of raster or SVG image bytes. SVGs that state no usable size give `None`.
fn measure(data: &[u8]) -> Result<Option<ImageMeta>, FieldError> {
    match svg_markup(data) {
        Some(markup) => Ok(svg_dimensions(markup)),
        None => dimensions(data).map(Some),
    }
}

fn svg_markup(data: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(data).ok()?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with('<') {
        return None;
    }
    SVG_ROOT_RE.is_match(text).then_some(text)
}

/// Reads the size an SVG document declares on its root element: `width` and `height`
/// in pixels, else the extent of its `viewBox`.
pub fn svg_dimensions(markup: &str) -> Option<ImageMeta> {
    let root = SVG_ROOT_RE.captures(markup)?;
    let attributes = root.get(1)?.as_str();

    let (mut width, mut height, mut view_box) = (None, None, None);
    for attr in SVG_ATTR_RE.captures_iter(attributes) {
        let value = attr.get(2).or_else(|| attr.get(3)).map(|m| m.as_str().trim());
        match attr.get(1).map(|m| m.as_str()) {
            Some(name) if name.eq_ignore_ascii_case("width") => width = value,
            Some(name) if name.eq_ignore_ascii_case("height") => height = value,
            Some(_) => view_box = value,
            None => {}
        }
    }

    let sized = width
        .and_then(svg_length)
        .zip(height.and_then(svg_length));
    let boxed = || {
        let numbers = view_box?
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        match numbers.as_slice() {
            [_, _, w, h] => Some((pixels(*w)?, pixels(*h)?)),
            _ => None,
        }
    };

    sized
        .or_else(boxed)
        .map(|(width, height)| ImageMeta { width, height })
}

fn svg_length(value: &str) -> Option<u32> {
    let number = value.strip_suffix("px").unwrap_or(value).trim();
    pixels(number.parse().ok()?)
}

fn pixels(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.5 && value <= u32::MAX as f64).then(|| value.round() as u32)
}

/// Reads image dimensions from encoded image bytes.
pub fn dimensions(data: &[u8]) -> Result<ImageMeta, FieldError> {
    let (width, height) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(ImageMeta { width, height })
}
