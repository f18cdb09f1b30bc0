// src/extension/cropper.rs

use std::io::Cursor;

use image::ImageFormat;

use super::preview::looks_like_image;
use super::{Extension, ExtensionContext};
use crate::dom::{CropRegion, DomEvent, EventKind};
use crate::error::FieldError;
use crate::file::{decode_data_url, encode_data_url, FileRecord};
use crate::view::escape_html;

const CROP_NODE: &str = "go-cropper";
const CROP_ACTION: &str = "crop";

/// Offers a crop control for locally previewed images.
///
/// A cropping UI reports the chosen region as a [`DomEvent::Crop`] on the control; the
/// cropped image is re-encoded as PNG and uploaded in place of the original file, under
/// the original file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCropperExtension;

impl ImageCropperExtension {
    pub fn new() -> Self {
        ImageCropperExtension
    }
}

impl Extension for ImageCropperExtension {
    fn name(&self) -> &str {
        "image-cropper"
    }

    fn matches(&self, _ctx: &ExtensionContext<'_>, record: &FileRecord) -> bool {
        record.has_data_url() && looks_like_image(record)
    }

    fn render(&self, ctx: &mut ExtensionContext<'_>, _record: &FileRecord) -> String {
        format!(
            r##"<div class="UbCropExtension"><a class="ub-btn --go-cropper" href="#" data-ub-node="{node}">{label}</a></div>"##,
            node = CROP_NODE,
            label = escape_html(ctx.text("crop")),
        )
    }

    fn after(&self, ctx: &mut ExtensionContext<'_>, _record: &FileRecord) {
        ctx.listen(CROP_NODE, EventKind::Crop, CROP_ACTION);
    }

    fn handle(
        &self,
        ctx: &mut ExtensionContext<'_>,
        action: &str,
        event: &DomEvent,
        record: &FileRecord,
    ) {
        let (CROP_ACTION, DomEvent::Crop(region)) = (action, event) else {
            return;
        };
        let Some(url) = record.url.as_deref() else {
            return;
        };

        match crop_data_url(url, *region) {
            Ok(cropped) => ctx.replace_file(cropped, record.name.clone()),
            Err(e) => log::error!("Could not crop {}: {}", record.name, e),
        }
    }
}

/// Crops the image behind a `data:` URL and returns the result as a PNG `data:` URL.
///
/// The region is clamped to the image bounds; a region that ends up empty is an error.
pub fn crop_data_url(data_url: &str, region: CropRegion) -> Result<String, FieldError> {
    let (_, data) = decode_data_url(data_url)?;
    let source = image::load_from_memory(&data)?;

    let (width, height) = (source.width(), source.height());
    let x = region.x.min(width);
    let y = region.y.min(height);
    let w = region.width.min(width - x);
    let h = region.height.min(height - y);
    if w == 0 || h == 0 {
        return Err(FieldError::InvalidCrop(format!(
            "{}x{} at ({}, {}) is outside a {}x{} image",
            region.width, region.height, region.x, region.y, width, height
        )));
    }

    let mut encoded = Vec::new();
    source
        .crop_imm(x, y, w, h)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

    Ok(encode_data_url("image/png", &encoded))
}
