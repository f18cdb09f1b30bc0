// src/extension/mod.rs

//! Pluggable renderers that contribute UI for the file a field currently holds.
//!
//! An extension is asked, in configuration order, whether it [`matches`](Extension::matches)
//! the active [`FileRecord`]. Matching extensions get their [`render`](Extension::render)
//! output appended to the "has file" view and, once the markup is in place, their
//! [`after`](Extension::after) hook. Non-matching extensions are skipped entirely.

pub mod cropper;
pub mod preview;

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::FieldConfig;
use crate::dom::{DomEvent, EventKind};
use crate::file::FileRecord;

pub use self::cropper::ImageCropperExtension;
pub use self::preview::{ImageCache, ImageMeta, ImagePreviewExtension};

/// The capability set every extension implements.
///
/// Extensions are constructed once, handed to the configuration and never mutated
/// afterwards; any state they keep (like a preload cache) must be internally owned.
pub trait Extension: Send + Sync {
    /// Short identifier, used in logs and in the rendered view.
    fn name(&self) -> &str;

    /// Pure predicate deciding whether this extension renders for `record`.
    fn matches(&self, ctx: &ExtensionContext<'_>, record: &FileRecord) -> bool;

    /// Markup to append to the field. May return an empty fragment while an asynchronous
    /// resource is being prepared, after asking for a re-render through
    /// [`ExtensionContext::defer_render`].
    fn render(&self, ctx: &mut ExtensionContext<'_>, record: &FileRecord) -> String;

    /// Runs after the fragment is attached. Use it to bind fragment-local listeners.
    fn after(&self, _ctx: &mut ExtensionContext<'_>, _record: &FileRecord) {}

    /// Handles an event on a node bound through [`ExtensionContext::listen`].
    fn handle(
        &self,
        _ctx: &mut ExtensionContext<'_>,
        _action: &str,
        _event: &DomEvent,
        _record: &FileRecord,
    ) {
    }
}

/// Something an extension asked its field to do.
pub(crate) enum ExtensionRequest {
    Listen {
        node: String,
        kind: EventKind,
        action: String,
    },
    DeferRender(BoxFuture<'static, ()>),
    ReplaceFile {
        data_url: String,
        name: String,
    },
}

/// The view of a field an extension gets during a call.
pub struct ExtensionContext<'a> {
    field_name: &'a str,
    config: &'a FieldConfig,
    requests: Vec<ExtensionRequest>,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) fn new(field_name: &'a str, config: &'a FieldConfig) -> Self {
        ExtensionContext {
            field_name,
            config,
            requests: Vec::new(),
        }
    }

    /// Name of the form field being rendered.
    pub fn field_name(&self) -> &str {
        self.field_name
    }

    /// A message from the field's text table.
    pub fn text(&self, key: &'a str) -> &'a str {
        self.config.text.get(key)
    }

    /// Runs `work` on the field's event loop and re-renders the field once it finishes.
    pub fn defer_render<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.requests.push(ExtensionRequest::DeferRender(work.boxed()));
    }

    /// Binds `kind` events on the fragment node marked `data-ub-node="<node>"`; they come
    /// back to [`Extension::handle`] with `action`.
    pub fn listen(&mut self, node: impl Into<String>, kind: EventKind, action: impl Into<String>) {
        self.requests.push(ExtensionRequest::Listen {
            node: node.into(),
            kind,
            action: action.into(),
        });
    }

    /// Replaces the field's file with the given `data:` URL and uploads it under `name`.
    pub fn replace_file(&mut self, data_url: impl Into<String>, name: impl Into<String>) {
        self.requests.push(ExtensionRequest::ReplaceFile {
            data_url: data_url.into(),
            name: name.into(),
        });
    }

    pub(crate) fn into_requests(self) -> Vec<ExtensionRequest> {
        self.requests
    }
}
