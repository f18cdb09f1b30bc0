pub mod config;
pub mod controller;
pub mod dom;
pub mod error;
pub mod extension;
pub mod file;
pub mod page;
pub mod upload;
pub mod view;

pub use config::{FieldConfig, FieldOptions, Text, UploadCallbacks};
pub use controller::{FieldController, FieldState};
pub use dom::{CropRegion, Document, DomEvent, ElementId, EventKind, EventOutcome, Target};
pub use error::FieldError;
pub use extension::{Extension, ExtensionContext, ImageCropperExtension, ImagePreviewExtension};
pub use file::{FileRecord, LocalFile};
pub use page::{FieldId, Page};
pub use upload::{HttpTransport, ProgressReporter, Transport, UploadRequest, UploadResponse};
