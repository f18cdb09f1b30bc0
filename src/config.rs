// src/config.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::FieldError;
use crate::extension::Extension;
use crate::file::{FileRecord, LocalFile};

const DEFAULT_TEXT: &[(&str, &str)] = &[
    ("no_file", "Drop a file here"),
    ("drop_file", "Drop it like it's hot"),
    ("file_selected", "File selected"),
    ("file_uploading", "Uploading..."),
    ("browse", "Browse"),
    ("delete", "Remove"),
    ("already_uploading", "Please wait for the current upload to finish"),
    ("max_files_error", "Only one file can be selected"),
    ("upload_failed", "The upload failed, please try again"),
    ("crop", "Crop"),
];

const TRANSLATIONS: &[(&str, &[(&str, &str)])] = &[(
    "nl",
    &[
        ("no_file", "Kies een bestand"),
        ("drop_file", "Drop je bestand hier"),
        ("browse", "Bladeren"),
    ],
)];

pub type StartCallback = Arc<dyn Fn(&LocalFile) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(Option<&Value>) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional hooks fired around the upload lifecycle.
#[derive(Clone, Default)]
pub struct UploadCallbacks {
    pub on_upload_start: Option<StartCallback>,
    pub on_upload_progress: Option<ProgressCallback>,
    pub on_upload_success: Option<SuccessCallback>,
    pub on_upload_error: Option<ErrorCallback>,
}

impl fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_upload_start", &self.on_upload_start.is_some())
            .field("on_upload_progress", &self.on_upload_progress.is_some())
            .field("on_upload_success", &self.on_upload_success.is_some())
            .field("on_upload_error", &self.on_upload_error.is_some())
            .finish()
    }
}

/// Resolved message table.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    messages: HashMap<String, String>,
}

impl Text {
    fn english() -> Self {
        Text {
            messages: DEFAULT_TEXT
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn overlay<'a>(&mut self, entries: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in entries {
            self.messages.insert(key.to_string(), value.to_string());
        }
    }

    /// Looks up a message. Unknown keys read back as the key itself so a missing
    /// translation is visible rather than blank.
    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        self.messages.get(key).map(String::as_str).unwrap_or(key)
    }
}

impl Default for Text {
    fn default() -> Self {
        Text::english()
    }
}

/// Raw field options, as a page would pass them to `setup`.
///
/// The serializable part can come straight from JSON (e.g. a `data-` attribute or an
/// inline script block); extensions and callbacks are attached with the builder methods.
#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct FieldOptions {
    pub lang: Option<String>,
    pub text: HashMap<String, String>,
    pub target: Option<String>,
    pub file: Option<Value>,
    #[serde(skip)]
    pub extensions: Vec<Arc<dyn Extension>>,
    #[serde(skip)]
    pub callbacks: UploadCallbacks,
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("lang", &self.lang)
            .field("text", &self.text)
            .field("target", &self.target)
            .field("file", &self.file)
            .field("extensions", &self.extensions.len())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.text.insert(key.into(), value.into());
        self
    }

    /// Pretends a file was already uploaded; `file` must be a JSON object.
    pub fn file(mut self, file: Value) -> Self {
        self.file = Some(file);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn on_upload_start(mut self, f: impl Fn(&LocalFile) + Send + Sync + 'static) -> Self {
        self.callbacks.on_upload_start = Some(Arc::new(f));
        self
    }

    pub fn on_upload_progress(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.callbacks.on_upload_progress = Some(Arc::new(f));
        self
    }

    pub fn on_upload_success(
        mut self,
        f: impl Fn(Option<&Value>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_upload_success = Some(Arc::new(f));
        self
    }

    pub fn on_upload_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_upload_error = Some(Arc::new(f));
        self
    }
}

/// Immutable per-field configuration, built once per `setup` call and shared by every
/// field it binds.
pub struct FieldConfig {
    pub target: Url,
    pub text: Text,
    pub file: Option<FileRecord>,
    pub extensions: Vec<Arc<dyn Extension>>,
    pub callbacks: UploadCallbacks,
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("target", &self.target.as_str())
            .field("file", &self.file)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FieldConfig {
    /// Resolves raw options into a field configuration.
    ///
    /// # Arguments
    /// * `options`: the raw options.
    /// * `base_url`: URL of the page hosting the field; a relative (or missing) `target`
    ///   is resolved against it the way a browser resolves a form action.
    ///
    /// # Returns
    /// The configuration, or a `FieldError` if the target cannot be resolved or the
    /// pre-seeded `file` is not a JSON object describing a file.
    pub fn new(options: FieldOptions, base_url: &Url) -> Result<Self, FieldError> {
        let target = match options.target.as_deref() {
            Some(target) => base_url.join(target)?,
            None => base_url.clone(),
        };

        let mut text = Text::english();
        if let Some(lang) = options.lang.as_deref().filter(|l| *l != "en") {
            match TRANSLATIONS.iter().find(|(code, _)| *code == lang) {
                Some((_, entries)) => text.overlay(entries.iter().copied()),
                None => log::warn!(
                    "Invalid language setting (translations do not exist): {}",
                    lang
                ),
            }
        }
        text.overlay(options.text.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let file = options.file.map(Self::seed_file).transpose()?;

        Ok(FieldConfig {
            target,
            text,
            file,
            extensions: options.extensions,
            callbacks: options.callbacks,
        })
    }

    fn seed_file(value: Value) -> Result<FileRecord, FieldError> {
        let Value::Object(given) = value else {
            return Err(FieldError::InvalidConfig(
                "`file` must be a JSON object".to_string(),
            ));
        };

        let mut merged = Map::new();
        merged.insert("name".to_string(), Value::from("unknown"));
        merged.insert("size".to_string(), Value::from(1000));
        merged.extend(given);

        let mut record: FileRecord = serde_json::from_value(Value::Object(merged))
            .map_err(|e| FieldError::InvalidConfig(format!("`file` is not a file record: {}", e)))?;
        record.uploaded = true;
        Ok(record)
    }
}
