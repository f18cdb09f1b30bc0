// src/file.rs

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FieldError;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Describes the one file a field is tracking, either freshly selected or already uploaded.
///
/// The JSON form of this record is what the shadow form field carries on submit. Any keys
/// a server returns on upload that are not one of the well-known fields end up in `extra`
/// and are serialized back out flat, next to the known ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// The file name as the user (or the server) knows it.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// MIME type, possibly empty when the browser could not tell.
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Either a `data:` URL used for local previews, or the server URL after upload.
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the file made it to the server.
    #[serde(default)]
    pub uploaded: bool,
    /// Whatever else the server handed back.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        FileRecord {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            url: None,
            uploaded: false,
            extra: Map::new(),
        }
    }

    /// Record for a freshly picked file: not uploaded, no preview yet.
    pub fn from_local(file: &LocalFile) -> Self {
        FileRecord::new(file.name.clone(), file.size, file.mime_type.clone())
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// True when the URL is a local `data:` preview rather than a server location.
    pub fn has_data_url(&self) -> bool {
        self.url
            .as_deref()
            .map(|u| u.starts_with("data:"))
            .unwrap_or(false)
    }

    /// The four fields the client knows about before any server response.
    pub(crate) fn base_fields(&self) -> Map<String, Value> {
        let mut base = Map::new();
        base.insert("name".to_string(), Value::String(self.name.clone()));
        base.insert("size".to_string(), Value::from(self.size));
        base.insert(
            "url".to_string(),
            self.url.clone().map(Value::String).unwrap_or(Value::Null),
        );
        base.insert("type".to_string(), Value::String(self.mime_type.clone()));
        base
    }

    pub fn to_json(&self) -> Result<String, FieldError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Where the bytes of a [`LocalFile`] live.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file as handed over by a picker `change` event or a drop: metadata plus a way to
/// get at the contents.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
}

impl LocalFile {
    /// Creates an in-memory file.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        LocalFile {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            source: FileSource::Memory(data),
        }
    }

    /// Creates a file backed by a path on disk. The size is taken as given, like the
    /// metadata a browser reports before anything is read.
    pub fn from_path(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        path: impl Into<PathBuf>,
    ) -> Self {
        LocalFile {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            source: FileSource::Path(path.into()),
        }
    }

    /// Turns a `data:` URL (for instance a cropped image) into a file with the given name.
    pub fn from_data_url(data_url: &str, name: impl Into<String>) -> Result<Self, FieldError> {
        let (mime_type, data) = decode_data_url(data_url)?;
        Ok(LocalFile::from_bytes(name, mime_type, data))
    }

    pub async fn read(&self) -> Result<Bytes, FieldError> {
        match &self.source {
            FileSource::Memory(data) => Ok(data.clone()),
            FileSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }

    /// Reads the whole file into a `data:` URL for previewing.
    pub async fn read_as_data_url(&self) -> Result<String, FieldError> {
        let data = self.read().await?;
        Ok(encode_data_url(&self.mime_type, &data))
    }
}

pub fn encode_data_url(mime_type: &str, data: &[u8]) -> String {
    let mime_type = if mime_type.is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Splits a `data:` URL into its MIME type and decoded payload.
pub fn decode_data_url(data_url: &str) -> Result<(String, Bytes), FieldError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| FieldError::InvalidDataUrl("missing data: scheme".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| FieldError::InvalidDataUrl("missing payload separator".to_string()))?;

    let mut params = header.split(';');
    let mime_type = params.next().unwrap_or_default().trim().to_string();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        Bytes::from(STANDARD.decode(payload.trim())?)
    } else {
        Bytes::copy_from_slice(payload.as_bytes())
    };

    let mime_type = if mime_type.is_empty() {
        "text/plain".to_string()
    } else {
        mime_type
    };
    Ok((mime_type, data))
}
