// src/upload.rs

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::error::FieldError;
use crate::file::{FileRecord, LocalFile};
use crate::page::{Completion, FieldId};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One upload, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub target: Url,
    pub file: LocalFile,
}

/// What the server said. Any status counts as a response; only 200 is a success.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

impl UploadResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        UploadResponse {
            status,
            body: body.into(),
        }
    }
}

/// Hands progress from a transport back to the field that started the upload.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    field: FieldId,
    sender: UnboundedSender<(FieldId, Completion)>,
}

impl ProgressReporter {
    pub(crate) fn new(field: FieldId, sender: UnboundedSender<(FieldId, Completion)>) -> Self {
        ProgressReporter { field, sender }
    }

    /// Reports `loaded` of `total` bytes sent.
    pub fn report(&self, loaded: u64, total: u64) {
        // The page is gone when this fails; nobody is left to show progress to.
        let _ = self
            .sender
            .send((self.field, Completion::Progress { loaded, total }));
    }
}

/// Moves an upload over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the server's response, whatever its status. Errors are
    /// reserved for failures where no response came back at all.
    async fn send(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<UploadResponse, FieldError>;
}

/// Multipart-over-HTTP transport built on `reqwest`.
///
/// The file goes out as the single part `file`, with its name and MIME type, and the
/// request is marked with `X-Requested-With: XMLHttpRequest`. The body is streamed in
/// chunks so progress can be reported as it leaves.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: Client,
    chunk_size: usize,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http_client: Client) -> Self {
        HttpTransport {
            http_client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets how many bytes go out between two progress reports.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<UploadResponse, FieldError> {
        let data = request.file.read().await?;
        let total = data.len() as u64;

        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| data.slice(start..(start + self.chunk_size).min(data.len())))
            .collect();

        progress.report(0, total);
        let reporter = progress.clone();
        let mut sent = 0u64;
        let body = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            reporter.report(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let mut part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(request.file.name.clone());
        if !request.file.mime_type.is_empty() {
            part = part.mime_str(&request.file.mime_type)?;
        }
        let form = Form::new().part("file", part);

        log::debug!("--- Upload ---");
        log::debug!("URL: {}", request.target.as_str());
        log::debug!("File: {} ({} bytes)", request.file.name, total);
        log::debug!("--------------");

        let response = self
            .http_client
            .post(request.target.clone())
            .header("X-Requested-With", "XMLHttpRequest")
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        log::debug!("Upload response status: {}", status);

        Ok(UploadResponse { status, body })
    }
}

/// How a finished upload turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded {
        record: FileRecord,
        /// The parsed response object, when the body was a JSON object.
        response: Option<Value>,
    },
    Failed {
        /// What to show the user.
        message: String,
        /// The raw response body (empty when nothing came back).
        body: String,
    },
    /// The server accepted the file, but the field dropped it while it was on its way.
    Discarded {
        /// The parsed response object, when the body was a JSON object.
        response: Option<Value>,
    },
}

/// The single in-flight upload of one field.
#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    active: bool,
    progress: f64,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Progress of the current (or last) upload, in percent.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Starts an upload of `file` to `target`.
    ///
    /// # Returns
    /// The request to hand to a transport, or `FieldError::AlreadyUploading` when an
    /// upload is still in flight (which is left untouched).
    pub fn start(
        &mut self,
        file: &LocalFile,
        target: &Url,
    ) -> Result<UploadRequest, FieldError> {
        if self.is_active() {
            return Err(FieldError::AlreadyUploading);
        }
        self.active = true;
        self.progress = 0.0;
        Ok(UploadRequest {
            target: target.clone(),
            file: file.clone(),
        })
    }

    /// Records transport progress. Progress never goes backwards and an unknown (zero)
    /// total counts as done.
    ///
    /// # Returns
    /// The new percentage when it moved, `None` otherwise.
    pub fn record_progress(&mut self, loaded: u64, total: u64) -> Option<f64> {
        if !self.is_active() {
            return None;
        }
        let percent = if total == 0 {
            100.0
        } else {
            (loaded as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
        };
        if percent > self.progress {
            self.progress = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Ends the upload and reconciles the result.
    ///
    /// # Arguments
    /// * `result`: what the transport returned.
    /// * `current`: the field's record right now (it may have picked up a preview URL
    ///   since the upload started). `None` means the file was deleted in the meantime;
    ///   a success is then [`UploadOutcome::Discarded`].
    /// * `upload_failed`: the generic failure message.
    pub fn finish(
        &mut self,
        result: Result<UploadResponse, FieldError>,
        current: Option<FileRecord>,
        upload_failed: &str,
    ) -> UploadOutcome {
        self.active = false;
        self.progress = 100.0;

        match result {
            Ok(response) if response.status == 200 => {
                log::info!("File upload success: {}", response.body);
                match current {
                    Some(base) => {
                        let (record, response) = reconcile(&base, &response.body);
                        UploadOutcome::Uploaded { record, response }
                    }
                    None => {
                        log::debug!("File was deleted during upload, discarding the result");
                        UploadOutcome::Discarded {
                            response: serde_json::from_str::<Value>(&response.body)
                                .ok()
                                .filter(Value::is_object),
                        }
                    }
                }
            }
            Ok(response) => {
                log::error!(
                    "File upload error (HTTP {}): {}",
                    response.status,
                    response.body
                );
                UploadOutcome::Failed {
                    message: failure_message(Some(&response.body), upload_failed),
                    body: response.body,
                }
            }
            Err(e) => {
                log::error!("File upload error: {}", e);
                UploadOutcome::Failed {
                    message: failure_message(None, upload_failed),
                    body: String::new(),
                }
            }
        }
    }
}

/// Merges a success response into the pre-upload record.
///
/// A body that parses to a JSON object is laid over `{name, size, url, type}` from
/// `base`: server keys win, the four base keys fall back to the client's values when
/// the server leaves them out; other fields of `base` are dropped. Anything else leaves
/// the base alone. The result is always marked uploaded.
pub fn reconcile(base: &FileRecord, body: &str) -> (FileRecord, Option<Value>) {
    let mut record = FileRecord {
        uploaded: true,
        ..base.clone()
    };

    if body.is_empty() {
        return (record, None);
    }
    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object,
        _ => return (record, None),
    };

    record.extra = Map::new();
    let mut merged = base.base_fields();
    merged.extend(object.clone());
    for (key, value) in merged {
        match key.as_str() {
            "name" => match value {
                Value::String(name) => record.name = name,
                other => log::warn!("Ignoring non-string `name` in upload response: {}", other),
            },
            "size" => match value.as_u64() {
                Some(size) => record.size = size,
                None => log::warn!("Ignoring invalid `size` in upload response: {}", value),
            },
            "type" => match value {
                Value::String(mime_type) => record.mime_type = mime_type,
                other => log::warn!("Ignoring non-string `type` in upload response: {}", other),
            },
            "url" => match value {
                Value::String(url) => record.url = Some(url),
                Value::Null => record.url = None,
                other => log::warn!("Ignoring non-string `url` in upload response: {}", other),
            },
            "uploaded" => {}
            _ => {
                record.extra.insert(key, value);
            }
        }
    }

    (record, Some(Value::Object(object)))
}

/// Picks the message shown for a failed upload: a body without any `<` is taken to be a
/// plain-text error and shown as is; anything else (HTML, nothing) gets the generic text.
pub fn failure_message(body: Option<&str>, upload_failed: &str) -> String {
    match body {
        Some(body) if !body.is_empty() && !body.contains('<') => body.to_string(),
        _ => upload_failed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn png_record() -> FileRecord {
        FileRecord::new("a.png", 100, "image/png").with_url("data:...")
    }

    fn target() -> Url {
        Url::parse("https://example.com/upload").unwrap()
    }

    fn file() -> LocalFile {
        LocalFile::from_bytes("a.png", "image/png", vec![0u8; 100])
    }

    #[test]
    fn json_object_merges_over_base() {
        let (record, response) = reconcile(&png_record(), r#"{"id": 42}"#);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "name": "a.png",
                "size": 100,
                "url": "data:...",
                "type": "image/png",
                "uploaded": true,
                "id": 42
            })
        );
        assert_eq!(response, Some(json!({"id": 42})));
    }

    #[test]
    fn server_keys_win() {
        let (record, _) = reconcile(
            &png_record(),
            r#"{"url": "https://cdn.example.com/a.png", "name": "stored.png"}"#,
        );
        assert_eq!(record.url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(record.name, "stored.png");
        assert_eq!(record.size, 100);
    }

    #[test]
    fn unparsable_or_non_object_body_keeps_base() {
        for body in ["not json", "[1, 2]", "42", ""] {
            let (record, response) = reconcile(&png_record(), body);
            let mut expected = png_record();
            expected.uploaded = true;
            assert_eq!(record, expected, "body: {:?}", body);
            assert!(response.is_none());
        }
    }

    #[test]
    fn mistyped_known_keys_fall_back_to_client_values() {
        let (record, _) = reconcile(&png_record(), r#"{"size": "big", "name": 7}"#);
        assert_eq!(record.size, 100);
        assert_eq!(record.name, "a.png");
        assert!(record.extra.is_empty());
    }

    #[test]
    fn plain_text_errors_are_shown_verbatim() {
        assert_eq!(failure_message(Some("Too large"), "Upload failed"), "Too large");
        assert_eq!(
            failure_message(Some("<html><body>500</body></html>"), "Upload failed"),
            "Upload failed"
        );
        assert_eq!(failure_message(Some(""), "Upload failed"), "Upload failed");
        assert_eq!(failure_message(None, "Upload failed"), "Upload failed");
    }

    #[test]
    fn second_start_is_rejected_and_leaves_first_alone() {
        let mut session = UploadSession::new();
        session.start(&file(), &target()).unwrap();
        session.record_progress(40, 100);

        let second = session.start(&file(), &target());
        assert!(matches!(second, Err(FieldError::AlreadyUploading)));
        assert!(session.is_active());
        assert_eq!(session.progress(), 40.0);
    }

    #[test]
    fn progress_is_monotonic_and_handles_unknown_total() {
        let mut session = UploadSession::new();
        assert_eq!(session.record_progress(1, 2), None);

        session.start(&file(), &target()).unwrap();
        assert_eq!(session.record_progress(50, 100), Some(50.0));
        assert_eq!(session.record_progress(25, 100), None);
        assert_eq!(session.progress(), 50.0);
        assert_eq!(session.record_progress(0, 0), Some(100.0));
    }

    #[test]
    fn finish_always_ends_at_full_progress() {
        let mut session = UploadSession::new();
        session.start(&file(), &target()).unwrap();
        let outcome = session.finish(
            Ok(UploadResponse::new(413, "Too large")),
            Some(png_record()),
            "Upload failed",
        );
        assert_eq!(
            outcome,
            UploadOutcome::Failed {
                message: "Too large".to_string(),
                body: "Too large".to_string()
            }
        );
        assert!(!session.is_active());
        assert_eq!(session.progress(), 100.0);
    }

    #[test]
    fn transport_error_uses_generic_message() {
        let mut session = UploadSession::new();
        session.start(&file(), &target()).unwrap();
        let outcome = session.finish(
            Err(FieldError::TransportError("connection reset".to_string())),
            None,
            "Upload failed",
        );
        assert!(matches!(outcome, UploadOutcome::Failed { message, .. } if message == "Upload failed"));
    }

    #[test]
    fn success_without_current_record_is_discarded() {
        let mut session = UploadSession::new();
        session.start(&file(), &target()).unwrap();
        let outcome = session.finish(
            Ok(UploadResponse::new(200, r#"{"id": 7}"#)),
            None,
            "Upload failed",
        );
        assert_eq!(
            outcome,
            UploadOutcome::Discarded {
                response: Some(json!({"id": 7}))
            }
        );
        assert!(!session.is_active());
        assert_eq!(session.progress(), 100.0);
    }
}
