// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use parking_lot::Mutex;
use upload_buddy::{
    Document, ElementId, FieldError, FieldId, FieldOptions, LocalFile, Page, ProgressReporter,
    Transport, UploadRequest, UploadResponse,
};

pub const PAGE_URL: &str = "https://example.com/profile/edit";

static INIT_LOGGER: Once = Once::new();

pub fn initialize_logger_once() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Transport double: answers uploads from a queue (200 with an empty body once the queue
/// runs dry) and remembers what it was asked to send.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<UploadResponse, String>>>,
    requests: Mutex<Vec<UploadRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .push_back(Ok(UploadResponse::new(status, body)));
    }

    pub fn fail(&self, message: &str) {
        self.responses.lock().push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<UploadResponse, FieldError> {
        let total = request.file.size;
        progress.report(0, total);
        progress.report(total / 2, total);
        progress.report(total, total);

        self.requests.lock().push(request);
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(FieldError::TransportError(message)),
            None => Ok(UploadResponse::new(200, "")),
        }
    }
}

/// Handles into the page built by [`profile_page`].
pub struct Fixture {
    pub page: Page,
    pub transport: Arc<MockTransport>,
    pub form: ElementId,
    pub input: ElementId,
    pub title: ElementId,
}

impl Fixture {
    pub fn field(&self) -> FieldId {
        self.page
            .field_for(self.input)
            .expect("avatar input should be bound")
    }

    pub fn shadow_value(&self) -> String {
        let field = self.page.field(self.field()).expect("field exists");
        field.shadow_value(self.page.document()).to_string()
    }
}

/// A form with a file input `avatar` and a text input `title`.
pub fn profile_document() -> (Document, ElementId, ElementId, ElementId) {
    let mut document = Document::new();
    let body = document.body();
    let form = document.append_new(body, "form", &[("id", "profile")]);
    let title = document.append_new(form, "input", &[("type", "text"), ("name", "title")]);
    let input = document.append_new(
        form,
        "input",
        &[("type", "file"), ("name", "avatar"), ("class", "upload")],
    );
    (document, form, input, title)
}

/// The profile form with its avatar input set up using `options`.
pub fn profile_page(options: FieldOptions) -> Fixture {
    initialize_logger_once();
    let (document, form, input, title) = profile_document();
    let transport = MockTransport::new();
    let mut page =
        Page::new(PAGE_URL, document, transport.clone()).expect("page URL should parse");
    assert!(page.setup(".upload", Some(options)));
    Fixture {
        page,
        transport,
        form,
        input,
        title,
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("PNG encoding works");
    buf
}

pub fn png_file(name: &str) -> LocalFile {
    LocalFile::from_bytes(name, "image/png", png_bytes(4, 3))
}

pub fn text_file(name: &str, contents: &str) -> LocalFile {
    LocalFile::from_bytes(name, "text/plain", contents.as_bytes().to_vec())
}
