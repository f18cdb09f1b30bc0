// tests/upload_integration.rs
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use upload_buddy::{DomEvent, FieldOptions, FieldState, LocalFile, Target};

mod common;

use common::{png_file, profile_page, text_file, Fixture};

#[derive(Default)]
struct Recorded {
    started: Vec<String>,
    progress: Vec<f64>,
    success: Vec<Option<Value>>,
    errors: Vec<String>,
}

fn recording_options(options: FieldOptions) -> (FieldOptions, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let (start, progress, success, error) = (
        recorded.clone(),
        recorded.clone(),
        recorded.clone(),
        recorded.clone(),
    );
    let options = options
        .on_upload_start(move |file: &LocalFile| start.lock().started.push(file.name.clone()))
        .on_upload_progress(move |percent| progress.lock().progress.push(percent))
        .on_upload_success(move |response| success.lock().success.push(response.cloned()))
        .on_upload_error(move |body| error.lock().errors.push(body.to_string()));
    (options, recorded)
}

async fn upload(fixture: &mut Fixture, file: LocalFile) {
    let field = fixture.field();
    fixture
        .page
        .dispatch(field, Target::Input, DomEvent::Change { files: vec![file] })
        .unwrap();
    fixture.page.settle().await;
}

#[tokio::test]
async fn server_fields_are_merged_into_the_record() {
    let (options, recorded) = recording_options(FieldOptions::new().target("/upload"));
    let mut fixture = profile_page(options);
    fixture.transport.respond(200, r#"{"id": 42}"#);

    upload(&mut fixture, png_file("a.png")).await;

    let shadow: Value = serde_json::from_str(&fixture.shadow_value()).unwrap();
    assert_eq!(shadow["id"], 42);
    assert_eq!(shadow["name"], "a.png");
    assert_eq!(shadow["type"], "image/png");
    assert_eq!(shadow["size"], fixture.transport.requests()[0].file.size);
    assert_eq!(
        fixture.transport.requests()[0].target.as_str(),
        "https://example.com/upload"
    );

    let recorded = recorded.lock();
    assert_eq!(recorded.started, vec!["a.png".to_string()]);
    assert_eq!(recorded.success, vec![Some(json!({"id": 42}))]);
    assert!(recorded.errors.is_empty());
}

#[tokio::test]
async fn server_url_wins_over_the_local_preview() {
    let mut fixture = profile_page(FieldOptions::new());
    fixture
        .transport
        .respond(200, r#"{"url": "https://cdn.example.com/a.png", "name": "a.png"}"#);

    upload(&mut fixture, png_file("a.png")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    let record = field.record().unwrap();
    assert_eq!(record.url.as_deref(), Some("https://cdn.example.com/a.png"));
    assert!(record.uploaded);
    assert!(field.view().html.contains(
        r#"<a href="https://cdn.example.com/a.png" target="_blank" class="name-actual">a.png</a>"#
    ));
}

#[tokio::test]
async fn unparsable_body_still_counts_as_success() {
    let (options, recorded) = recording_options(FieldOptions::new());
    let mut fixture = profile_page(options);
    fixture.transport.respond(200, "stored!");

    upload(&mut fixture, text_file("notes.txt", "hello")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.state(), FieldState::Uploaded);
    assert_eq!(field.error(), None);
    let record = field.record().unwrap();
    assert_eq!(record.name, "notes.txt");
    assert_eq!(record.size, 5);
    assert!(record.extra.is_empty());

    assert_eq!(recorded.lock().success, vec![None]);
}

#[tokio::test]
async fn plain_text_error_body_is_shown_to_the_user() {
    let (options, recorded) = recording_options(FieldOptions::new());
    let mut fixture = profile_page(options);
    fixture.transport.respond(413, "Too large");

    upload(&mut fixture, png_file("huge.png")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.state(), FieldState::Empty);
    assert_eq!(field.error(), Some("Too large"));
    assert_eq!(field.view().error.as_deref(), Some("Too large"));
    assert_eq!(fixture.shadow_value(), "");
    assert_eq!(recorded.lock().errors, vec!["Too large".to_string()]);
}

#[tokio::test]
async fn html_error_body_gets_the_generic_message() {
    let (options, recorded) = recording_options(FieldOptions::new());
    let mut fixture = profile_page(options);
    fixture
        .transport
        .respond(500, "<html><body>Internal Server Error</body></html>");

    upload(&mut fixture, png_file("a.png")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.error(), Some("The upload failed, please try again"));
    assert_eq!(field.record(), None);
    assert_eq!(
        recorded.lock().errors,
        vec!["<html><body>Internal Server Error</body></html>".to_string()]
    );
}

#[tokio::test]
async fn transport_failure_gets_the_generic_message() {
    let (options, recorded) = recording_options(FieldOptions::new().text("upload_failed", "Nope"));
    let mut fixture = profile_page(options);
    fixture.transport.fail("connection reset");

    upload(&mut fixture, png_file("a.png")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.error(), Some("Nope"));
    assert_eq!(field.progress(), 100.0);
    assert_eq!(recorded.lock().errors, vec![String::new()]);
}

#[tokio::test]
async fn error_is_cleared_by_the_next_upload() {
    let mut fixture = profile_page(FieldOptions::new());
    fixture.transport.respond(413, "Too large");
    fixture.transport.respond(200, "");

    upload(&mut fixture, png_file("huge.png")).await;
    assert!(fixture.page.field(fixture.field()).unwrap().error().is_some());

    upload(&mut fixture, png_file("small.png")).await;
    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.error(), None);
    assert_eq!(field.state(), FieldState::Uploaded);
}

#[tokio::test]
async fn progress_is_reported_before_the_upload_finishes() {
    let (options, recorded) = recording_options(FieldOptions::new());
    let mut fixture = profile_page(options);

    upload(&mut fixture, text_file("notes.txt", "hello")).await;

    // 0% is where every upload starts, so only the moves are reported
    assert_eq!(recorded.lock().progress, vec![40.0, 100.0]);
    assert_eq!(recorded.lock().success.len(), 1);
}

#[tokio::test]
async fn panicking_callbacks_do_not_break_the_field() {
    let options = FieldOptions::new()
        .on_upload_start(|_| panic!("start hook exploded"))
        .on_upload_success(|_| panic!("success hook exploded"));
    let mut fixture = profile_page(options);

    upload(&mut fixture, png_file("a.png")).await;

    let field = fixture.page.field(fixture.field()).unwrap();
    assert_eq!(field.state(), FieldState::Uploaded);
    assert_eq!(fixture.transport.requests().len(), 1);
}

#[tokio::test]
async fn data_url_replaces_and_uploads_the_file() {
    let mut fixture = profile_page(FieldOptions::new());
    let field = fixture.field();
    upload(&mut fixture, text_file("first.txt", "one")).await;

    fixture
        .page
        .upload_data_url_as_file(field, "data:text/plain;base64,dHdv", "second.txt")
        .unwrap();
    {
        let controller = fixture.page.field(field).unwrap();
        assert_eq!(controller.state(), FieldState::Uploading);
        let record = controller.record().unwrap();
        assert_eq!(record.name, "second.txt");
        assert_eq!(record.url.as_deref(), Some("data:text/plain;base64,dHdv"));
    }

    // a second replacement while the first is in flight is refused
    assert!(fixture
        .page
        .upload_data_url_as_file(field, "data:text/plain;base64,dGhyZWU=", "third.txt")
        .is_err());

    fixture.page.settle().await;
    let requests = fixture.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].file.name, "second.txt");
    assert_eq!(requests[1].file.size, 3);
    assert_eq!(requests[1].file.mime_type, "text/plain");
    assert_eq!(
        fixture.page.field(field).unwrap().record().unwrap().name,
        "second.txt"
    );
}

#[tokio::test]
async fn invalid_data_url_leaves_the_field_alone() {
    let mut fixture = profile_page(FieldOptions::new());
    let field = fixture.field();
    upload(&mut fixture, text_file("first.txt", "one")).await;

    assert!(fixture
        .page
        .upload_data_url_as_file(field, "https://example.com/not-data", "x.txt")
        .is_err());
    assert_eq!(
        fixture.page.field(field).unwrap().record().unwrap().name,
        "first.txt"
    );
}
