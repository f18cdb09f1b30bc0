// src/controller.rs

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::FieldConfig;
use crate::dom::{Document, DomEvent, ElementId, EventKind, EventOutcome, Listeners, Target};
use crate::error::FieldError;
use crate::extension::{ExtensionContext, ExtensionRequest};
use crate::file::{FileRecord, LocalFile};
use crate::page::Completion;
use crate::upload::{UploadOutcome, UploadRequest, UploadSession};
use crate::view::{self, EmptyView, FieldView, FileView};

/// The externally observable configurations of a field. Whether an error banner is shown
/// is independent of these; see [`FieldController::error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// No file, nothing being dragged over the field.
    Empty,
    /// No file, and a drag carrying a payload hovers over the field.
    DragHover,
    /// A file is held but neither uploading nor uploaded.
    Selected,
    /// A file is on its way to the server.
    Uploading,
    /// The held file is on the server (or was pre-seeded as such).
    Uploaded,
}

#[derive(Debug, Clone, PartialEq)]
enum Handler {
    FieldChange,
    FormSubmit,
    Browse,
    Delete,
    DragEnter,
    DragOver,
    DragLeave,
    Drop,
    RefuseDrop,
    Extension { index: usize, action: String },
}

/// Asynchronous work a field hands to its page.
pub(crate) enum Task {
    ReadPreview(LocalFile),
    Upload(UploadRequest),
    Deferred(BoxFuture<'static, ()>),
}

/// Owns one upload field: its presentation state, the DOM nodes it rendered, the shadow
/// form field and its event bindings.
///
/// The controller never awaits anything. Work that has to wait (reading a preview,
/// uploading, extension preloads) is queued as tasks for the [`Page`](crate::Page), which
/// feeds the results back in.
pub struct FieldController {
    config: Arc<FieldConfig>,
    name: String,
    input: ElementId,
    form: ElementId,
    shadow: ElementId,
    widget: Option<ElementId>,

    record: Option<FileRecord>,
    error: Option<String>,
    drag_hover: bool,
    deleting: bool,
    seed_pending: bool,
    session: UploadSession,

    listeners: Listeners<Handler>,
    rendered_extensions: Vec<usize>,
    after_pending: bool,
    tasks: Vec<Task>,
    view: FieldView,
}

impl FieldController {
    /// Binds the native file input `input` and renders the replacement widget.
    ///
    /// A hidden shadow input carrying the original name is appended to the hosting form
    /// and the original input is renamed to `<name>_old`, so only the shadow value gets
    /// submitted.
    ///
    /// # Returns
    /// The controller, or `FieldError::MissingForm` when `input` is not inside a form.
    pub fn construct(
        document: &mut Document,
        input: ElementId,
        config: Arc<FieldConfig>,
    ) -> Result<Self, FieldError> {
        let name = document.get(input).name().to_string();
        let form = document
            .form_of(input)
            .ok_or_else(|| FieldError::MissingForm(format!("input named '{}'", name)))?;

        let shadow = document.create_element("input");
        {
            let shadow_el = document.get_mut(shadow);
            shadow_el.set_attribute("type", "hidden");
            shadow_el.set_name(name.clone());
            shadow_el.hidden = true;
        }
        document.append_child(form, shadow);
        document.get_mut(input).set_name(format!("{}_old", name));

        let mut field = FieldController {
            config,
            name,
            input,
            form,
            shadow,
            widget: None,
            record: None,
            error: None,
            drag_hover: false,
            deleting: false,
            seed_pending: true,
            session: UploadSession::new(),
            listeners: Listeners::default(),
            rendered_extensions: Vec::new(),
            after_pending: false,
            tasks: Vec::new(),
            view: FieldView::default(),
        };

        field.render(document);
        Ok(field)
    }

    /// Name of the form field (the one the shadow input submits under).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn input(&self) -> ElementId {
        self.input
    }

    pub fn form(&self) -> ElementId {
        self.form
    }

    pub fn shadow(&self) -> ElementId {
        self.shadow
    }

    /// The replacement widget element.
    pub fn widget(&self) -> Option<ElementId> {
        self.widget
    }

    pub fn record(&self) -> Option<&FileRecord> {
        self.record.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_uploading(&self) -> bool {
        self.session.is_active()
    }

    pub fn is_drag_hover(&self) -> bool {
        self.drag_hover
    }

    /// Upload progress in percent.
    pub fn progress(&self) -> f64 {
        self.session.progress()
    }

    /// The result of the last render pass.
    pub fn view(&self) -> &FieldView {
        &self.view
    }

    pub fn shadow_value<'d>(&self, document: &'d Document) -> &'d str {
        &document.get(self.shadow).value
    }

    pub fn is_bound(&self, target: &Target, kind: EventKind) -> bool {
        self.listeners.is_bound(target, kind)
    }

    /// An upload still running for a file that was deleted does not count: the field is
    /// empty again.
    pub fn state(&self) -> FieldState {
        match &self.record {
            Some(_) if self.session.is_active() => FieldState::Uploading,
            Some(record) if record.uploaded => FieldState::Uploaded,
            Some(_) => FieldState::Selected,
            None if self.drag_hover => FieldState::DragHover,
            None => FieldState::Empty,
        }
    }

    // -----------------------------------------------------------------------------------
    // Rendering

    /// Rebuilds the widget from the current state and re-binds every listener.
    ///
    /// Safe to call any number of times: markup and class list are replaced, not
    /// appended to, and bindings on rendered nodes are dropped before being bound again.
    pub fn render(&mut self, document: &mut Document) {
        {
            let input = document.get_mut(self.input);
            input.add_class("--ub-hidden");
            input.set_attribute("type", "file");
            input.set_attribute("ub-bound", "1");
            input.hidden = true;
        }

        if std::mem::take(&mut self.seed_pending) && !self.deleting {
            if let Some(seed) = self.config.file.clone() {
                self.write_shadow(document, Some(&seed));
                document.get_mut(self.input).value.clear();
                self.record = Some(seed);
            }
        }

        let config = Arc::clone(&self.config);

        self.view = match self.record.clone() {
            Some(record) => {
                let fragments = self.render_extensions(&record);
                view::render_file(
                    &config.text,
                    FileView {
                        error: self.error.as_deref(),
                        record: &record,
                        uploading: self.session.is_active(),
                        progress: self.session.progress(),
                        fragments,
                    },
                )
            }
            None => {
                self.rendered_extensions.clear();
                view::render_empty(
                    &config.text,
                    EmptyView {
                        error: self.error.as_deref(),
                        dragging: self.drag_hover,
                    },
                )
            }
        };

        let widget = match self.widget {
            Some(widget) => widget,
            None => {
                let widget = document.create_element("div");
                self.widget = Some(widget);
                widget
            }
        };
        if let Some(parent) = document.get(self.input).parent() {
            document.insert_before(parent, widget, self.input);
        }
        {
            let widget_el = document.get_mut(widget);
            widget_el.set_classes(self.view.classes.iter().cloned());
            widget_el.inner_html = self.view.html.clone();
        }

        self.bind_listeners();
        self.after_pending = true;
    }

    fn bind_listeners(&mut self) {
        self.listeners.unbind_rendered();
        self.listeners
            .bind(Target::Input, EventKind::Change, Handler::FieldChange);
        self.listeners
            .bind(Target::Form, EventKind::Submit, Handler::FormSubmit);

        if self.view.has_browse {
            self.listeners
                .bind(Target::Browse, EventKind::Click, Handler::Browse);
            // while empty, the whole widget is a drop zone and a browse control
            self.listeners
                .bind(Target::Widget, EventKind::DragEnter, Handler::DragEnter);
            self.listeners
                .bind(Target::Widget, EventKind::DragOver, Handler::DragOver);
            self.listeners
                .bind(Target::Widget, EventKind::DragLeave, Handler::DragLeave);
            self.listeners
                .bind(Target::Widget, EventKind::Drop, Handler::Drop);
            self.listeners
                .bind(Target::Widget, EventKind::Click, Handler::Browse);
        } else {
            // files dropped on a widget that holds one must not open in the browser
            self.listeners
                .bind(Target::Widget, EventKind::DragOver, Handler::RefuseDrop);
            self.listeners
                .bind(Target::Widget, EventKind::Drop, Handler::RefuseDrop);
        }
        if self.view.has_delete {
            self.listeners
                .bind(Target::Delete, EventKind::Click, Handler::Delete);
        }
    }

    fn render_extensions(&mut self, record: &FileRecord) -> Vec<(String, String)> {
        let config = Arc::clone(&self.config);
        let name = self.name.clone();
        let mut fragments = Vec::new();
        let mut rendered = Vec::new();
        let mut requests = Vec::new();

        for (index, extension) in config.extensions.iter().enumerate() {
            let mut ctx = ExtensionContext::new(&name, &config);
            if !extension.matches(&ctx, record) {
                continue;
            }
            let fragment = guarded(extension.name(), "render", || {
                extension.render(&mut ctx, record)
            })
            .unwrap_or_default();
            fragments.push((extension.name().to_string(), fragment));
            rendered.push(index);
            requests.extend(ctx.into_requests().into_iter().map(|r| (index, r)));
        }

        self.rendered_extensions = rendered;
        for (index, request) in requests {
            if let Some((_, file_name)) = self.absorb(index, request) {
                log::warn!(
                    "Ignoring file replacement '{}' requested while rendering",
                    file_name
                );
            }
        }
        fragments
    }

    /// Applies one extension request. File replacements are handed back to the caller,
    /// which decides whether they may run.
    fn absorb(&mut self, index: usize, request: ExtensionRequest) -> Option<(String, String)> {
        match request {
            ExtensionRequest::Listen { node, kind, action } => {
                self.listeners.bind(
                    Target::Fragment(node),
                    kind,
                    Handler::Extension { index, action },
                );
                None
            }
            ExtensionRequest::DeferRender(work) => {
                self.tasks.push(Task::Deferred(work));
                None
            }
            ExtensionRequest::ReplaceFile { data_url, name } => Some((data_url, name)),
        }
    }

    /// Runs the `after` hooks of the extensions rendered by the last pass, once.
    pub fn flush_after_hooks(&mut self) {
        if !std::mem::take(&mut self.after_pending) || self.rendered_extensions.is_empty() {
            return;
        }
        let Some(record) = self.record.clone() else {
            return;
        };

        let config = Arc::clone(&self.config);
        let name = self.name.clone();
        for index in self.rendered_extensions.clone() {
            let extension = &config.extensions[index];
            let mut ctx = ExtensionContext::new(&name, &config);
            guarded(extension.name(), "after", || extension.after(&mut ctx, &record));
            for request in ctx.into_requests() {
                if let Some((_, file_name)) = self.absorb(index, request) {
                    log::warn!(
                        "Ignoring file replacement '{}' requested from an after hook",
                        file_name
                    );
                }
            }
        }
    }

    pub(crate) fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }

    // -----------------------------------------------------------------------------------
    // Events

    /// Delivers `event` to whatever this field has bound on `target`.
    pub fn dispatch(
        &mut self,
        document: &mut Document,
        target: &Target,
        event: DomEvent,
    ) -> EventOutcome {
        let Some(handler) = self.listeners.get(target, event.kind()).cloned() else {
            return EventOutcome::default();
        };

        let default_prevented = match handler {
            Handler::FieldChange => {
                if let DomEvent::Change { files } = event {
                    self.accept_files(document, files);
                    self.render(document);
                }
                false
            }
            Handler::FormSubmit => {
                log::debug!(
                    "Form submitted with '{}' = {}",
                    self.name,
                    self.shadow_value(document)
                );
                false
            }
            Handler::Browse => {
                self.error = None;
                // opens the native picker
                document.click(self.input);
                self.render(document);
                true
            }
            Handler::Delete => {
                self.delete(document);
                true
            }
            Handler::DragEnter | Handler::DragOver => {
                if !self.drag_hover {
                    self.drag_hover = true;
                    self.render(document);
                }
                true
            }
            Handler::DragLeave => {
                self.leave_drag(document);
                false
            }
            Handler::Drop => {
                self.leave_drag(document);
                if let DomEvent::Drop { files } = event {
                    self.accept_files(document, files);
                    self.render(document);
                }
                true
            }
            Handler::RefuseDrop => true,
            Handler::Extension { index, action } => {
                self.run_extension_action(document, index, &action, &event);
                true
            }
        };

        EventOutcome {
            handled: true,
            default_prevented,
        }
    }

    fn leave_drag(&mut self, document: &mut Document) {
        if self.drag_hover {
            self.drag_hover = false;
            self.render(document);
        }
    }

    fn run_extension_action(
        &mut self,
        document: &mut Document,
        index: usize,
        action: &str,
        event: &DomEvent,
    ) {
        let Some(record) = self.record.clone() else {
            return;
        };
        let config = Arc::clone(&self.config);
        let Some(extension) = config.extensions.get(index) else {
            return;
        };

        let name = self.name.clone();
        let mut ctx = ExtensionContext::new(&name, &config);
        guarded(extension.name(), "handle", || {
            extension.handle(&mut ctx, action, event, &record)
        });

        let replacements: Vec<_> = ctx
            .into_requests()
            .into_iter()
            .filter_map(|request| self.absorb(index, request))
            .collect();
        for (data_url, file_name) in replacements {
            if let Err(e) = self.upload_data_url_as_file(document, &data_url, &file_name) {
                log::error!("Could not upload '{}' from data URL: {}", file_name, e);
            }
        }
    }

    /// Clears the file. The pre-seeded file from the configuration never comes back after
    /// this, for the lifetime of the controller.
    pub fn delete(&mut self, document: &mut Document) {
        self.error = None;
        self.deleting = true;
        self.drag_hover = false;
        self.record = None;
        document.get_mut(self.input).value.clear();
        self.write_shadow(document, None);
        self.render(document);
    }

    /// Replaces the file with the contents of a `data:` URL (e.g. a cropped image) and
    /// uploads it under `file_name`.
    pub fn upload_data_url_as_file(
        &mut self,
        document: &mut Document,
        data_url: &str,
        file_name: &str,
    ) -> Result<(), FieldError> {
        if self.session.is_active() {
            self.error = Some(self.config.text.get("already_uploading").to_string());
            self.render(document);
            return Err(FieldError::AlreadyUploading);
        }

        let file = LocalFile::from_data_url(data_url, file_name)?;
        self.delete(document);

        log::info!("Virtual file selection (from data URL): {}", file.name);
        self.record = Some(FileRecord::from_local(&file).with_url(data_url));
        self.start_upload(document, file);
        self.render(document);
        Ok(())
    }

    fn accept_files(&mut self, document: &mut Document, files: Vec<LocalFile>) {
        if files.len() > 1 {
            self.error = Some(self.config.text.get("max_files_error").to_string());
            return;
        }
        let Some(file) = files.into_iter().next() else {
            return;
        };
        if self.session.is_active() {
            self.error = Some(self.config.text.get("already_uploading").to_string());
            return;
        }

        log::info!("File selection: {} ({} bytes)", file.name, file.size);
        self.record = Some(FileRecord::from_local(&file));
        self.tasks.push(Task::ReadPreview(file.clone()));
        self.start_upload(document, file);
    }

    fn start_upload(&mut self, document: &mut Document, file: LocalFile) {
        self.error = None;

        match self.session.start(&file, &self.config.target) {
            Ok(request) => {
                self.write_shadow(document, None);
                if let Some(callback) = &self.config.callbacks.on_upload_start {
                    guarded("onUploadStart", "callback", || callback(&file));
                }
                self.tasks.push(Task::Upload(request));
            }
            Err(_) => {
                self.error = Some(self.config.text.get("already_uploading").to_string());
            }
        }
    }

    // -----------------------------------------------------------------------------------
    // Completions

    pub(crate) fn complete(&mut self, document: &mut Document, completion: Completion) {
        match completion {
            Completion::Preview { name, result } => match result {
                Ok(url) => {
                    let current = self
                        .record
                        .as_mut()
                        .filter(|record| record.name == name && record.url.is_none());
                    match current {
                        Some(record) => {
                            record.url = Some(url);
                            // an upload that finished first already wrote the record without it
                            if record.uploaded {
                                let record = record.clone();
                                self.write_shadow(document, Some(&record));
                            }
                            self.render(document);
                        }
                        None => log::debug!("Discarding stale preview for {}", name),
                    }
                }
                Err(e) => log::warn!("Preview URL could not be generated for {}: {}", name, e),
            },
            Completion::Progress { loaded, total } => {
                if let Some(percent) = self.session.record_progress(loaded, total) {
                    if let Some(callback) = &self.config.callbacks.on_upload_progress {
                        guarded("onUploadProgress", "callback", || callback(percent));
                    }
                    self.render(document);
                }
            }
            Completion::Upload(result) => {
                let upload_failed = self.config.text.get("upload_failed").to_string();
                let outcome = self
                    .session
                    .finish(result, self.record.clone(), &upload_failed);
                document.get_mut(self.input).value.clear();

                match outcome {
                    UploadOutcome::Uploaded { record, response } => {
                        self.error = None;
                        self.write_shadow(document, Some(&record));
                        self.record = Some(record);
                        if let Some(callback) = &self.config.callbacks.on_upload_success {
                            guarded("onUploadSuccess", "callback", || {
                                callback(response.as_ref())
                            });
                        }
                    }
                    UploadOutcome::Failed { message, body } => {
                        self.record = None;
                        self.write_shadow(document, None);
                        self.error = Some(message);
                        if let Some(callback) = &self.config.callbacks.on_upload_error {
                            guarded("onUploadError", "callback", || callback(body.as_str()));
                        }
                    }
                    UploadOutcome::Discarded { response } => {
                        log::info!(
                            "Upload for '{}' finished after its file was deleted",
                            self.name
                        );
                        if let Some(callback) = &self.config.callbacks.on_upload_success {
                            guarded("onUploadSuccess", "callback", || {
                                callback(response.as_ref())
                            });
                        }
                    }
                }
                self.render(document);
            }
            Completion::Rerender => self.render(document),
        }
    }

    fn write_shadow(&self, document: &mut Document, record: Option<&FileRecord>) {
        let value = match record.map(FileRecord::to_json).transpose() {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                log::error!("Could not serialize file record for '{}': {}", self.name, e);
                String::new()
            }
        };
        document.get_mut(self.shadow).value = value;
    }
}

/// Runs user-supplied code (extension hooks, callbacks) so that a panic inside it is
/// logged instead of tearing down the field.
fn guarded<T>(who: &str, what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            log::error!("{} panicked in {}; ignoring", who, what);
            None
        }
    }
}
