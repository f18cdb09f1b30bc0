// src/page.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

use crate::config::{FieldConfig, FieldOptions};
use crate::controller::{FieldController, Task};
use crate::dom::{Document, DomEvent, ElementId, EventOutcome, Target};
use crate::error::FieldError;
use crate::upload::{HttpTransport, ProgressReporter, Transport, UploadResponse};

/// Handle to a field set up on a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Result of a piece of asynchronous work, routed back to the field that asked for it.
#[derive(Debug)]
pub(crate) enum Completion {
    Preview {
        name: String,
        result: Result<String, FieldError>,
    },
    Progress {
        loaded: u64,
        total: u64,
    },
    Upload(Result<UploadResponse, FieldError>),
    Rerender,
}

type Message = (FieldId, Completion);

/// A document with upload fields on it, plus the event loop driving their asynchronous
/// work.
///
/// Events are delivered with [`dispatch`](Page::dispatch); they run to completion
/// synchronously. Work they start (uploads, previews, extension preloads) only advances
/// while the page is driven with [`step`](Page::step) or [`settle`](Page::settle), and
/// its results are applied one at a time, upload progress first.
pub struct Page {
    location: Url,
    document: Document,
    transport: Arc<dyn Transport>,
    fields: Vec<FieldController>,
    by_input: HashMap<ElementId, FieldId>,
    work: FuturesUnordered<BoxFuture<'static, Message>>,
    finished: VecDeque<Message>,
    sender: UnboundedSender<Message>,
    receiver: UnboundedReceiver<Message>,
}

impl Page {
    /// Creates a page served from `location`, which relative upload targets resolve
    /// against.
    pub fn new(
        location: &str,
        document: Document,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, FieldError> {
        let location = Url::parse(location)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Page {
            location,
            document,
            transport,
            fields: Vec::new(),
            by_input: HashMap::new(),
            work: FuturesUnordered::new(),
            finished: VecDeque::new(),
            sender,
            receiver,
        })
    }

    /// Creates a page that uploads over HTTP.
    pub fn with_http(location: &str, document: Document) -> Result<Self, FieldError> {
        Self::new(location, document, Arc::new(HttpTransport::new()))
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Turns every file input matching `selector` into an upload field.
    ///
    /// Inputs that are already bound are skipped, as are inputs that fail to set up (for
    /// example because they are not inside a form); the failure is logged.
    ///
    /// # Returns
    /// `false`, after logging why, when the selector is invalid or matches nothing or
    /// when `options` cannot be turned into a configuration. `true` otherwise.
    pub fn setup(&mut self, selector: &str, options: Option<FieldOptions>) -> bool {
        let selection = match self.document.query_selector_all(selector) {
            Ok(selection) if !selection.is_empty() => selection,
            Ok(_) => {
                log::error!("Setup failed: {}", FieldError::NoMatch(selector.to_string()));
                return false;
            }
            Err(e) => {
                log::error!("Setup failed: {}", e);
                return false;
            }
        };

        let config = match FieldConfig::new(options.unwrap_or_default(), &self.location) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                log::error!("Could not process configuration input: {}", e);
                return false;
            }
        };

        for element in selection {
            let input = self.document.get(element);
            if input.has_class("--ub-hidden") || input.attribute("ub-bound").is_some() {
                log::debug!("Skipping already bound input {:?}", element);
                continue;
            }

            match FieldController::construct(&mut self.document, element, Arc::clone(&config)) {
                Ok(field) => {
                    let id = FieldId(self.fields.len());
                    log::debug!("Set up field '{}' as {:?}", field.name(), id);
                    self.fields.push(field);
                    self.by_input.insert(element, id);
                    self.schedule(id);
                }
                Err(e) => log::error!("Error in field set up for {:?}: {}", element, e),
            }
        }
        true
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldController> {
        self.fields.get(id.0)
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldController)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(index, field)| (FieldId(index), field))
    }

    /// The field bound to the file input `input`.
    pub fn field_for(&self, input: ElementId) -> Option<FieldId> {
        self.by_input.get(&input).copied()
    }

    /// Delivers `event` on `target` of `field`.
    pub fn dispatch(
        &mut self,
        field: FieldId,
        target: Target,
        event: DomEvent,
    ) -> Result<EventOutcome, FieldError> {
        let controller = self
            .fields
            .get_mut(field.0)
            .ok_or(FieldError::UnknownField(field.0))?;
        let outcome = controller.dispatch(&mut self.document, &target, event);
        self.schedule(field);
        Ok(outcome)
    }

    /// Clears the file of `field`, like its delete control does.
    pub fn delete(&mut self, field: FieldId) -> Result<(), FieldError> {
        let controller = self
            .fields
            .get_mut(field.0)
            .ok_or(FieldError::UnknownField(field.0))?;
        controller.delete(&mut self.document);
        self.schedule(field);
        Ok(())
    }

    /// Replaces the file of `field` with the contents of `data_url` and uploads it.
    pub fn upload_data_url_as_file(
        &mut self,
        field: FieldId,
        data_url: &str,
        file_name: &str,
    ) -> Result<(), FieldError> {
        let controller = self
            .fields
            .get_mut(field.0)
            .ok_or(FieldError::UnknownField(field.0))?;
        let result = controller.upload_data_url_as_file(&mut self.document, data_url, file_name);
        self.schedule(field);
        result
    }

    /// Re-renders `field` from its current state.
    pub fn render(&mut self, field: FieldId) -> Result<(), FieldError> {
        let controller = self
            .fields
            .get_mut(field.0)
            .ok_or(FieldError::UnknownField(field.0))?;
        controller.render(&mut self.document);
        self.schedule(field);
        Ok(())
    }

    /// Submits `form`: every field hosted by it sees the submit event, then the name/value
    /// pairs the form would send are returned.
    pub fn submit(&mut self, form: ElementId) -> Vec<(String, String)> {
        let hosted: Vec<FieldId> = self
            .fields()
            .filter(|(_, field)| field.form() == form)
            .map(|(id, _)| id)
            .collect();
        for id in hosted {
            if let Err(e) = self.dispatch(id, Target::Form, DomEvent::Submit) {
                log::error!("Submit could not reach {:?}: {}", id, e);
            }
        }
        self.document.form_data(form)
    }

    /// Number of asynchronous jobs still running or waiting to be applied.
    pub fn pending(&self) -> usize {
        self.work.len() + self.finished.len()
    }

    /// Applies the next available result to its field, waiting for one if needed.
    ///
    /// # Returns
    /// `false` once there is nothing left to wait for.
    pub async fn step(&mut self) -> bool {
        if let Ok((field, completion)) = self.receiver.try_recv() {
            self.apply(field, completion);
            return true;
        }
        if let Some((field, completion)) = self.finished.pop_front() {
            self.apply(field, completion);
            return true;
        }
        if self.work.is_empty() {
            return false;
        }

        enum Next {
            Progress(Message),
            Finished(Message),
        }
        let next = tokio::select! {
            biased;
            Some(message) = self.receiver.recv() => Next::Progress(message),
            Some(message) = self.work.next() => Next::Finished(message),
            else => return false,
        };

        match next {
            Next::Progress((field, completion)) => self.apply(field, completion),
            // progress sent while this job ran is applied before its result
            Next::Finished(message) => self.finished.push_back(message),
        }
        true
    }

    /// Drives the page until no asynchronous work is left.
    pub async fn settle(&mut self) {
        while self.step().await {}
    }

    fn apply(&mut self, field: FieldId, completion: Completion) {
        let Some(controller) = self.fields.get_mut(field.0) else {
            log::warn!("Dropping completion for unknown {:?}", field);
            return;
        };
        controller.complete(&mut self.document, completion);
        self.schedule(field);
    }

    /// Runs pending `after` hooks of `field` and starts the work it queued.
    fn schedule(&mut self, id: FieldId) {
        let tasks = match self.fields.get_mut(id.0) {
            Some(field) => {
                field.flush_after_hooks();
                field.take_tasks()
            }
            None => return,
        };

        for task in tasks {
            let job: BoxFuture<'static, Message> = match task {
                Task::ReadPreview(file) => async move {
                    let result = file.read_as_data_url().await;
                    (
                        id,
                        Completion::Preview {
                            name: file.name,
                            result,
                        },
                    )
                }
                .boxed(),
                Task::Upload(request) => {
                    let transport = Arc::clone(&self.transport);
                    let progress = ProgressReporter::new(id, self.sender.clone());
                    async move {
                        let result = transport.send(request, progress).await;
                        (id, Completion::Upload(result))
                    }
                    .boxed()
                }
                Task::Deferred(work) => async move {
                    work.await;
                    (id, Completion::Rerender)
                }
                .boxed(),
            };
            self.work.push(job);
        }
    }
}
