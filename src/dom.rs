// src/dom.rs

//! A small in-memory document: just enough of the browser DOM for a field to find its
//! input, hang a shadow field off the hosting form and render its own markup.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::FieldError;
use crate::file::LocalFile;

static COMPOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([A-Za-z][\w-]*|\*)?((?:[#.][\w-]+|\[[\w-]+(?:=(?:"[^"]*"|'[^']*'|[^\]]*))?\])*)$"#)
        .expect("compound selector pattern is valid")
});

static PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([#.])([\w-]+)|\[([\w-]+)(?:=("[^"]*"|'[^']*'|[^\]]*))?\]"#)
        .expect("selector part pattern is valid")
});

/// Handle to an element inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub value: String,
    pub hidden: bool,
    pub inner_html: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    clicks: u32,
}

impl Element {
    fn new(tag: &str) -> Self {
        Element {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn name(&self) -> &str {
        self.attribute("name").unwrap_or_default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set_attribute("name", name);
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    /// Replaces the whole class list, like assigning `className`.
    pub fn set_classes<I, S>(&mut self, classes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes.clear();
        for class in classes {
            let class = class.into();
            if !self.has_class(&class) {
                self.classes.push(class);
            }
        }
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    /// Number of (synthetic) clicks the element received.
    pub fn clicks(&self) -> u32 {
        self.clicks
    }
}

/// Element arena. Index 0 is always `<body>`.
#[derive(Debug, Clone)]
pub struct Document {
    elements: Vec<Element>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Document {
            elements: vec![Element::new("body")],
        }
    }

    pub fn body(&self) -> ElementId {
        ElementId(0)
    }

    pub fn create_element(&mut self, tag: &str) -> ElementId {
        self.elements.push(Element::new(tag));
        ElementId(self.elements.len() - 1)
    }

    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0]
    }

    fn detach(&mut self, child: ElementId) {
        if let Some(old_parent) = self.elements[child.0].parent.take() {
            self.elements[old_parent.0].children.retain(|c| *c != child);
        }
    }

    pub fn append_child(&mut self, parent: ElementId, child: ElementId) {
        self.detach(child);
        self.elements[parent.0].children.push(child);
        self.elements[child.0].parent = Some(parent);
    }

    /// Inserts `child` right before `reference` under `parent`; appends when `reference`
    /// is not a child of `parent`.
    pub fn insert_before(&mut self, parent: ElementId, child: ElementId, reference: ElementId) {
        if child == reference {
            return;
        }
        self.detach(child);
        let children = &mut self.elements[parent.0].children;
        match children.iter().position(|c| *c == reference) {
            Some(index) => children.insert(index, child),
            None => children.push(child),
        }
        self.elements[child.0].parent = Some(parent);
    }

    /// Convenience for building pages: creates an element with attributes and appends it.
    pub fn append_new(
        &mut self,
        parent: ElementId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> ElementId {
        let id = self.create_element(tag);
        for (name, value) in attributes {
            if *name == "class" {
                self.get_mut(id).set_classes(value.split_whitespace());
            } else {
                self.get_mut(id).set_attribute(name, *value);
            }
        }
        self.append_child(parent, id);
        id
    }

    pub fn click(&mut self, id: ElementId) {
        self.elements[id.0].clicks += 1;
    }

    /// Elements below `root` (not including it), in document order.
    pub fn descendants(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self.get(root).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        out
    }

    /// The nearest ancestor `<form>`, i.e. what a browser exposes as `input.form`.
    pub fn form_of(&self, id: ElementId) -> Option<ElementId> {
        let mut current = self.get(id).parent;
        while let Some(parent) = current {
            if self.get(parent).tag == "form" {
                return Some(parent);
            }
            current = self.get(parent).parent;
        }
        None
    }

    /// Name/value pairs a native submission of `form` would carry. File inputs are left
    /// out; their contents are not part of the value set.
    pub fn form_data(&self, form: ElementId) -> Vec<(String, String)> {
        self.descendants(form)
            .into_iter()
            .map(|id| self.get(id))
            .filter(|el| el.tag == "input" || el.tag == "textarea" || el.tag == "select")
            .filter(|el| !el.name().is_empty())
            .filter(|el| el.attribute("type") != Some("file"))
            .map(|el| (el.name().to_string(), el.value.clone()))
            .collect()
    }

    /// Resolves a selector against the whole document, in document order.
    ///
    /// Supports comma-separated compound selectors: an optional tag (or `*`) followed by
    /// any number of `#id`, `.class`, `[attr]` and `[attr=value]` parts. Combinators are
    /// not supported.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, FieldError> {
        let groups = selector
            .split(',')
            .map(|group| Compound::parse(group.trim(), selector))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .descendants(self.body())
            .into_iter()
            .filter(|id| groups.iter().any(|g| g.matches(self.get(*id))))
            .collect())
    }
}

#[derive(Debug)]
enum Condition {
    Id(String),
    Class(String),
    HasAttribute(String),
    AttributeEquals(String, String),
}

#[derive(Debug)]
struct Compound {
    tag: Option<String>,
    conditions: Vec<Condition>,
}

impl Compound {
    fn parse(group: &str, full: &str) -> Result<Self, FieldError> {
        if group.is_empty() {
            return Err(FieldError::InvalidSelector(full.to_string()));
        }
        let captures = COMPOUND_RE
            .captures(group)
            .ok_or_else(|| FieldError::InvalidSelector(full.to_string()))?;

        let tag = captures
            .get(1)
            .map(|m| m.as_str())
            .filter(|t| *t != "*")
            .map(str::to_ascii_lowercase);

        let rest = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let conditions = PART_RE
            .captures_iter(rest)
            .map(|part| {
                if let (Some(kind), Some(ident)) = (part.get(1), part.get(2)) {
                    let ident = ident.as_str().to_string();
                    return if kind.as_str() == "#" {
                        Condition::Id(ident)
                    } else {
                        Condition::Class(ident)
                    };
                }
                let attr = part.get(3).map(|m| m.as_str()).unwrap_or_default().to_string();
                match part.get(4) {
                    Some(value) => {
                        let value = value.as_str().trim_matches(|c| c == '"' || c == '\'');
                        Condition::AttributeEquals(attr, value.to_string())
                    }
                    None => Condition::HasAttribute(attr),
                }
            })
            .collect();

        Ok(Compound { tag, conditions })
    }

    fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if *tag != element.tag {
                return false;
            }
        }
        self.conditions.iter().all(|condition| match condition {
            Condition::Id(id) => element.attribute("id") == Some(id.as_str()),
            Condition::Class(class) => element.has_class(class),
            Condition::HasAttribute(attr) => element.attribute(attr).is_some(),
            Condition::AttributeEquals(attr, value) => {
                element.attribute(attr) == Some(value.as_str())
            }
        })
    }
}

/// Rectangle, in source image pixels, that a cropping UI reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The nodes a field controller owns and can listen on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// The original (now hidden) file input.
    Input,
    /// The hosting form.
    Form,
    /// The replacement widget as a whole.
    Widget,
    /// The browse control of the empty view.
    Browse,
    /// The delete control of the uploaded view.
    Delete,
    /// A node inside an extension fragment, marked with `data-ub-node`.
    Fragment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Change,
    Click,
    DragEnter,
    DragOver,
    DragLeave,
    Drop,
    Submit,
    Crop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    /// The picker closed with this selection.
    Change { files: Vec<LocalFile> },
    Click,
    DragEnter,
    DragOver,
    DragLeave,
    /// Files dropped onto the target.
    Drop { files: Vec<LocalFile> },
    Submit,
    /// A cropping UI confirmed a region.
    Crop(CropRegion),
}

impl DomEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomEvent::Change { .. } => EventKind::Change,
            DomEvent::Click => EventKind::Click,
            DomEvent::DragEnter => EventKind::DragEnter,
            DomEvent::DragOver => EventKind::DragOver,
            DomEvent::DragLeave => EventKind::DragLeave,
            DomEvent::Drop { .. } => EventKind::Drop,
            DomEvent::Submit => EventKind::Submit,
            DomEvent::Crop(_) => EventKind::Crop,
        }
    }
}

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    /// A listener was bound for the target and ran.
    pub handled: bool,
    /// The listener suppressed the browser's default handling.
    pub default_prevented: bool,
}

/// Per-controller listener bindings, keyed by node and event kind.
///
/// Binding an already-bound pair replaces the handler, so re-binding after a re-render
/// never stacks duplicate listeners.
#[derive(Debug, Clone)]
pub struct Listeners<H> {
    bound: BTreeMap<(Target, EventKind), H>,
}

impl<H> Default for Listeners<H> {
    fn default() -> Self {
        Listeners {
            bound: BTreeMap::new(),
        }
    }
}

impl<H> Listeners<H> {
    pub fn bind(&mut self, target: Target, kind: EventKind, handler: H) {
        self.bound.insert((target, kind), handler);
    }

    pub fn unbind(&mut self, target: &Target, kind: EventKind) -> Option<H> {
        self.bound.remove(&(target.clone(), kind))
    }

    /// Drops every binding on nodes that live inside the rendered markup.
    pub fn unbind_rendered(&mut self) {
        self.bound
            .retain(|(target, _), _| matches!(target, Target::Input | Target::Form));
    }

    pub fn get(&self, target: &Target, kind: EventKind) -> Option<&H> {
        self.bound.get(&(target.clone(), kind))
    }

    pub fn is_bound(&self, target: &Target, kind: EventKind) -> bool {
        self.get(target, kind).is_some()
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, ElementId, ElementId, ElementId) {
        let mut doc = Document::new();
        let body = doc.body();
        let form = doc.append_new(body, "form", &[("id", "profile")]);
        let avatar = doc.append_new(
            form,
            "input",
            &[("type", "file"), ("name", "avatar"), ("class", "upload big")],
        );
        let title = doc.append_new(form, "input", &[("type", "text"), ("name", "title")]);
        (doc, form, avatar, title)
    }

    #[test]
    fn selects_by_tag_class_id_and_attribute() {
        let (doc, form, avatar, title) = sample();

        assert_eq!(doc.query_selector_all("#profile").unwrap(), vec![form]);
        assert_eq!(doc.query_selector_all(".upload").unwrap(), vec![avatar]);
        assert_eq!(
            doc.query_selector_all("input[type=file]").unwrap(),
            vec![avatar]
        );
        assert_eq!(
            doc.query_selector_all("input[name=\"title\"]").unwrap(),
            vec![title]
        );
        assert_eq!(doc.query_selector_all("input.upload.big").unwrap(), vec![avatar]);
        assert_eq!(doc.query_selector_all("input").unwrap(), vec![avatar, title]);
        assert_eq!(
            doc.query_selector_all(".upload, [name=title]").unwrap(),
            vec![avatar, title]
        );
        assert!(doc.query_selector_all(".missing").unwrap().is_empty());
    }

    #[test]
    fn rejects_combinators_and_empty_groups() {
        let (doc, ..) = sample();
        assert!(matches!(
            doc.query_selector_all("form input"),
            Err(FieldError::InvalidSelector(_))
        ));
        assert!(matches!(
            doc.query_selector_all("input,"),
            Err(FieldError::InvalidSelector(_))
        ));
    }

    #[test]
    fn form_of_walks_ancestors() {
        let (mut doc, form, avatar, _) = sample();
        let wrapper = doc.append_new(form, "div", &[]);
        let nested = doc.append_new(wrapper, "input", &[("name", "nested")]);

        assert_eq!(doc.form_of(avatar), Some(form));
        assert_eq!(doc.form_of(nested), Some(form));
        assert_eq!(doc.form_of(form), None);
    }

    #[test]
    fn insert_before_places_sibling() {
        let (mut doc, form, avatar, title) = sample();
        let widget = doc.create_element("div");
        doc.insert_before(form, widget, avatar);
        assert_eq!(doc.get(form).children(), &[widget, avatar, title]);

        // moving again keeps a single copy
        doc.insert_before(form, widget, title);
        assert_eq!(doc.get(form).children(), &[avatar, widget, title]);
    }

    #[test]
    fn form_data_skips_file_inputs() {
        let (mut doc, form, _, title) = sample();
        doc.get_mut(title).value = "Hello".to_string();
        assert_eq!(
            doc.form_data(form),
            vec![("title".to_string(), "Hello".to_string())]
        );
    }

    #[test]
    fn listeners_replace_instead_of_stacking() {
        let mut listeners = Listeners::default();
        listeners.bind(Target::Browse, EventKind::Click, 1);
        listeners.bind(Target::Browse, EventKind::Click, 2);
        listeners.bind(Target::Input, EventKind::Change, 3);

        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners.get(&Target::Browse, EventKind::Click), Some(&2));

        listeners.unbind_rendered();
        assert_eq!(listeners.len(), 1);
        assert!(listeners.is_bound(&Target::Input, EventKind::Change));
    }
}
