// src/view.rs

//! The rendered form of a field: a structured snapshot plus the markup built from it.

use crate::config::Text;
use crate::file::FileRecord;

/// Everything one render pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldView {
    /// Class list of the widget element.
    pub classes: Vec<String>,
    /// Error banner text, if any.
    pub error: Option<String>,
    /// The "no file" / "drop" prompt of the empty view.
    pub message: Option<String>,
    /// Status line of the "has file" view.
    pub status: Option<String>,
    /// Progress bar width in percent, while uploading.
    pub progress: Option<f64>,
    pub has_browse: bool,
    pub has_delete: bool,
    /// Names of the extensions whose fragments were rendered, in order.
    pub extensions: Vec<String>,
    /// Inner markup of the widget element.
    pub html: String,
}

impl FieldView {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// Inputs of the empty view.
pub(crate) struct EmptyView<'a> {
    pub error: Option<&'a str>,
    pub dragging: bool,
}

/// Inputs of the "has file" view.
pub(crate) struct FileView<'a> {
    pub error: Option<&'a str>,
    pub record: &'a FileRecord,
    pub uploading: bool,
    pub progress: f64,
    pub fragments: Vec<(String, String)>,
}

pub(crate) fn render_empty(text: &Text, input: EmptyView<'_>) -> FieldView {
    let mut classes = vec!["UbField".to_string(), "--no-file".to_string()];
    if input.dragging {
        classes.push("--dropping-file".to_string());
    }

    let message = if input.dragging {
        text.get("drop_file")
    } else {
        text.get("no_file")
    };

    let mut html = error_bar(input.error);
    html.push_str(&format!(
        r##"<div class="no-file"><span class="message">{}</span><a class="ub-btn --browse" href="#">{}</a></div>"##,
        escape_html(message),
        escape_html(text.get("browse")),
    ));

    FieldView {
        classes,
        error: input.error.map(str::to_string),
        message: Some(message.to_string()),
        has_browse: true,
        html,
        ..Default::default()
    }
}

pub(crate) fn render_file(text: &Text, input: FileView<'_>) -> FieldView {
    let record = input.record;
    let mut classes = vec!["UbField".to_string(), "--has-file".to_string()];

    let status = if input.uploading {
        classes.push("--uploading".to_string());
        text.get("file_uploading")
    } else {
        text.get("file_selected")
    };

    let display_name = if record.name.is_empty() {
        "File"
    } else {
        record.name.as_str()
    };
    let name = match record.url.as_deref() {
        Some(url) if !url.starts_with("data:") => format!(
            r#"<a href="{}" target="_blank" class="name-actual">{}</a>"#,
            escape_html(url),
            escape_html(display_name)
        ),
        _ => format!(
            r#"<span class="name-actual">{}</span>"#,
            escape_html(display_name)
        ),
    };

    let size = if record.size > 0 {
        format!(r#"<span class="size">({}kb)</span>"#, record.size.div_ceil(1024))
    } else {
        String::new()
    };

    let has_delete = record.uploaded;
    let progress = (!has_delete && input.uploading).then_some(input.progress);
    let controls = if has_delete {
        format!(
            r##"<a class="ub-btn --delete" href="#">{}</a>"##,
            escape_html(text.get("delete"))
        )
    } else if let Some(progress) = progress {
        format!(
            r#"<div class="ub-prog"><div class="prog-inner" style="width: {:.2}%;"></div></div>"#,
            progress
        )
    } else {
        String::new()
    };

    let mut html = error_bar(input.error);
    html.push_str(&format!(
        r#"<div class="file-selected"><div class="details"><h6 class="status">{}</h6><div class="name">{}{}</div></div><div class="controls">{}</div></div>"#,
        escape_html(status),
        name,
        size,
        controls
    ));

    let mut extensions = Vec::with_capacity(input.fragments.len());
    for (extension, fragment) in input.fragments {
        html.push_str(&fragment);
        extensions.push(extension);
    }

    FieldView {
        classes,
        error: input.error.map(str::to_string),
        status: Some(status.to_string()),
        progress,
        has_delete,
        extensions,
        html,
        ..Default::default()
    }
}

fn error_bar(error: Option<&str>) -> String {
    match error {
        Some(error) => format!(
            r#"<div class="error-bar"><span>{}</span></div>"#,
            escape_html(error)
        ),
        None => String::new(),
    }
}

/// Escapes text for inclusion in markup, attribute values included.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn empty_view_switches_prompt_while_dragging() {
        let text = Text::default();
        let idle = render_empty(
            &text,
            EmptyView {
                error: None,
                dragging: false,
            },
        );
        assert_eq!(idle.message.as_deref(), Some("Drop a file here"));
        assert!(!idle.has_class("--dropping-file"));

        let dragging = render_empty(
            &text,
            EmptyView {
                error: Some("Nope"),
                dragging: true,
            },
        );
        assert_eq!(dragging.message.as_deref(), Some("Drop it like it's hot"));
        assert!(dragging.has_class("--dropping-file"));
        assert!(dragging.html.starts_with(r#"<div class="error-bar"><span>Nope</span></div>"#));
    }

    #[test]
    fn uploading_view_shows_progress_bar() {
        let text = Text::default();
        let record = FileRecord::new("a.png", 2049, "image/png");
        let view = render_file(
            &text,
            FileView {
                error: None,
                record: &record,
                uploading: true,
                progress: 12.3456,
                fragments: Vec::new(),
            },
        );
        assert!(view.has_class("--uploading"));
        assert_eq!(view.progress, Some(12.3456));
        assert!(view.html.contains("width: 12.35%;"));
        assert!(view.html.contains("(3kb)"));
        assert!(!view.has_delete);
    }

    #[test]
    fn uploaded_view_links_server_url_and_offers_delete() {
        let text = Text::default();
        let mut record = FileRecord::new("a.png", 0, "image/png").with_url("https://cdn.example.com/a.png");
        record.uploaded = true;
        let view = render_file(
            &text,
            FileView {
                error: None,
                record: &record,
                uploading: false,
                progress: 100.0,
                fragments: vec![("image-preview".to_string(), "<img/>".to_string())],
            },
        );
        assert!(view.has_delete);
        assert_eq!(view.progress, None);
        assert!(view.html.contains(r#"<a href="https://cdn.example.com/a.png" target="_blank" class="name-actual">a.png</a>"#));
        assert!(!view.html.contains("kb)"));
        assert!(view.html.ends_with("<img/>"));
        assert_eq!(view.extensions, vec!["image-preview".to_string()]);
    }
}
