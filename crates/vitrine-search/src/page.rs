//! Server-rendered HTML for the search page.
//!
//! One page: title, description, a K slider, a query box and, once a query
//! is submitted, a grid of result images with captions.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::gallery::GalleryItem;

/// Presentation settings for the search page.
///
/// `label_visible` and `disabled` are the page's own state for the query box;
/// they never reach the search core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UiSettings {
    /// Page title.
    pub title: String,
    /// Text shown under the title.
    pub description: String,
    /// Placeholder for the query box.
    pub placeholder: String,
    /// Initial slider position.
    pub default_k: usize,
    /// Slider maximum.
    pub max_k: usize,
    /// Grid columns.
    pub columns: usize,
    /// Rendered image width in pixels.
    pub image_width: u32,
    /// Show the query box label.
    pub label_visible: bool,
    /// Render the query box disabled.
    pub disabled: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            title: "Vitrine".to_string(),
            description: "Describe a product in any language and see the closest matches \
                          from the catalog."
                .to_string(),
            placeholder: "Example: Blue bottle".to_string(),
            default_k: 5,
            max_k: 10,
            columns: 3,
            image_width: 300,
            label_visible: true,
            disabled: false,
        }
    }
}

impl UiSettings {
    /// Requested result count, or `default_k`, checked against `1..=max_k`.
    pub fn check_k(&self, k: Option<usize>) -> Result<usize> {
        let k = k.unwrap_or(self.default_k);
        if k == 0 || k > self.max_k {
            return Err(SearchError::InvalidRequest(format!(
                "k must be between 1 and {}, got {k}",
                self.max_k
            )));
        }
        Ok(k)
    }
}

/// What the page should show below the form.
#[derive(Debug)]
pub enum PageBody<'a> {
    /// No query yet.
    Empty,
    /// Results for a query.
    Results(&'a [GalleryItem]),
    /// The query failed as a whole.
    Error(&'a str),
}

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

/// Render the full page.
pub fn render(ui: &UiSettings, query: &str, k: usize, body: PageBody<'_>) -> String {
    let mut html = String::new();
    let title = escape(&ui.title);

    // Writing into a String cannot fail.
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 1000px; margin: 2rem auto; padding: 0 1rem; }}
.grid {{ display: grid; grid-template-columns: repeat({columns}, 1fr); gap: 1rem; }}
figure {{ margin: 0; text-align: center; }}
figcaption {{ color: #444; }}
.missing {{ color: #a00; font-size: 0.9rem; }}
.error {{ color: #a00; }}
</style>
</head>
<body>
<h1>{title}</h1>
<hr>
<p>{description}</p>
<hr>
<form method="get" action="/">
<label for="k">Number of products to show: <output id="k-value">{k}</output></label><br>
<input type="range" id="k" name="k" min="1" max="{max_k}" value="{k}" oninput="document.getElementById('k-value').value = this.value"><br>
"#,
        columns = ui.columns.max(1),
        description = escape(&ui.description),
        max_k = ui.max_k,
    );

    if ui.label_visible {
        html.push_str("<label for=\"q\">Enter query &#128071;</label><br>\n");
    }
    let _ = writeln!(
        html,
        r#"<input type="text" id="q" name="q" value="{}" placeholder="{}"{}>"#,
        escape(query),
        escape(&ui.placeholder),
        if ui.disabled { " disabled" } else { "" }
    );
    html.push_str("</form>\n");

    match body {
        PageBody::Empty => {}
        PageBody::Error(message) => {
            let _ = writeln!(html, r#"<p class="error">{}</p>"#, escape(message));
        }
        PageBody::Results(items) => {
            html.push_str("<h2>Top products found for you:</h2>\n<div class=\"grid\">\n");
            for item in items {
                render_item(&mut html, item, ui.image_width);
            }
            html.push_str("</div>\n");
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_item(html: &mut String, item: &GalleryItem, width: u32) {
    let caption = escape(&item.caption);
    html.push_str("<figure>\n");
    match (&item.image, &item.error) {
        (Some(image), _) => {
            let _ = writeln!(
                html,
                r#"<img src="{}" width="{width}" alt="{caption}">"#,
                image.data_uri()
            );
        }
        (None, error) => {
            let _ = writeln!(
                html,
                r#"<p class="missing">Image unavailable: {}</p>"#,
                escape(error.as_deref().unwrap_or("unknown error"))
            );
        }
    }
    let _ = writeln!(
        html,
        r#"<figcaption>{caption} <small>({:.3})</small></figcaption>"#,
        item.score
    );
    html.push_str("</figure>\n");
}
