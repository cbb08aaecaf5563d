//! Rendering of decoded results into front-end display payloads.

use serde_json::Value;

use crate::core::types::TablePayload;

/// Render a table as an HTML `<table>` with escaped headers and cells.
pub fn render_html_table(table: &TablePayload) -> String {
    let mut html = String::from(r#"<table border="1" class="dataframe">"#);

    if let Some(names) = table.column_names().filter(|names| !names.is_empty()) {
        html.push_str("<thead><tr>");
        for name in names {
            html.push_str("<th>");
            html.push_str(&escape_html(&name));
            html.push_str("</th>");
        }
        html.push_str("</tr></thead>");
    }

    html.push_str("<tbody>");
    for row in &table.rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(&escape_html(&cell_text(cell)));
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    html
}

/// Cell text as a notebook would print it: empty for null, `True`/`False`
/// for booleans.
fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}
