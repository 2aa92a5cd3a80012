//! Markdown bodies for operation records, per tool family.

use crate::session::is_non_empty;
use serde_json::{Map, Value};

pub const MEMORY_LOOKUP: &str = "get_factual_memory";
pub const MEDIA_RETRIEVAL: [&str; 2] = ["start_media_retrieval", "get_media_retrieval_status"];
pub const MEDIA_ANALYSIS: [&str; 2] = ["start_media_analysis", "get_media_analysis_result"];
pub const SLIDE_EXTRACTION: [&str; 2] = ["start_slide_extraction", "get_extracted_slides"];
pub const SLIDE_TRANSLATION: &str = "translate_slide";

const PROGRESS_BLOCKS: &str = "▁▂▃▄▅▆▇█";

/// Rendered response: the record body plus an optional visual payload for
/// the narration.
#[derive(Debug, PartialEq, Eq)]
pub struct Rendered {
    pub body: String,
    pub artifact: Option<String>,
}

impl Rendered {
    fn body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            artifact: None,
        }
    }
}

/// Display title (emoji plus label) for a tool.
#[must_use]
pub fn tool_title(name: &str) -> String {
    let (emoji, label) = match name {
        MEMORY_LOOKUP => ("📚", "Memory lookup".to_string()),
        "start_media_retrieval" => ("📺", "Load media".to_string()),
        n if MEDIA_ANALYSIS.contains(&n) => ("🔍", "Analyze media".to_string()),
        _ => ("🛠️", snake_to_title(name)),
    };
    format!("{emoji} {label}")
}

fn snake_to_title(name: &str) -> String {
    name.split('_')
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let mut chars = chunk.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => pretty_json(value),
        other => other.to_string(),
    }
}

/// Body shown while a call is pending.
#[must_use]
pub fn call_body(name: &str, args: &Value) -> String {
    if name == "start_media_analysis" {
        media_analysis_args(args)
    } else {
        args_markdown(args)
    }
}

fn args_markdown(args: &Value) -> String {
    let Some(map) = args.as_object().filter(|map| !map.is_empty()) else {
        return "_No arguments._".to_string();
    };
    let mut lines = vec!["**Input**".to_string()];
    lines.extend(
        map.iter()
            .map(|(key, value)| format!("- **{key}**: {}", display_value(value))),
    );
    lines.join("\n")
}

fn media_analysis_args(args: &Value) -> String {
    let mut lines = Vec::new();
    if let Some(reference) = args.get("reference").filter(|v| is_non_empty(v)) {
        lines.push(format!("**Media reference:** `{}`", display_value(reference)));
    }

    match args.get("priors").and_then(Value::as_object) {
        Some(priors) if !priors.is_empty() => {
            for (key, label) in [
                ("context", "Context"),
                ("expectations", "Expectations"),
                ("prior_knowledge", "Prior knowledge"),
                ("questions", "Questions"),
            ] {
                let Some(text) = priors.get(key).filter(|v| is_non_empty(v)).map(display_value)
                else {
                    continue;
                };
                let text = text.trim();
                if !text.is_empty() {
                    lines.extend([String::new(), format!("**{label}**"), String::new()]);
                    lines.push(text.to_string());
                }
            }
        }
        _ if lines.is_empty() => lines.push("_No briefing details provided._".to_string()),
        _ => {}
    }

    if lines.is_empty() {
        "_No input provided._".to_string()
    } else {
        lines.join("\n")
    }
}

/// Body (and artifact) for a tool response.
#[must_use]
pub fn response_body(
    name: &str,
    response: &Value,
    structured: Option<&Map<String, Value>>,
    ticks: Option<u32>,
) -> Rendered {
    let empty = Map::new();
    let structured_map = structured.unwrap_or(&empty);

    if name == MEMORY_LOOKUP {
        Rendered::body(memory_body(response))
    } else if MEDIA_RETRIEVAL.contains(&name) {
        Rendered::body(media_retrieval_body(structured_map))
    } else if MEDIA_ANALYSIS.contains(&name) {
        Rendered::body(media_analysis_body(structured_map, ticks))
    } else if SLIDE_EXTRACTION.contains(&name) {
        let source = structured
            .filter(|m| !m.is_empty())
            .map_or_else(|| response.clone(), |m| Value::Object(m.clone()));
        slides_rendered(&source)
    } else if name == SLIDE_TRANSLATION {
        translated_slide(response, structured)
    } else {
        Rendered::body(generic_body(response))
    }
}

fn memory_body(response: &Value) -> String {
    match response.get("result").and_then(Value::as_str) {
        Some(result) => format!("**Memory lookup result**\n\n{}", strip_simple_xml(result)),
        None => format!(
            "**Memory lookup result**\n\n```json\n{}\n```",
            pretty_json(response)
        ),
    }
}

/// Strip one `<tag>value</tag>` wrapper, keeping the text if nothing is left.
fn strip_simple_xml(text: &str) -> &str {
    match (text.find('>'), text.rfind('<')) {
        (Some(start), Some(end)) if end > start => {
            let inner = text[start + 1..end].trim();
            if inner.is_empty() { text } else { inner }
        }
        _ => text,
    }
}

fn media_retrieval_body(structured: &Map<String, Value>) -> String {
    let metadata = structured.get("metadata").and_then(Value::as_object);
    let meta = |key: &str| metadata.and_then(|m| m.get(key)).filter(|v| !v.is_null());
    let truthy = |value: Option<&Value>| value.filter(|v| is_non_empty(v)).map(display_value);

    let mut lines = Vec::new();
    if let Some(title) = truthy(meta("title")) {
        lines.push(format!("**Title:** {title}"));
    }
    if let Some(reference) = truthy(structured.get("reference")) {
        lines.push(format!("**Reference:** `{reference}`"));
    }
    if let Some(source) = truthy(meta("source")).or_else(|| truthy(structured.get("source"))) {
        lines.push(format!("**Source:** {source}"));
    }
    if let Some(duration) = meta("duration") {
        lines.push(format!("**Duration:** {} seconds", display_value(duration)));
    }
    if let Some(channel) = truthy(meta("channel")) {
        lines.push(format!("**Channel:** {channel}"));
    }
    if let Some(status) = structured.get("status").filter(|v| !v.is_null()) {
        let cached = structured
            .get("cached")
            .filter(|v| !v.is_null())
            .map(|c| format!(", cached: {}", display_value(c)))
            .unwrap_or_default();
        lines.push(format!("**Status:** `{}`{cached}", display_value(status)));
    }
    if let Some(description) = truthy(meta("description")) {
        lines.push(String::new());
        lines.push(description);
    }

    if lines.is_empty() {
        "_No media details available._".to_string()
    } else {
        lines.join("\n")
    }
}

/// A growing bar of block characters, one per observed pending poll.
#[must_use]
pub fn progress_bar(ticks: u32) -> String {
    let length = usize::try_from(ticks.max(1)).unwrap_or(usize::MAX);
    let bar: String = PROGRESS_BLOCKS.chars().take(length).collect();
    format!("{bar} (thinking…) ")
}

fn media_analysis_body(structured: &Map<String, Value>, ticks: Option<u32>) -> String {
    let status = structured
        .get("status")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let mut lines = Vec::new();

    if let Some(analysis) = structured.get("analysis").and_then(Value::as_object) {
        if let Some(title) = analysis.get("title").filter(|v| is_non_empty(v)) {
            lines.push(format!("**Title:** {}", display_value(title)));
        }
        if let Some(count) = analysis.get("slide_count").filter(|v| !v.is_null()) {
            lines.push(format!("**Slides:** {}", display_value(count)));
        }
        if let Some(source) = analysis.get("source").filter(|v| is_non_empty(v)) {
            lines.push(format!("**Source:** {}", display_value(source)));
        }
        if let Some(text) = analysis.get("analysis").filter(|v| is_non_empty(v)) {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(display_value(text));
        }
    } else {
        if let Some(status) = status {
            lines.push(format!("**Status:** `{status}`"));
        }
        if let Some(reference) = structured.get("reference").filter(|v| is_non_empty(v)) {
            lines.push(format!("**Reference:** `{}`", display_value(reference)));
        }
        match ticks {
            Some(ticks) => lines.push(format!("**Progress:** {}", progress_bar(ticks))),
            None => lines.push("_Media analysis in progress..._".to_string()),
        }
    }

    if let Some(status) = status.filter(|s| *s != "done") {
        if !lines.iter().any(|line| line.starts_with("**Status:**")) {
            lines.insert(0, format!("**Status:** `{status}`"));
        }
    }

    lines.join("\n")
}

/// Build a `data:` URI from an image payload.
///
/// Accepts an existing data URI string or an object with `data` (base64) and
/// `mimeType` / `mime_type` (default `image/png`).
#[must_use]
pub fn data_uri_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.starts_with("data:") => Some(s.clone()),
        Value::Object(map) => {
            let data = map.get("data")?.as_str()?;
            if data.starts_with("data:") {
                return Some(data.to_string());
            }
            if data.is_empty() {
                return None;
            }
            let mime = map
                .get("mimeType")
                .or_else(|| map.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("image/png");
            Some(format!("data:{mime};base64,{data}"))
        }
        _ => None,
    }
}

fn image_tag(data_uri: &str, alt: &str) -> String {
    format!(
        r#"<img src="{data_uri}" alt="{alt}" style="max-width: 100%; width: 768px; height: auto;" />"#
    )
}

/// A slide with a displayable image.
#[derive(Clone, Debug, PartialEq)]
pub struct Slide {
    pub index: Value,
    pub image_data_uri: String,
    pub label: Option<String>,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl Slide {
    #[allow(clippy::cast_possible_truncation)]
    fn caption(&self) -> String {
        let mut parts = Vec::new();
        if !self.index.is_null() {
            parts.push(format!("Slide #{}", display_value(&self.index)));
        }
        if let Some(label) = self.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            parts.push(label.to_string());
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            parts.push(format!("{}s–{}s", from.trunc() as i64, to.trunc() as i64));
        }
        parts.join(" · ")
    }
}

/// Find slide entries in a slide-extraction result and keep those with an
/// image.
///
/// Slides may sit under `slides`, `slides.slides`, `result.slides` or
/// `result.slides.slides`.
#[must_use]
pub fn normalize_slides(result: &Value) -> Vec<Slide> {
    let Some(map) = result.as_object() else {
        return Vec::new();
    };
    let unwrap_nested = |value: &Value| match value.get("slides") {
        Some(inner) if value.is_object() => inner.clone(),
        _ => value.clone(),
    };
    let candidates = match map.get("slides") {
        Some(slides) => unwrap_nested(slides),
        None => map
            .get("result")
            .and_then(|nested| nested.get("slides"))
            .map(unwrap_nested)
            .unwrap_or(Value::Null),
    };
    let Value::Array(entries) = candidates else {
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, raw)| slide_entry(idx, raw))
        .collect()
}

fn slide_entry(idx: usize, raw: &Value) -> Option<Slide> {
    let Some(entry) = raw.as_object() else {
        return data_uri_from(raw).map(|uri| Slide {
            index: Value::from(idx),
            image_data_uri: uri,
            label: None,
            from: None,
            to: None,
        });
    };

    let image_data_uri = entry
        .get("image_data_uri")
        .and_then(Value::as_str)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ["image", "image_content", "content"]
                .iter()
                .filter_map(|key| entry.get(*key))
                .find_map(data_uri_from)
        })?;

    Some(Slide {
        index: entry.get("index").cloned().unwrap_or_else(|| Value::from(idx)),
        image_data_uri,
        label: entry.get("label").and_then(Value::as_str).map(str::to_string),
        from: entry.get("from").and_then(Value::as_f64),
        to: entry.get("to").and_then(Value::as_f64),
    })
}

fn slides_rendered(source: &Value) -> Rendered {
    let slides = normalize_slides(source);
    if slides.is_empty() {
        return Rendered::body("_No slides available for this media._");
    }

    let mut lines = vec![format!("Detected {} slides for this media.", slides.len())];
    for slide in &slides {
        let alt = format!("Slide {}", display_value(&slide.index));
        lines.extend([String::new(), image_tag(&slide.image_data_uri, &alt)]);
        let caption = slide.caption();
        if !caption.is_empty() {
            lines.extend([String::new(), caption]);
        }
    }

    Rendered {
        body: format!("Extracted {} slides for this media.", slides.len()),
        artifact: Some(lines.join("\n")),
    }
}

fn translated_slide(response: &Value, structured: Option<&Map<String, Value>>) -> Rendered {
    let from_structured = structured.and_then(|m| data_uri_from(&Value::Object(m.clone())));
    let data_uri = from_structured.or_else(|| {
        response
            .get("content")
            .and_then(Value::as_array)?
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("image"))
            .find_map(data_uri_from)
    });

    match data_uri {
        Some(uri) => Rendered {
            body: "Translated slide image ready.".to_string(),
            artifact: Some(image_tag(&uri, "Translated slide")),
        },
        None => Rendered::body(
            "_Slide translation completed, but the image payload could not be decoded._",
        ),
    }
}

fn generic_body(response: &Value) -> String {
    let inner = response
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .find(|text| !text.is_empty())
        });

    match inner {
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => format!("```json\n{}\n```", pretty_json(&parsed)),
            Err(_) => text.to_string(),
        },
        None => format!("```json\n{}\n```", pretty_json(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn titles_for_known_and_unknown_tools() {
        assert_eq!(tool_title("get_factual_memory"), "📚 Memory lookup");
        assert_eq!(tool_title("get_media_analysis_result"), "🔍 Analyze media");
        assert_eq!(tool_title("fetch_weather_report"), "🛠️ Fetch Weather Report");
    }

    #[test]
    fn args_render_as_bullets() {
        let body = call_body("lookup", &json!({"query": "rust", "limit": 3}));
        assert!(body.starts_with("**Input**"));
        assert!(body.contains("- **query**: rust"));
        assert!(body.contains("- **limit**: 3"));
        assert_eq!(call_body("lookup", &json!({})), "_No arguments._");
    }

    #[test]
    fn media_analysis_args_show_priors() {
        let body = call_body(
            "start_media_analysis",
            &json!({
                "reference": "abc",
                "priors": {"context": "Conference talk", "questions": " ", "expectations": null}
            }),
        );
        assert_eq!(body, "**Media reference:** `abc`\n\n**Context**\n\nConference talk");
        assert_eq!(
            call_body("start_media_analysis", &json!({})),
            "_No briefing details provided._"
        );
    }

    #[test]
    fn memory_result_unwraps_xml() {
        let rendered = response_body(
            MEMORY_LOOKUP,
            &json!({"result": "<memory> Rust 1.85 shipped edition 2024 </memory>"}),
            None,
            None,
        );
        assert_eq!(
            rendered.body,
            "**Memory lookup result**\n\nRust 1.85 shipped edition 2024"
        );
    }

    #[test]
    fn progress_bar_grows_and_caps() {
        assert_eq!(progress_bar(0), "▁ (thinking…) ");
        assert_eq!(progress_bar(3), "▁▂▃ (thinking…) ");
        assert_eq!(progress_bar(50), "▁▂▃▄▅▆▇█ (thinking…) ");
    }

    #[test]
    fn running_analysis_shows_status_and_progress() {
        let structured = json!({"status": "running", "reference": "abc"});
        let body = media_analysis_body(structured.as_object().unwrap(), Some(2));
        assert_eq!(
            body,
            "**Status:** `running`\n**Reference:** `abc`\n**Progress:** ▁▂ (thinking…) "
        );
    }

    #[test]
    fn finished_analysis_shows_report() {
        let structured = json!({
            "status": "done",
            "analysis": {"title": "Talk", "slide_count": 12, "analysis": "## Summary"}
        });
        let body = media_analysis_body(structured.as_object().unwrap(), None);
        assert_eq!(body, "**Title:** Talk\n**Slides:** 12\n\n## Summary");
    }

    #[test]
    fn data_uri_sources() {
        assert_eq!(
            data_uri_from(&json!("data:image/jpeg;base64,AAAA")).as_deref(),
            Some("data:image/jpeg;base64,AAAA")
        );
        assert_eq!(
            data_uri_from(&json!({"data": "QUJD", "mimeType": "image/webp"})).as_deref(),
            Some("data:image/webp;base64,QUJD")
        );
        assert_eq!(
            data_uri_from(&json!({"data": "QUJD"})).as_deref(),
            Some("data:image/png;base64,QUJD")
        );
        assert_eq!(data_uri_from(&json!("plain text")), None);
        assert_eq!(data_uri_from(&json!({"mimeType": "image/png"})), None);
    }

    #[test]
    fn slides_are_found_in_nested_shapes() {
        let nested = json!({
            "result": {"slides": {"slides": [
                {"image": {"data": "QUJD"}, "label": "Intro", "from": 0.0, "to": 12.7},
                {"label": "no image"},
                "data:image/png;base64,REVG"
            ]}}
        });
        let slides = normalize_slides(&nested);

        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].image_data_uri, "data:image/png;base64,QUJD");
        assert_eq!(slides[0].caption(), "Slide #0 · Intro · 0s–12s");
        assert_eq!(slides[1].index, json!(2));
    }

    #[test]
    fn slide_extraction_yields_artifact() {
        let structured = json!({"slides": [{"image_data_uri": "data:image/png;base64,QUJD"}]});
        let rendered = response_body(
            "get_extracted_slides",
            &json!({}),
            structured.as_object(),
            None,
        );

        assert_eq!(rendered.body, "Extracted 1 slides for this media.");
        let artifact = rendered.artifact.expect("artifact");
        assert!(artifact.starts_with("Detected 1 slides for this media."));
        assert!(artifact.contains(r#"<img src="data:image/png;base64,QUJD" alt="Slide 0""#));
    }

    #[test]
    fn translated_slide_from_content_items() {
        let response = json!({"content": [
            {"type": "text", "text": "ok"},
            {"type": "image", "data": "QUJD", "mimeType": "image/png"}
        ]});
        let rendered = response_body(SLIDE_TRANSLATION, &response, None, None);
        assert_eq!(rendered.body, "Translated slide image ready.");
        assert!(rendered.artifact.is_some_and(|a| a.contains("Translated slide")));

        let missing = response_body(SLIDE_TRANSLATION, &json!({}), None, None);
        assert!(missing.artifact.is_none());
    }

    #[test]
    fn generic_body_prefers_text_content() {
        let json_text = json!({"content": [{"type": "text", "text": "{\"a\":1}"}]});
        assert_eq!(
            response_body("other", &json_text, None, None).body,
            "```json\n{\n  \"a\": 1\n}\n```"
        );

        let plain = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(response_body("other", &plain, None, None).body, "hello");
    }
}
