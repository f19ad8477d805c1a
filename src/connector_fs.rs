//! Content directory scanner.
//!
//! Walks `[content].root` recursively, applies include/exclude globs and
//! converts every matching file into one or more [`SourceItem`]s:
//!
//! | Extension | Conversion |
//! |-----------|------------|
//! | `.md`, `.txt`, other | read as UTF-8 text |
//! | `.json` | flattened into one item per entry with a text field |
//! | `.pdf` | text extracted with `pdf-extract`; unreadable PDFs are skipped |

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ContentConfig;
use crate::extract;
use crate::models::SourceItem;

/// JSON fields that hold a document's text, in order of preference.
const JSON_TEXT_FIELDS: [&str; 3] = ["text", "content", "body"];
/// JSON fields that override the citation, in order of preference.
const JSON_SOURCE_FIELDS: [&str; 2] = ["source", "url"];

pub fn scan_content(config: &ContentConfig) -> Result<Vec<SourceItem>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Content root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_source_items(path, &rel_str) {
            Ok(mut file_items) => items.append(&mut file_items),
            Err(e) => tracing::warn!(file = %rel_str, error = %e, "skipping unreadable file"),
        }
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(items)
}

fn file_to_source_items(path: &Path, relative_path: &str) -> Result<Vec<SourceItem>> {
    let updated_at = modified_at(path);
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let item = |body: String, content_type: &str| SourceItem {
        source_id: relative_path.to_string(),
        source: Some(relative_path.to_string()),
        title: Some(title.clone()),
        content_type: content_type.to_string(),
        body,
        updated_at,
    };

    match extension.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path)?;
            let body = extract::extract_pdf_text(&bytes)?;
            Ok(vec![item(body, extract::MIME_PDF)])
        }
        "json" => {
            let raw = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&raw)?;
            Ok(flatten_json(&value, relative_path, &title, updated_at))
        }
        "md" => Ok(vec![item(std::fs::read_to_string(path)?, "text/markdown")]),
        _ => Ok(vec![item(std::fs::read_to_string(path)?, "text/plain")]),
    }
}

/// Turn a parsed JSON file into documents.
///
/// An object (or each object of an array) with a `text`/`content`/`body`
/// string becomes one document, cited by its `source`/`url` field when present
/// and by the file path otherwise. JSON with no such fields is indexed whole,
/// pretty-printed.
pub fn flatten_json(
    value: &Value,
    relative_path: &str,
    title: &str,
    updated_at: DateTime<Utc>,
) -> Vec<SourceItem> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut items = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(body) = JSON_TEXT_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
        else {
            continue;
        };
        let source = JSON_SOURCE_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
            .unwrap_or(relative_path);
        let entry_title = obj
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(title);

        items.push(SourceItem {
            source_id: format!("{}#{}", relative_path, i),
            source: Some(source.to_string()),
            title: Some(entry_title.to_string()),
            content_type: "application/json".to_string(),
            body: body.to_string(),
            updated_at,
        });
    }

    if items.is_empty() {
        let body = serde_json::to_string_pretty(value).unwrap_or_default();
        items.push(SourceItem {
            source_id: relative_path.to_string(),
            source: Some(relative_path.to_string()),
            title: Some(title.to_string()),
            content_type: "application/json".to_string(),
            body,
            updated_at,
        });
    }

    items
}

fn modified_at(path: &Path) -> DateTime<Utc> {
    let modified_secs = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Utc.timestamp_opt(modified_secs, 0)
        .single()
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
