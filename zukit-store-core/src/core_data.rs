//! Readers over the shared core data store
//!
//! The core store serves four blobs: `folders`, `galleries`, `loaders` and
//! `svg`. [`CoreData`] wraps its handle and turns them into the shapes UI
//! code consumes: a folder or gallery by id, an indented folder list for a
//! select control, a loader SVG with its animation duration rewritten.
//!
//! Every reader starts the fetch of its key on first use and returns `None`
//! while the blob is pending, absent or empty.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::handle::{StoreContext, StoreHandle};
use crate::value::ValueRequest;

const DEPTH_MARK: &str = "\u{00A0}";
const DEPTH_SHIFT: usize = 4;

/// Duration written for a loader that should look static.
const FROZEN_DURATION: &str = "1000000s";

static DURATION_ATTR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"dur="[^"]*""#).ok());

/// One entry of a folder select control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderOption {
    pub label: String,
    pub value: Value,
}

impl FolderOption {
    pub fn new(label: impl Into<String>, value: Value) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }

    /// Entry shown while folders load.
    pub fn loading() -> Self {
        Self::new("Loading...", Value::from(0))
    }

    /// Leading "no folder" entry.
    pub fn select_folder() -> Self {
        Self::new("Select folder", Value::from(0))
    }
}

/// Typed reads over the core data store.
#[derive(Debug, Clone)]
pub struct CoreData {
    handle: StoreHandle,
}

impl CoreData {
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Readers over the core store registered in `context`.
    pub fn from_context(context: &StoreContext) -> Result<Self> {
        Ok(Self::new(context.core()?))
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Every folder, keyed by id.
    pub fn folders(&self) -> Option<Value> {
        self.blob("folders")
    }

    pub fn folder(&self, id: &str) -> Option<Value> {
        self.folders().and_then(|folders| lookup(&folders, id).cloned())
    }

    /// Every gallery, keyed by post id.
    pub fn galleries(&self) -> Option<Value> {
        self.blob("galleries")
    }

    pub fn gallery(&self, post_id: &str) -> Option<Value> {
        self.galleries()
            .and_then(|galleries| lookup(&galleries, post_id).cloned())
    }

    /// Folder tree as select entries, or a single "Loading..." entry while
    /// the folders are not there yet.
    pub fn folder_options(&self, initial: Option<FolderOption>) -> Vec<FolderOption> {
        match self.folders() {
            Some(folders) => folder_options(&folders, initial),
            None => vec![FolderOption::loading()],
        }
    }

    pub fn loaders(&self) -> Option<Value> {
        self.blob("loaders")
    }

    /// Loader SVG at `index`.
    ///
    /// With a `duration` in seconds, every `dur` attribute is rewritten to
    /// it; `0` freezes the animation.
    pub fn loader(&self, index: &str, duration: Option<f64>) -> Option<String> {
        let loaders = self.loaders()?;
        let loader = lookup(&loaders, index)?.as_str()?;
        Some(match duration {
            Some(duration) => loader_with_duration(loader, duration),
            None => loader.to_string(),
        })
    }

    /// SVG markup of `name` in `folder` (e.g. `images/`).
    pub fn svg(&self, name: &str, folder: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        let request = ValueRequest::new("svg").param("folder", folder).param("name", name);
        let svg = self.handle.resolve(request).into_cached()?;
        svg.as_str().filter(|s| !s.is_empty()).map(str::to_string)
    }

    fn blob(&self, key: &str) -> Option<Value> {
        self.handle
            .resolve(key)
            .into_cached()
            .filter(|value| !is_blank(value))
    }
}

/// Flatten a folder map into select entries.
///
/// Roots are folders with `parent_id` 0, in `order`. Each folder is
/// followed by its `childs`, indented by four non-breaking spaces per
/// level. A child whose `parent_id` does not point back at the folder is
/// skipped, and a folder is never listed twice.
pub fn folder_options(folders: &Value, initial: Option<FolderOption>) -> Vec<FolderOption> {
    let mut entries: Vec<&Value> = match folders {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };
    entries.sort_by(|a, b| order(a).total_cmp(&order(b)));

    let mut options: Vec<FolderOption> = initial.into_iter().collect();
    let mut visited = HashSet::new();
    for folder in entries {
        push_folder(folders, folder, "0", 0, &mut visited, &mut options);
    }
    options
}

fn push_folder(
    folders: &Value,
    folder: &Value,
    parent: &str,
    depth: usize,
    visited: &mut HashSet<String>,
    options: &mut Vec<FolderOption>,
) {
    let Some(id) = folder.get("id").and_then(id_text) else {
        return;
    };
    if folder.get("parent_id").and_then(id_text).as_deref() != Some(parent) {
        return;
    }
    if !visited.insert(id.clone()) {
        return;
    }

    let title = match folder.get("title") {
        Some(Value::String(title)) => title.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    options.push(FolderOption {
        label: format!("{}{title}", DEPTH_MARK.repeat(depth * DEPTH_SHIFT)),
        value: folder.get("id").cloned().unwrap_or(Value::Null),
    });

    let children = folder.get("childs").and_then(Value::as_array);
    for child_id in children.into_iter().flatten().filter_map(id_text) {
        if let Some(child) = lookup(folders, &child_id) {
            push_folder(folders, child, &id, depth + 1, visited, options);
        }
    }
}

/// Rewrite every `dur="..."` attribute of `loader`.
pub fn loader_with_duration(loader: &str, duration: f64) -> String {
    let Some(pattern) = DURATION_ATTR.as_ref() else {
        return loader.to_string();
    };
    let value = if duration == 0.0 {
        FROZEN_DURATION.to_string()
    } else {
        format!("{duration}s")
    };
    pattern
        .replace_all(loader, format!(r#"dur="{value}""#).as_str())
        .into_owned()
}

fn lookup<'a>(blob: &'a Value, id: &str) -> Option<&'a Value> {
    let found = match blob {
        Value::Object(map) => map.get(id),
        Value::Array(items) => id.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    };
    found.filter(|value| !value.is_null())
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn order(folder: &Value) -> f64 {
    folder
        .get("order")
        .and_then(Value::as_f64)
        .unwrap_or(f64::INFINITY)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RestConfig, StoreConfig};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn indent(depth: usize) -> String {
        "\u{00A0}".repeat(depth * 4)
    }

    fn folders() -> Value {
        json!({
            "7": { "id": 7, "parent_id": 0, "title": "Travel", "order": 2, "childs": [9] },
            "3": { "id": 3, "parent_id": 0, "title": "Home", "order": 1, "childs": [] },
            "9": { "id": 9, "parent_id": 7, "title": "Italy", "order": 1, "childs": [11] },
            "11": { "id": 11, "parent_id": 9, "title": "Rome", "order": 1, "childs": [] },
        })
    }

    #[test]
    fn test_folder_options_tree() {
        let options = folder_options(&folders(), Some(FolderOption::select_folder()));
        let labels: Vec<String> = options.iter().map(|o| o.label.clone()).collect();
        assert_eq!(
            labels,
            vec![
                "Select folder".to_string(),
                "Home".to_string(),
                "Travel".to_string(),
                format!("{}Italy", indent(1)),
                format!("{}Rome", indent(2)),
            ]
        );
        assert_eq!(options[2].value, json!(7));
    }

    #[test]
    fn test_folder_options_skips_mismatched_children() {
        let folders = json!({
            "1": { "id": 1, "parent_id": 0, "title": "A", "order": 1, "childs": [2, 1] },
            "2": { "id": 2, "parent_id": 5, "title": "Stray", "order": 2, "childs": [] },
        });
        let options = folder_options(&folders, None);
        assert_eq!(options, vec![FolderOption::new("A", json!(1))]);
    }

    #[test]
    fn test_folder_options_ids_as_text() {
        let folders = json!({
            "4": { "id": "4", "parent_id": "0", "title": "Docs", "order": 1, "childs": ["5"] },
            "5": { "id": "5", "parent_id": 4, "title": "Specs", "order": 1, "childs": [] },
        });
        let options = folder_options(&folders, None);
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].label, format!("{}Specs", indent(1)));
    }

    #[test]
    fn test_loader_duration_rewrite() {
        let svg = r#"<svg><animate dur="0.8s"/><animateTransform dur="1s"/></svg>"#;
        assert_eq!(
            loader_with_duration(svg, 2.5),
            r#"<svg><animate dur="2.5s"/><animateTransform dur="2.5s"/></svg>"#
        );
        assert_eq!(
            loader_with_duration(svg, 0.0),
            r#"<svg><animate dur="1000000s"/><animateTransform dur="1000000s"/></svg>"#
        );
        assert_eq!(loader_with_duration("<svg/>", 3.0), "<svg/>");
    }

    #[test]
    fn test_lookup_and_blank() {
        let blob = json!({ "12": { "title": "x" }, "13": null });
        assert!(lookup(&blob, "12").is_some());
        assert!(lookup(&blob, "13").is_none());
        assert_eq!(lookup(&json!(["a", "b"]), "1"), Some(&json!("b")));
        assert!(is_blank(&json!({})));
        assert!(is_blank(&json!([])));
        assert!(!is_blank(&json!(0)));
    }

    #[tokio::test]
    async fn test_readers_wait_for_fetched_blobs() {
        let mock = MockTransport::new()
            .with_value("folders", folders())
            .with_value("loaders", json!(["<svg dur=\"1s\"/>", "<svg dur=\"2s\"/>"]))
            .with_value("galleries", json!({ "42": [1, 2, 3] }));
        let context = StoreContext::new(RestConfig::default());
        context.register(StoreConfig::core_data(), mock.clone()).unwrap();
        let core = CoreData::from_context(&context).unwrap();

        mock.hold();
        assert_eq!(core.folders(), None);
        assert_eq!(core.folder_options(None), vec![FolderOption::loading()]);
        assert_eq!(core.loader("1", None), None);
        mock.release();

        for key in ["folders", "loaders", "galleries"] {
            core.handle().resolved(key).await;
        }
        assert_eq!(core.folder("9").unwrap()["title"], json!("Italy"));
        assert_eq!(core.folder_options(None).len(), 4);
        assert_eq!(core.loader("1", Some(0.5)).as_deref(), Some("<svg dur=\"0.5s\"/>"));
        assert_eq!(core.loader("5", None), None);
        assert_eq!(core.gallery("42"), Some(json!([1, 2, 3])));
        assert_eq!(core.svg("", "images/"), None);
        assert_eq!(mock.get_count_for("folders"), 1);
    }
}
