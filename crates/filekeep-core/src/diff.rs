//! Path-addressed structural comparison of two JSON documents.
//!
//! Paths walk object keys with `.` and array indices with `[i]`; the document
//! root is `$`. Root-level keys are written bare (`a`, `b.c`), root-level
//! indices as `$[0]`.
//!
//! Arrays are compared strictly by position. Inserting an element at the front
//! of an array reports every later index as modified; consumers key on these
//! index-based paths.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Number, Value};
use tracing::debug;

/// Path of the document root.
pub const ROOT: &str = "$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

/// One difference between the old and new document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// Ordered list of differences; never holds two entries for the same path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    entries: Vec<DiffEntry>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl DiffReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns `false` (and drops the entry) if the path is
    /// already reported.
    pub fn push(&mut self, entry: DiffEntry) -> bool {
        if !self.seen.insert(entry.path.clone()) {
            debug!("Duplicate diff path {} ignored", entry.path);
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DiffEntry> {
        self.entries
    }

    pub fn get(&self, path: &str) -> Option<&DiffEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for entry in &self.entries {
            match entry.kind {
                DiffKind::Added => summary.added += 1,
                DiffKind::Removed => summary.removed += 1,
                DiffKind::Modified => summary.modified += 1,
            }
        }
        summary
    }

    fn record(&mut self, path: String, kind: DiffKind, old: Option<&Value>, new: Option<&Value>) {
        self.push(DiffEntry {
            path,
            kind,
            old_value: old.cloned(),
            new_value: new.cloned(),
        });
    }
}

/// Diff two JSON texts. Blank text and `null` are treated as an empty
/// document. Malformed input on either side yields an empty report.
pub fn diff(old: &str, new: &str) -> DiffReport {
    let old = match parse_document(old) {
        Ok(v) => v,
        Err(e) => {
            debug!("Old document is not valid JSON, skipping diff: {}", e);
            return DiffReport::new();
        }
    };
    let new = match parse_document(new) {
        Ok(v) => v,
        Err(e) => {
            debug!("New document is not valid JSON, skipping diff: {}", e);
            return DiffReport::new();
        }
    };
    diff_values(old.as_ref(), new.as_ref())
}

/// Diff two already-parsed documents. `None` and `Value::Null` are empty.
pub fn diff_values(old: Option<&Value>, new: Option<&Value>) -> DiffReport {
    let old = old.filter(|v| !v.is_null());
    let new = new.filter(|v| !v.is_null());
    let mut report = DiffReport::new();

    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => collect_leaves(new, ROOT, DiffKind::Added, &mut report),
        (Some(old), None) => collect_leaves(old, ROOT, DiffKind::Removed, &mut report),
        (Some(old), Some(new)) => compare(old, new, ROOT, &mut report),
    }

    report
}

fn parse_document(text: &str) -> serde_json::Result<Option<Value>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text).map(Some)
}

fn key_path(parent: &str, key: &str) -> String {
    if parent == ROOT {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Report every leaf under `value`. Empty containers count as leaves.
fn collect_leaves(value: &Value, path: &str, kind: DiffKind, report: &mut DiffReport) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, &key_path(path, key), kind, report);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, &index_path(path, i), kind, report);
            }
        }
        leaf => match kind {
            DiffKind::Added => report.record(path.to_string(), kind, None, Some(leaf)),
            _ => report.record(path.to_string(), kind, Some(leaf), None),
        },
    }
}

fn compare(old: &Value, new: &Value, path: &str, report: &mut DiffReport) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_child) in old_map {
                let child_path = key_path(path, key);
                match new_map.get(key) {
                    Some(new_child) => compare(old_child, new_child, &child_path, report),
                    None => report.record(child_path, DiffKind::Removed, Some(old_child), None),
                }
            }
            for (key, new_child) in new_map {
                if !old_map.contains_key(key) {
                    report.record(key_path(path, key), DiffKind::Added, None, Some(new_child));
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let len = old_items.len().max(new_items.len());
            for i in 0..len {
                let child_path = index_path(path, i);
                match (old_items.get(i), new_items.get(i)) {
                    (Some(o), Some(n)) => compare(o, n, &child_path, report),
                    (None, Some(n)) => report.record(child_path, DiffKind::Added, None, Some(n)),
                    (Some(o), None) => report.record(child_path, DiffKind::Removed, Some(o), None),
                    (None, None) => {}
                }
            }
        }
        _ if kind_of(old) != kind_of(new) => {
            report.record(path.to_string(), DiffKind::Modified, Some(old), Some(new));
        }
        _ => {
            if !scalars_equal(old, new) {
                report.record(path.to_string(), DiffKind::Modified, Some(old), Some(new));
            }
        }
    }
}

#[derive(PartialEq, Eq)]
enum Kind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

fn kind_of(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Array(_) => Kind::Array,
        Value::Object(_) => Kind::Object,
    }
}

fn scalars_equal(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        _ => old == new,
    }
}

/// Integer comparison when both sides are lossless integers, float otherwise.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
