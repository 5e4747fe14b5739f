//! Query support: call parameters, property matching, `${name}`
//! templates and TTL evaluation.
//!
//! Matching is byte-equal on string representations. Objects and arrays
//! recurse structurally with the same rule, so `{addr: {city: "Oslo"}}`
//! matches any candidate whose `addr.city` renders to `Oslo`.

use crate::commit::Persistence;
use serde_json::{Map, Value};
use std::rc::Rc;

/// Predicate applied to each candidate document during a scan.
pub type Filter = Rc<dyn Fn(&Value) -> bool>;

/// Per-call options for database operations.
#[derive(Clone, Default)]
pub struct Params {
    /// Index to query. Only `primary` is supported.
    pub index: Option<String>,
    /// Result limit. Unlimited for find when absent; remove defaults to 1.
    pub limit: Option<usize>,
    /// Pagination cursor: sort key of the last item of the previous page.
    pub next: Option<String>,
    /// Per-call persistence override.
    pub persist: Option<Persistence>,
    /// Create-or-update semantics.
    pub upsert: bool,
    /// Verbose trace of this call.
    pub log: bool,
    /// Candidate predicate; the captured environment carries any argument.
    pub filter: Option<Filter>,
    /// Recovery replay: apply without re-journaling.
    pub(crate) bypass: bool,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_next(mut self, cursor: impl Into<String>) -> Self {
        self.next = Some(cursor.into());
        self
    }

    pub fn with_upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn with_persist(mut self, persist: Persistence) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn with_log(mut self) -> Self {
        self.log = true;
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&Value) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }

    pub(crate) fn with_bypass(mut self) -> Self {
        self.bypass = true;
        self
    }
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Params")
            .field("index", &self.index)
            .field("limit", &self.limit)
            .field("next", &self.next)
            .field("persist", &self.persist)
            .field("upsert", &self.upsert)
            .field("log", &self.log)
            .field("filter", &self.filter.is_some())
            .field("bypass", &self.bypass)
            .finish()
    }
}

/// True when `text` still contains an unresolved `${...}` reference.
pub(crate) fn has_template(text: &str) -> bool {
    text.contains("${")
}

/// Truncate a partially resolved key at its first `${`, turning it into a
/// begins-with prefix.
pub(crate) fn template_prefix(text: &str) -> &str {
    match text.find("${") {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// Render `${name}` references against `props`. Unknown names are left in
/// place so the caller can detect an incomplete key.
pub(crate) fn expand_template(template: &str, props: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[..end];
                match props.get(name) {
                    Some(value) => out.push_str(&match_string(value)),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// String representation used for byte-equal matching and templates.
pub(crate) fn match_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Does `candidate` contain every property of `props` (sort field aside)
/// with a byte-equal string representation?
pub(crate) fn props_match(
    candidate: &Value,
    props: &Map<String, Value>,
    sort_field: &str,
) -> bool {
    for (name, want) in props {
        if name == sort_field {
            continue;
        }
        match candidate.get(name) {
            Some(got) => {
                if !value_match(got, want) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn value_match(got: &Value, want: &Value) -> bool {
    match (got, want) {
        (Value::Object(got), Value::Object(want)) => want
            .iter()
            .all(|(k, w)| got.get(k).map(|g| value_match(g, w)).unwrap_or(false)),
        (Value::Array(got), Value::Array(want)) => {
            got.len() == want.len()
                && got.iter().zip(want.iter()).all(|(g, w)| value_match(g, w))
        }
        (got, want) => match_string(got) == match_string(want),
    }
}

/// True when the document's TTL field holds an ISO instant at or before
/// `now_iso`. ISO-8601 UTC strings order lexicographically, so this is a
/// plain string comparison.
pub(crate) fn is_expired(doc: &Value, ttl_field: &str, now_iso: &str) -> bool {
    match doc.get(ttl_field).and_then(Value::as_str) {
        Some(expiry) => expiry <= now_iso,
        None => false,
    }
}
