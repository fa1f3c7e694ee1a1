//! Sensitive field redaction
//!
//! The scrubber runs after transformation and before the fingerprint is
//! computed, so the fingerprint never sees sensitive values.
//!
//! [`FieldScrubber`] understands three pattern shapes:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `password` | a key named `password` at any depth |
//! | `*token*` | any key matching the glob, at any depth |
//! | `request.headers.Authorization` | that path from the occurrence root; segments may be globs |
//!
//! Matching is case-insensitive. A matched scalar becomes `"[scrubbed]"`; a
//! matched object or array keeps its shape with every leaf redacted.
//!
//! When a match lands on a typed field, such as a frame's line number, the
//! marker no longer deserializes. Sections are then scrubbed one at a time
//! and a failing section is redacted with nulls for its non-string leaves.

use crate::error::{Error, Result};
use crate::types::{Body, Level, Occurrence};
use glob::{MatchOptions, Pattern};
use serde_json::{json, Map, Value};

/// Replacement for redacted values.
pub const REDACTED: &str = "[scrubbed]";

pub trait Scrubber: Send + Sync {
    fn scrub(&self, data: Occurrence) -> Occurrence;
}

impl<F> Scrubber for F
where
    F: Fn(Occurrence) -> Occurrence + Send + Sync,
{
    fn scrub(&self, data: Occurrence) -> Occurrence {
        self(data)
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Segment {
    Exact(String),
    Glob(Pattern),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self> {
        if raw.contains(['*', '?', '[']) {
            let pattern = Pattern::new(raw)
                .map_err(|e| Error::Config(format!("invalid scrub pattern {:?}: {}", raw, e)))?;
            Ok(Segment::Glob(pattern))
        } else {
            Ok(Segment::Exact(raw.to_lowercase()))
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Segment::Exact(name) => key.to_lowercase() == *name,
            Segment::Glob(pattern) => pattern.matches_with(key, MATCH_OPTIONS),
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    /// Matches a key at any depth
    Key(Segment),
    /// Matches a full path from the root
    Path(Vec<Segment>),
}

/// Redacts fields by name, glob or dotted path.
#[derive(Debug, Clone, Default)]
pub struct FieldScrubber {
    rules: Vec<Rule>,
}

impl FieldScrubber {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains('.') {
                let segments = pattern
                    .split('.')
                    .map(Segment::parse)
                    .collect::<Result<Vec<_>>>()?;
                rules.push(Rule::Path(segments));
            } else {
                rules.push(Rule::Key(Segment::parse(pattern)?));
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scrub an arbitrary JSON tree. The tree root counts as the occurrence
    /// root for path patterns.
    pub fn scrub_value(&self, value: Value) -> Value {
        if self.rules.is_empty() {
            return value;
        }
        let mut path = Vec::new();
        self.walk(value, &mut path, Leaves::Marker)
    }

    fn walk(&self, value: Value, path: &mut Vec<String>, leaves: Leaves) -> Value {
        match value {
            Value::Object(map) => {
                let scrubbed = map
                    .into_iter()
                    .map(|(key, child)| {
                        path.push(key);
                        let child = self.scrub_entry(child, path, leaves);
                        let key = path.pop().unwrap_or_default();
                        (key, child)
                    })
                    .collect();
                Value::Object(scrubbed)
            }
            // Array elements share the path of their parent key.
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.walk(v, path, leaves))
                    .collect(),
            ),
            scalar => scalar,
        }
    }

    /// Scrub the value found at `path`.
    fn scrub_entry(&self, value: Value, path: &mut Vec<String>, leaves: Leaves) -> Value {
        if self.is_match(path) {
            redact(value, leaves)
        } else {
            self.walk(value, path, leaves)
        }
    }

    fn is_match(&self, path: &[String]) -> bool {
        let Some(key) = path.last() else {
            return false;
        };
        self.rules.iter().any(|rule| match rule {
            Rule::Key(segment) => segment.matches(key),
            Rule::Path(segments) => {
                segments.len() == path.len()
                    && segments.iter().zip(path).all(|(s, k)| s.matches(k))
            }
        })
    }

    /// Scrub one top-level section at a time, keeping each result only if the
    /// occurrence still deserializes with it.
    ///
    /// A section that fits neither way is replaced, never sent as it was:
    /// the body becomes a redacted message, optional sections are removed and
    /// the level (an enum with no free text) keeps its value.
    fn scrub_by_section(&self, original: Map<String, Value>, level: Level) -> Occurrence {
        let mut merged = original.clone();
        for (key, section) in original {
            let mut path = vec![key.clone()];
            let marked = self.scrub_entry(section.clone(), &mut path, Leaves::Marker);
            if marked == section {
                continue;
            }
            let typed = self.scrub_entry(section, &mut path, Leaves::Typed);
            let accepted = [marked, typed]
                .into_iter()
                .find(|candidate| fits(&merged, &key, candidate));

            if let Some(candidate) = accepted {
                merged.insert(key, candidate);
                continue;
            }
            match key.as_str() {
                "level" => {}
                "body" => {
                    tracing::warn!("Scrubbed body no longer fits its type; replacing it");
                    merged.insert("body".to_string(), json!({"message": {"body": REDACTED}}));
                }
                _ => {
                    tracing::warn!(
                        section = %key,
                        "Scrubbed section no longer fits its type; removing it"
                    );
                    merged.remove(&key);
                }
            }
        }

        serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                "Scrubbed occurrence is invalid; sending a redacted message"
            );
            Occurrence::new(level, Body::message(REDACTED))
        })
    }
}

/// How [`redact`] treats scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaves {
    /// Every scalar becomes the marker
    Marker,
    /// Strings become the marker, numbers and booleans become null
    Typed,
}

/// Replace every leaf of `value`, keeping containers and nulls.
fn redact(value: Value, leaves: Leaves) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, redact(v, leaves)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| redact(v, leaves)).collect())
        }
        Value::Null => Value::Null,
        Value::String(_) => Value::String(REDACTED.to_string()),
        _ => match leaves {
            Leaves::Marker => Value::String(REDACTED.to_string()),
            Leaves::Typed => Value::Null,
        },
    }
}

/// Whether `tree` still deserializes with `key` set to `candidate`.
fn fits(tree: &Map<String, Value>, key: &str, candidate: &Value) -> bool {
    let mut trial = tree.clone();
    trial.insert(key.to_string(), candidate.clone());
    serde_json::from_value::<Occurrence>(Value::Object(trial)).is_ok()
}

impl Scrubber for FieldScrubber {
    fn scrub(&self, data: Occurrence) -> Occurrence {
        if self.rules.is_empty() {
            return data;
        }
        let tree = match serde_json::to_value(&data) {
            Ok(Value::Object(tree)) => tree,
            Ok(_) => return Occurrence::new(data.level, Body::message(REDACTED)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not serialize occurrence for scrubbing");
                return Occurrence::new(data.level, Body::message(REDACTED));
            }
        };

        match serde_json::from_value(self.scrub_value(Value::Object(tree.clone()))) {
            Ok(scrubbed) => scrubbed,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "Scrub pattern matched a typed field; scrubbing by section"
                );
                self.scrub_by_section(tree, data.level)
            }
        }
    }
}
