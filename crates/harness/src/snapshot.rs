//! Snapshot comparison with embedded patterns
//!
//! Expected values come from JSON fixtures. A string leaf carrying the
//! `regex::` marker is compiled into a pattern at decode time, so a bad
//! pattern surfaces as a hard error instead of a mismatch. Fixtures named
//! with the templated suffix go through placeholder substitution before
//! they are parsed.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Fixture names ending in this suffix are templated before parsing.
pub const TEMPLATED_SUFFIX: &str = ".tmpl.json";

/// Marker prefix turning a fixture string leaf into a pattern.
const PATTERN_PREFIX: &str = "regex::";

/// An expected-value tree decoded from a fixture document.
#[derive(Debug, Clone)]
pub enum Expected {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Pattern(Regex),
    Array(Vec<Expected>),
    Object(BTreeMap<String, Expected>),
}

impl Expected {
    /// Decode a fixture value, compiling `regex::` leaves.
    pub fn decode(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Expected::Null,
            Value::Bool(flag) => Expected::Bool(*flag),
            Value::Number(number) => Expected::Number(number.clone()),
            Value::String(text) => match text.strip_prefix(PATTERN_PREFIX) {
                Some(pattern) => {
                    let re = Regex::new(pattern).map_err(|e| Error::PatternCompile {
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    })?;
                    Expected::Pattern(re)
                }
                None => Expected::Text(text.clone()),
            },
            Value::Array(items) => Expected::Array(
                items.iter().map(Expected::decode).collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                let mut decoded = BTreeMap::new();
                for (key, item) in map {
                    decoded.insert(key.clone(), Expected::decode(item)?);
                }
                Expected::Object(decoded)
            }
        })
    }
}

/// One divergence between expected and actual at a specific path.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub path: String,
    pub detail: String,
}

/// Every divergence found by a comparison; empty means equal.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    mismatches: Vec<Mismatch>,
}

impl Diff {
    /// True when expected and actual agreed everywhere.
    pub fn is_empty(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// The recorded divergences, in document order.
    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    /// Collapse into a hard error naming the snapshot.
    pub fn into_result(self, name: &str) -> Result<()> {
        if self.mismatches.is_empty() {
            return Ok(());
        }
        Err(Error::SnapshotDrift {
            name: name.to_string(),
            diff: self.to_string(),
        })
    }

    fn record(&mut self, path: &str, detail: String) {
        self.mismatches.push(Mismatch {
            path: path.to_string(),
            detail,
        });
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.mismatches.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", m.path, m.detail)?;
        }
        Ok(())
    }
}

/// Structurally compare an expected tree against an actual document.
///
/// Objects are compared by key set and recursively by value, arrays by
/// length and position, scalars by canonical equality. Pattern leaves match
/// instead of comparing literally.
pub fn compare(expected: &Expected, actual: &Value) -> Diff {
    let mut diff = Diff::default();
    compare_at("$", expected, actual, &mut diff);
    if !diff.is_empty() {
        debug!("snapshot comparison found {} mismatches", diff.mismatches.len());
    }
    diff
}

fn compare_at(path: &str, expected: &Expected, actual: &Value, diff: &mut Diff) {
    match expected {
        Expected::Null => {
            if !actual.is_null() {
                diff.record(path, format!("expected null, found {}", actual));
            }
        }
        Expected::Bool(want) => match actual.as_bool() {
            Some(got) if got == *want => {}
            _ => diff.record(path, format!("expected {}, found {}", want, actual)),
        },
        Expected::Number(want) => match actual {
            Value::Number(got) if numbers_equal(want, got) => {}
            _ => diff.record(path, format!("expected {}, found {}", want, actual)),
        },
        Expected::Text(want) => match actual.as_str() {
            Some(got) if got == want => {}
            Some(got) => diff.record(path, format!("expected \"{}\", found \"{}\"", want, got)),
            None => diff.record(path, format!("expected \"{}\", found {}", want, actual)),
        },
        Expected::Pattern(re) => match actual.as_str() {
            Some(got) => {
                // When the observed side also carries the marker, the two
                // pattern texts must be identical.
                if let Some(other) = got.strip_prefix(PATTERN_PREFIX) {
                    if other != re.as_str() {
                        diff.record(
                            path,
                            format!(
                                "pattern texts differ: expected \"{}\", found \"{}\"",
                                re.as_str(),
                                other
                            ),
                        );
                    }
                } else if !re.is_match(got) {
                    diff.record(
                        path,
                        format!("\"{}\" does not match pattern \"{}\"", got, re.as_str()),
                    );
                }
            }
            None => diff.record(
                path,
                format!(
                    "expected a string matching \"{}\", found {}",
                    re.as_str(),
                    actual
                ),
            ),
        },
        Expected::Array(want) => match actual.as_array() {
            Some(got) => {
                if want.len() != got.len() {
                    diff.record(
                        path,
                        format!("expected {} elements, found {}", want.len(), got.len()),
                    );
                }
                for (i, (w, g)) in want.iter().zip(got.iter()).enumerate() {
                    compare_at(&format!("{}[{}]", path, i), w, g, diff);
                }
            }
            None => diff.record(path, format!("expected an array, found {}", actual)),
        },
        Expected::Object(want) => match actual.as_object() {
            Some(got) => {
                for (key, w) in want {
                    let child = format!("{}.{}", path, key);
                    match got.get(key) {
                        Some(g) => compare_at(&child, w, g, diff),
                        None => diff.record(&child, "missing key".to_string()),
                    }
                }
                for key in got.keys() {
                    if !want.contains_key(key) {
                        diff.record(&format!("{}.{}", path, key), "unexpected key".to_string());
                    }
                }
            }
            None => diff.record(path, format!("expected an object, found {}", actual)),
        },
    }
}

fn numbers_equal(want: &serde_json::Number, got: &serde_json::Number) -> bool {
    want == got || want.as_f64() == got.as_f64()
}

/// Named placeholders substituted into templated fixtures.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one placeholder value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Substitute every `{{.Name}}` placeholder in `text`.
    ///
    /// A placeholder without a configured value is a hard error; fixtures
    /// must never silently compare against an unfilled template.
    pub fn apply(&self, text: &str) -> Result<String> {
        let placeholder = Regex::new(r"\{\{\s*\.(\w+)\s*\}\}")
            .map_err(|e| Error::Internal(format!("placeholder pattern: {}", e)))?;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in placeholder.captures_iter(text) {
            let (whole, name) = match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(name)) => (whole, name),
                _ => continue,
            };
            out.push_str(&text[last..whole.start()]);
            let value = self
                .values
                .get(name.as_str())
                .ok_or_else(|| Error::UnresolvedVariable(name.as_str().to_string()))?;
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

/// Parse fixture text into an expected tree, templating it first when the
/// fixture name carries the templated suffix.
pub fn parse_fixture(name: &str, text: &str, vars: &Variables) -> Result<Expected> {
    let rendered = if name.ends_with(TEMPLATED_SUFFIX) {
        vars.apply(text)?
    } else {
        text.to_string()
    };
    let value: Value = serde_json::from_str(&rendered)?;
    Expected::decode(&value)
}

/// Locates the slice of an entity one snapshot check covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    /// Dotted field path into the entity; `"."` selects the whole entity.
    pub field_path: String,

    /// Re-parse the addressed string field as embedded JSON first.
    #[serde(default)]
    pub embedded_json: bool,

    /// Fixture name, used for suffix detection and reporting.
    pub fixture: String,
}

/// Compare one field of a serializable entity against a fixture.
///
/// Extraction, embedded-JSON parsing, and fixture errors are hard failures,
/// never mismatches.
pub fn check_entity<T: Serialize>(
    entity: &T,
    check: &Check,
    fixture_text: &str,
    vars: &Variables,
) -> Result<Diff> {
    let root = serde_json::to_value(entity)?;
    let mut field = extract_field(&root, &check.field_path)?;
    if check.embedded_json {
        let text = field.as_str().ok_or_else(|| Error::EmbeddedJson {
            path: check.field_path.clone(),
            reason: "field is not a string".to_string(),
        })?;
        field = serde_json::from_str(text).map_err(|e| Error::EmbeddedJson {
            path: check.field_path.clone(),
            reason: e.to_string(),
        })?;
    }
    let expected = parse_fixture(&check.fixture, fixture_text, vars)?;
    Ok(compare(&expected, &field))
}

fn extract_field(root: &Value, field_path: &str) -> Result<Value> {
    if field_path == "." {
        return Ok(root.clone());
    }
    let mut cursor = root;
    for segment in field_path.split('.') {
        cursor = match cursor.get(segment) {
            Some(next) => next,
            None => {
                return Err(Error::FieldNotFound {
                    path: field_path.to_string(),
                    entity: describe(root),
                })
            }
        };
    }
    Ok(cursor.clone())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        Value::Array(items) => format!("array of {}", items.len()),
        other => other.to_string(),
    }
}
