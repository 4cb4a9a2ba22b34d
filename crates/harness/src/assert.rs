//! Path-addressed assertions over decoded JSON documents
//!
//! An assertion names a JMESPath expression, an existence expectation, and an
//! optional pattern. A batch is always evaluated in full; every failure is
//! collected into one report instead of stopping at the first.

use jmespath::{Rcvar, Variable};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// One expectation about a path inside a document.
///
/// A supplied pattern implies the existence requirement even when `exists`
/// is left false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// JMESPath expression addressing the value under test.
    pub path: String,

    /// Whether a value must be present at the path.
    #[serde(default)]
    pub exists: bool,

    /// Pattern the resolved value (or at least one list element) must match.
    #[serde(default)]
    pub pattern: Option<String>,
}

impl Assertion {
    /// Expect a value to be present at `path`.
    pub fn present(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: true,
            pattern: None,
        }
    }

    /// Expect no value at `path`.
    pub fn absent(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            pattern: None,
        }
    }

    /// Expect the value at `path` to match `pattern`.
    pub fn matches(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: true,
            pattern: Some(pattern.into()),
        }
    }
}

/// A single failed assertion, in batch order.
#[derive(Debug)]
pub struct AssertionFailure {
    /// Path of the assertion that failed.
    pub path: String,

    /// What went wrong at that path.
    pub cause: Error,
}

/// Outcome of evaluating one batch of assertions.
#[derive(Debug)]
pub struct EvaluationReport {
    total: usize,
    failures: Vec<AssertionFailure>,
}

impl EvaluationReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, path: String, cause: Error) {
        self.failures.push(AssertionFailure { path, cause });
    }

    /// True when every assertion in the batch succeeded.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of assertions evaluated.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Failures in the order the assertions were supplied.
    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    /// Collapse the report into one combined error listing every failure.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let report = self
            .failures
            .iter()
            .map(|f| format!("- {}", f.cause))
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::AssertionsFailed {
            failed: self.failures.len(),
            total: self.total,
            report,
        })
    }
}

/// Evaluate a batch of assertions against one document.
///
/// Pure with respect to `root`; never short-circuits. Each assertion
/// contributes at most one failure to the report.
pub fn evaluate(root: &Value, assertions: &[Assertion]) -> EvaluationReport {
    let mut report = EvaluationReport::new(assertions.len());

    // The document is parsed once; every assertion searches the same tree.
    let doc = match Variable::from_json(&root.to_string()) {
        Ok(parsed) => Rcvar::new(parsed),
        Err(reason) => {
            for assertion in assertions {
                report.record(
                    assertion.path.clone(),
                    Error::Internal(format!("document is not queryable: {}", reason)),
                );
            }
            return report;
        }
    };

    for assertion in assertions {
        if let Err(cause) = check_one(&doc, assertion) {
            debug!("assertion on '{}' failed: {}", assertion.path, cause);
            report.record(assertion.path.clone(), cause);
        }
    }
    report
}

fn check_one(doc: &Rcvar, assertion: &Assertion) -> Result<()> {
    let expr = jmespath::compile(&assertion.path).map_err(|e| Error::PathResolution {
        path: assertion.path.clone(),
        reason: e.to_string(),
    })?;
    let found = expr.search(doc.clone()).map_err(|e| Error::PathResolution {
        path: assertion.path.clone(),
        reason: e.to_string(),
    })?;

    let wants_value = assertion.exists || assertion.pattern.is_some();

    // Projections and filters that matched nothing come back as an empty
    // list; a harness has to read that as absence, not as an empty value.
    let absent = found.is_null() || found.as_array().map_or(false, |a| a.is_empty());
    if absent {
        if wants_value {
            return Err(Error::ValueAbsent {
                path: assertion.path.clone(),
            });
        }
        return Ok(());
    }
    if !wants_value {
        return Err(Error::ValuePresent {
            path: assertion.path.clone(),
            value: render_value(&found),
        });
    }

    let pattern = match &assertion.pattern {
        Some(pattern) => pattern,
        None => return Ok(()),
    };
    let re = Regex::new(pattern).map_err(|e| Error::PatternCompile {
        pattern: pattern.clone(),
        reason: e.to_string(),
    })?;

    if let Some(text) = scalar_text(&found) {
        if re.is_match(&text) {
            return Ok(());
        }
        return Err(Error::PatternMismatch {
            path: assertion.path.clone(),
            pattern: pattern.clone(),
            value: text,
        });
    }

    if let Some(items) = found.as_array() {
        // Existential semantics: one matching scalar element is enough.
        // Elements that are not scalars never match.
        for item in items {
            if let Some(text) = scalar_text(item) {
                if re.is_match(&text) {
                    return Ok(());
                }
            }
        }
        return Err(Error::PatternMismatch {
            path: assertion.path.clone(),
            pattern: pattern.clone(),
            value: render_value(&found),
        });
    }

    Err(Error::UnsupportedShape {
        path: assertion.path.clone(),
        shape: shape_name(&found),
    })
}

/// Canonical text for a scalar value, `None` for anything else.
fn scalar_text(var: &Variable) -> Option<String> {
    if let Some(text) = var.as_string() {
        return Some(text.clone());
    }
    if let Some(flag) = var.as_boolean() {
        return Some(flag.to_string());
    }
    var.as_number().map(render_number)
}

/// Numbers print without a trailing `.0` when they are integral.
fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Diagnostic rendering of a resolved value for failure messages.
fn render_value(var: &Variable) -> String {
    if var.is_null() {
        return "null".to_string();
    }
    if let Some(text) = var.as_string() {
        return format!("\"{}\"", text);
    }
    if let Some(text) = scalar_text(var) {
        return text;
    }
    if let Some(items) = var.as_array() {
        let inner: Vec<String> = items.iter().map(|item| render_value(item)).collect();
        return format!("[{}]", inner.join(", "));
    }
    if let Some(map) = var.as_object() {
        let inner: Vec<String> = map
            .iter()
            .map(|(key, value)| format!("\"{}\": {}", key, render_value(value)))
            .collect();
        return format!("{{{}}}", inner.join(", "));
    }
    "<expression>".to_string()
}

fn shape_name(var: &Variable) -> &'static str {
    if var.as_object().is_some() {
        "an object"
    } else {
        "an expression reference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_document() -> Value {
        json!({
            "status": 200,
            "request": {
                "uri": "/index.html",
                "querystring": {
                    "arg": {
                        "multiValue": [
                            { "value": "val1" },
                            { "value": "val2" }
                        ],
                        "value": "val1"
                    }
                },
                "headers": {
                    "accept": {
                        "multiValue": [
                            { "value": "application/json" }
                        ],
                        "value": "application/json"
                    }
                }
            },
            "test": { "value": true },
            "nothing": null
        })
    }

    #[test]
    fn batch_of_passing_assertions_is_ok() {
        let report = evaluate(
            &response_document(),
            &[
                Assertion::present("status"),
                Assertion::matches("status", "^200$"),
                Assertion::matches("request.uri", r"^/index\.html$"),
                Assertion::matches("test.value", "^true$"),
                Assertion::matches("length(request.querystring.arg.multiValue)", "^2$"),
            ],
        );
        assert!(report.is_ok(), "unexpected failures: {:?}", report.failures());
        assert_eq!(report.total(), 5);
    }

    #[test]
    fn filter_and_pipe_expressions_resolve() {
        let report = evaluate(
            &response_document(),
            &[Assertion::matches(
                "request.querystring.arg.multiValue[?value=='val2'] | [0].value",
                "^val2$",
            )],
        );
        assert!(report.is_ok(), "unexpected failures: {:?}", report.failures());
    }

    #[test]
    fn list_matching_is_existential() {
        let doc = response_document();
        let hit = evaluate(
            &doc,
            &[Assertion::matches(
                "request.querystring.arg.multiValue[*].value",
                "^val2$",
            )],
        );
        assert!(hit.is_ok());

        let miss = evaluate(
            &doc,
            &[Assertion::matches(
                "request.querystring.arg.multiValue[*].value",
                "^val3$",
            )],
        );
        assert!(!miss.is_ok());
        assert!(matches!(
            miss.failures()[0].cause,
            Error::PatternMismatch { .. }
        ));
    }

    #[test]
    fn explicit_null_counts_as_absent() {
        let doc = response_document();
        assert!(evaluate(&doc, &[Assertion::absent("nothing")]).is_ok());

        let report = evaluate(&doc, &[Assertion::present("nothing")]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::ValueAbsent { .. }
        ));
    }

    #[test]
    fn missing_key_counts_as_absent() {
        let doc = response_document();
        assert!(evaluate(&doc, &[Assertion::absent("request.missing")]).is_ok());

        let report = evaluate(&doc, &[Assertion::present("request.missing")]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::ValueAbsent { .. }
        ));
    }

    #[test]
    fn empty_filter_projection_counts_as_absent() {
        let report = evaluate(
            &response_document(),
            &[Assertion::present(
                "request.querystring.arg.multiValue[?value=='val9']",
            )],
        );
        assert!(matches!(
            report.failures()[0].cause,
            Error::ValueAbsent { .. }
        ));
    }

    #[test]
    fn present_value_fails_an_absence_assertion() {
        let report = evaluate(&response_document(), &[Assertion::absent("status")]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::ValuePresent { .. }
        ));
    }

    #[test]
    fn empty_path_is_a_resolution_failure() {
        let report = evaluate(&response_document(), &[Assertion::present("")]);
        assert_eq!(report.failures().len(), 1);
        let failure = &report.failures()[0];
        assert_eq!(failure.path, "");
        assert!(matches!(failure.cause, Error::PathResolution { .. }));
    }

    #[test]
    fn malformed_path_does_not_abort_siblings() {
        let report = evaluate(
            &response_document(),
            &[
                Assertion::present("query["),
                Assertion::present("status"),
                Assertion::matches("request.uri", "^/missing$"),
            ],
        );
        assert_eq!(report.failures().len(), 2, "both failures recorded");
        assert!(matches!(
            report.failures()[0].cause,
            Error::PathResolution { .. }
        ));
        assert_eq!(report.failures()[1].path, "request.uri");
    }

    #[test]
    fn invalid_pattern_is_reported_not_panicked() {
        let report = evaluate(&response_document(), &[Assertion::matches("status", "(")]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::PatternCompile { .. }
        ));
    }

    #[test]
    fn objects_cannot_be_pattern_matched() {
        let report = evaluate(&response_document(), &[Assertion::matches("request", ".")]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::UnsupportedShape { .. }
        ));
    }

    #[test]
    fn pattern_implies_existence() {
        let assertion = Assertion {
            path: "request.missing".to_string(),
            exists: false,
            pattern: Some(".*".to_string()),
        };
        let report = evaluate(&response_document(), &[assertion]);
        assert!(matches!(
            report.failures()[0].cause,
            Error::ValueAbsent { .. }
        ));
    }

    #[test]
    fn unanchored_patterns_match_substrings() {
        let report = evaluate(
            &response_document(),
            &[Assertion::matches("request.uri", "index")],
        );
        assert!(report.is_ok());
    }

    #[test]
    fn combined_error_names_every_failing_path() {
        let err = evaluate(
            &response_document(),
            &[
                Assertion::present("request.missing"),
                Assertion::matches("request.uri", "^/missing$"),
                Assertion::present("status"),
            ],
        )
        .into_result()
        .unwrap_err();

        let rendered = err.to_string();
        assert!(rendered.contains("2 of 3 assertions failed"), "got: {}", rendered);
        assert!(rendered.contains("request.missing"), "got: {}", rendered);
        assert!(rendered.contains("request.uri"), "got: {}", rendered);
    }

    #[test]
    fn assertions_deserialize_with_lenient_defaults() {
        let assertion: Assertion = serde_json::from_value(json!({ "path": "status" })).unwrap();
        assert!(!assertion.exists);
        assert!(assertion.pattern.is_none());
    }
}
