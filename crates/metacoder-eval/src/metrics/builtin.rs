//! Deterministic built-in metrics.

use async_trait::async_trait;
use regex::Regex;

use super::{Metric, MetricScore, ScoringInput};
use crate::error::MetricError;

/// Trim, collapse internal whitespace, lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Actual equals expected after trimming surrounding whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

#[async_trait]
impl Metric for ExactMatch {
    fn name(&self) -> &str {
        "exact_match"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let expected = input.require_expected(self.name())?;
        let ok = input.actual.trim() == expected.trim();
        Ok(MetricScore::binary(
            ok,
            if ok { "exact match" } else { "output differs from expected" },
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedMatch;

#[async_trait]
impl Metric for NormalizedMatch {
    fn name(&self) -> &str {
        "normalized_match"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let expected = input.require_expected(self.name())?;
        let ok = normalize(input.actual) == normalize(expected);
        Ok(MetricScore::binary(
            ok,
            if ok {
                "match after normalization"
            } else {
                "no match after normalization"
            },
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Contains;

#[async_trait]
impl Metric for Contains {
    fn name(&self) -> &str {
        "contains"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let expected = input.require_expected(self.name())?;
        let ok = input.actual.contains(expected.trim());
        Ok(MetricScore::binary(
            ok,
            if ok {
                "expected text found in output"
            } else {
                "expected text missing from output"
            },
        ))
    }
}

/// Normalized Levenshtein similarity of the normalized texts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyMatch;

#[async_trait]
impl Metric for FuzzyMatch {
    fn name(&self) -> &str {
        "fuzzy_match"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let expected = input.require_expected(self.name())?;
        let similarity = strsim::normalized_levenshtein(&normalize(input.actual), &normalize(expected));
        Ok(MetricScore::new(
            similarity,
            format!("levenshtein similarity {similarity:.3}"),
        ))
    }
}

/// Expected output is a regular expression searched for in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMatch;

#[async_trait]
impl Metric for RegexMatch {
    fn name(&self) -> &str {
        "regex_match"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let pattern = input.require_expected(self.name())?;
        let re = Regex::new(pattern).map_err(|e| MetricError::ComputationFailed {
            metric: self.name().to_string(),
            reason: format!("invalid pattern: {e}"),
        })?;
        let ok = re.is_match(input.actual);
        Ok(MetricScore::binary(
            ok,
            format!("pattern /{pattern}/ {}", if ok { "matched" } else { "did not match" }),
        ))
    }
}

/// 1.0 when the invocation finished without error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionSuccess;

#[async_trait]
impl Metric for ExecutionSuccess {
    fn name(&self) -> &str {
        "execution_success"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        Ok(match &input.transcript.error {
            None if input.transcript.is_success() => MetricScore::binary(true, "invocation succeeded"),
            None => MetricScore::binary(false, "invocation did not complete"),
            Some(err) => MetricScore::binary(false, format!("invocation failed: {err}")),
        })
    }
}

/// Fraction of expected tools (comma-separated) that appear in the transcript.
///
/// A name matches a record by bare tool name, by extension name, or as
/// `extension__tool`. Without expectations, any tool use scores 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolUsage;

#[async_trait]
impl Metric for ToolUsage {
    fn name(&self) -> &str {
        "tool_usage"
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let records = &input.transcript.tool_invocations;
        let wanted: Vec<&str> = input
            .expected
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if wanted.is_empty() {
            return Ok(MetricScore::binary(
                !records.is_empty(),
                format!("{} tool call(s)", records.len()),
            ));
        }

        let used = |name: &str| {
            records.iter().any(|r| {
                r.tool == name
                    || r.extension.as_deref() == Some(name)
                    || r
                        .extension
                        .as_deref()
                        .map(|ext| format!("{ext}__{}", r.tool) == name)
                        .unwrap_or(false)
            })
        };
        let missing: Vec<&str> = wanted.iter().copied().filter(|n| !used(n)).collect();
        let hit = wanted.len() - missing.len();
        let rationale = if missing.is_empty() {
            format!("all {hit} expected tool(s) used")
        } else {
            format!("{hit}/{} expected tool(s) used; missing: {}", wanted.len(), missing.join(", "))
        };
        Ok(MetricScore::new(hit as f64 / wanted.len() as f64, rationale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacoder_core::{ExecutionResult, InvocationError, ToolLog};
    use serde_json::json;

    fn input<'a>(actual: &'a str, expected: Option<&'a str>, t: &'a ExecutionResult) -> ScoringInput<'a> {
        ScoringInput {
            actual,
            expected,
            transcript: t,
        }
    }

    #[tokio::test]
    async fn test_exact_match_trims() {
        let t = ExecutionResult::succeeded("4\n");
        let s = ExactMatch.compute(&input("4\n", Some("4"), &t)).await.unwrap();
        assert_eq!(s.score, 1.0);
        let s = ExactMatch.compute(&input("four", Some("4"), &t)).await.unwrap();
        assert_eq!(s.score, 0.0);
    }

    #[tokio::test]
    async fn test_missing_expected_is_computation_failure() {
        let t = ExecutionResult::succeeded("x");
        let err = ExactMatch.compute(&input("x", None, &t)).await.unwrap_err();
        assert!(matches!(err, MetricError::ComputationFailed { .. }));
    }

    #[tokio::test]
    async fn test_normalized_match() {
        let t = ExecutionResult::succeeded("");
        let s = NormalizedMatch
            .compute(&input("  Hello\n   WORLD ", Some("hello world"), &t))
            .await
            .unwrap();
        assert_eq!(s.score, 1.0);
    }

    #[tokio::test]
    async fn test_contains() {
        let t = ExecutionResult::succeeded("");
        let s = Contains
            .compute(&input("The answer is 4.", Some("4"), &t))
            .await
            .unwrap();
        assert_eq!(s.score, 1.0);
    }

    #[tokio::test]
    async fn test_fuzzy_match_partial() {
        let t = ExecutionResult::succeeded("");
        let s = FuzzyMatch
            .compute(&input("kitten", Some("sitting"), &t))
            .await
            .unwrap();
        assert!(s.score > 0.0 && s.score < 1.0);
        let s = FuzzyMatch.compute(&input("Same", Some("same"), &t)).await.unwrap();
        assert_eq!(s.score, 1.0);
    }

    #[tokio::test]
    async fn test_regex_match_and_bad_pattern() {
        let t = ExecutionResult::succeeded("");
        let s = RegexMatch
            .compute(&input("result: 42", Some(r"\d+"), &t))
            .await
            .unwrap();
        assert_eq!(s.score, 1.0);
        let err = RegexMatch
            .compute(&input("x", Some("(unclosed"), &t))
            .await
            .unwrap_err();
        assert!(matches!(err, MetricError::ComputationFailed { .. }));
    }

    #[tokio::test]
    async fn test_execution_success() {
        let ok = ExecutionResult::succeeded("x");
        assert_eq!(ExecutionSuccess.compute(&input("x", None, &ok)).await.unwrap().score, 1.0);

        let failed = ExecutionResult::failed(InvocationError::Timeout { limit_ms: 10 });
        let s = ExecutionSuccess.compute(&input("", None, &failed)).await.unwrap();
        assert_eq!(s.score, 0.0);
        assert!(s.rationale.contains("timed out"));
    }

    #[tokio::test]
    async fn test_tool_usage_fraction() {
        let mut log = ToolLog::new();
        log.record(None, "mcp__pdf__read_pdf", json!({}));
        log.record(None, "Bash", json!({}));
        let t = ExecutionResult::succeeded("").with_tools(log.into_records());

        let s = ToolUsage
            .compute(&input("", Some("pdf__read_pdf, Bash, WebFetch"), &t))
            .await
            .unwrap();
        assert!((s.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(s.rationale.contains("WebFetch"));

        let s = ToolUsage.compute(&input("", None, &t)).await.unwrap();
        assert_eq!(s.score, 1.0);
    }
}
