//! Evaluation case definitions.

use serde::{Deserialize, Serialize};

use super::extension::ExtensionCollection;

/// Default pass threshold applied to every metric of a case.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Placeholder substituted by [`EvalCase::rendered_prompt`].
pub const INPUT_PLACEHOLDER: &str = "{input_text}";

/// One scripted prompt + expectation + metrics; the unit of evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCase {
    /// Unique (within a plan) case name.
    pub name: String,

    /// Prompt handed to the coder.
    pub input: String,

    /// Wraps `input` before it reaches the coder; `{input_text}` is replaced
    /// by the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Reference answer for metrics that compare against one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    /// Metric names to score this case with, in report order.
    #[serde(default)]
    pub metrics: Vec<String>,

    /// `passed = score >= threshold` for every metric of this case.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Case-level extension override, merged last (replaces by name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ExtensionCollection>,

    /// Instructions written to the assistant's primary instruction file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Capability flags the coder must advertise to run this case.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl EvalCase {
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            prompt_template: None,
            expected_output: None,
            metrics: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            extensions: None,
            instructions: None,
            required_capabilities: Vec::new(),
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    /// The prompt handed to the coder.
    pub fn rendered_prompt(&self) -> String {
        match &self.prompt_template {
            Some(template) => template.replace(INPUT_PLACEHOLDER, &self.input),
            None => self.input.clone(),
        }
    }

    pub fn expecting(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metrics.push(metric.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionCollection) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let case = EvalCase::new("arith", "What is 2+2?")
            .expecting("4")
            .with_metric("exact_match")
            .with_metric("contains")
            .with_threshold(0.9);

        assert_eq!(case.expected_output.as_deref(), Some("4"));
        assert_eq!(case.metrics, vec!["exact_match", "contains"]);
        assert_eq!(case.threshold, 0.9);
    }

    #[test]
    fn test_prompt_template_wraps_input() {
        let case = EvalCase::new("arith", "What is 2+2?");
        assert_eq!(case.rendered_prompt(), "What is 2+2?");

        let case = case.with_prompt_template("Answer tersely. {input_text} Reply with a number.");
        assert_eq!(
            case.rendered_prompt(),
            "Answer tersely. What is 2+2? Reply with a number."
        );

        let fixed = EvalCase::new("fixed", "ignored").with_prompt_template("no placeholder");
        assert_eq!(fixed.rendered_prompt(), "no placeholder");
    }

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let case: EvalCase = serde_json::from_value(serde_json::json!({
            "name": "hello",
            "input": "say hello"
        }))
        .unwrap();

        assert_eq!(case.threshold, DEFAULT_THRESHOLD);
        assert!(case.metrics.is_empty());
        assert!(case.extensions.is_none());
        assert!(case.required_capabilities.is_empty());
    }
}
