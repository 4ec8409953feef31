//! Benchmark Record - one line of an evaluation result file

use serde::{Deserialize, Serialize};

/// Per-request decoding statistics reported by the evaluation harness.
///
/// Every field is optional. Absent (or `null`) arrays are treated as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    wall_time: Option<Vec<f64>>,
    #[serde(default)]
    decoding_steps: Option<Vec<f64>>,
    #[serde(default)]
    new_tokens: Option<Vec<f64>>,
    #[serde(default)]
    accept_lengths: Option<Vec<f64>>,
}

impl Choice {
    /// Create a choice from its four series.
    #[must_use]
    pub fn new(
        wall_time: Vec<f64>,
        decoding_steps: Vec<f64>,
        new_tokens: Vec<f64>,
        accept_lengths: Vec<f64>,
    ) -> Self {
        Self {
            wall_time: Some(wall_time),
            decoding_steps: Some(decoding_steps),
            new_tokens: Some(new_tokens),
            accept_lengths: Some(accept_lengths),
        }
    }

    /// Per-turn wall-clock times in seconds.
    #[must_use]
    pub fn wall_time(&self) -> &[f64] {
        self.wall_time.as_deref().unwrap_or_default()
    }

    /// Per-turn decoding step counts.
    #[must_use]
    pub fn decoding_steps(&self) -> &[f64] {
        self.decoding_steps.as_deref().unwrap_or_default()
    }

    /// Per-turn generated token counts.
    #[must_use]
    pub fn new_tokens(&self) -> &[f64] {
        self.new_tokens.as_deref().unwrap_or_default()
    }

    /// Accepted draft lengths per decoding step.
    #[must_use]
    pub fn accept_lengths(&self) -> &[f64] {
        self.accept_lengths.as_deref().unwrap_or_default()
    }
}

/// One evaluation result line.
///
/// Only the first entry of `choices` is used for aggregation; fields the
/// harness adds beyond `category` and `choices` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    choices: Option<Vec<Choice>>,
}

impl BenchmarkRecord {
    /// Create a record holding a single choice.
    #[must_use]
    pub fn with_choice(choice: Choice) -> Self {
        Self {
            category: None,
            choices: Some(vec![choice]),
        }
    }

    /// Tag the record with a question category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Question category (`writing`, `translation`, `qa`, ...).
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// All choices in harness order.
    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        self.choices.as_deref().unwrap_or_default()
    }

    /// The choice consulted by the aggregator, if any.
    #[must_use]
    pub fn primary_choice(&self) -> Option<&Choice> {
        self.choices().first()
    }
}

/// Records parsed from a newline-delimited JSON file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecords {
    /// Successfully decoded records, in file order
    pub records: Vec<BenchmarkRecord>,
    /// Number of non-blank lines that failed to decode
    pub skipped: usize,
}

impl ParsedRecords {
    /// Decode every non-blank line of `bytes`.
    ///
    /// Malformed lines are logged and counted in `skipped`; they never fail
    /// the whole file.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut parsed = Self::default();

        for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<BenchmarkRecord>(line) {
                Ok(record) => parsed.records.push(record),
                Err(e) => {
                    let err = crate::Error::Parse {
                        line: idx + 1,
                        message: e.to_string(),
                    };
                    tracing::debug!(error = %err, "skipping malformed result line");
                    parsed.skipped += 1;
                }
            }
        }

        if parsed.skipped > 0 {
            tracing::warn!(
                skipped = parsed.skipped,
                parsed = parsed.records.len(),
                "skipped malformed result lines"
            );
        }

        parsed
    }
}
