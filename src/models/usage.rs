use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Token and cost metadata for a single LangSmith run.
///
/// Every field is optional upstream; missing values count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Cost in dollars. LangSmith serializes decimals as strings, so both
    /// numbers and numeric strings are accepted.
    #[serde(default, deserialize_with = "deserialize_cost")]
    pub total_cost: Option<f64>,
}

impl UsageRecord {
    pub fn new(input_tokens: u64, output_tokens: u64, total_cost: f64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_cost: Some(total_cost),
        }
    }
}

fn deserialize_cost<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cost {
        Number(f64),
        Text(String),
    }

    match Option::<Cost>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Cost::Number(n)) => Ok(Some(n)),
        Some(Cost::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Cost::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid cost '{s}': {e}"))),
    }
}

/// Running totals folded from a sequence of usage records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    /// Records seen, whether or not they carried usage data.
    pub run_count: u64,
}

impl UsageTotals {
    /// Fold a set of records into totals.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        let mut totals = Self::default();
        for record in records {
            totals.record(record);
        }
        totals
    }

    /// Add one record to the totals.
    pub fn record(&mut self, record: &UsageRecord) {
        self.run_count += 1;
        // Token counts come from upstream; clamp rather than overflow.
        self.input_tokens = self
            .input_tokens
            .saturating_add(record.input_tokens.unwrap_or(0));
        self.output_tokens = self
            .output_tokens
            .saturating_add(record.output_tokens.unwrap_or(0));
        self.total_cost += record.total_cost.unwrap_or(0.0);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Usage totals for a billing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Always `input_tokens + output_tokens`.
    pub total_tokens: u64,
    /// Cost in dollars.
    pub total_cost: f64,
    /// Whole days between window start and end (floor).
    pub period_days: i64,
    pub run_count: u64,
    /// Window start (YYYY-MM-DD)
    pub start_date: String,
    /// Window end (YYYY-MM-DD)
    pub end_date: String,
    /// Whether the window came from a cycle day rather than a days-back range.
    pub cycle_based: bool,
}

/// Usage for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    /// Serialized as YYYY-MM-DD.
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Cost in dollars for this day.
    pub cost: f64,
}

impl DailyUsage {
    /// A day with no recorded usage, also used when the day's query failed.
    pub fn zero(date: NaiveDate) -> Self {
        Self::from_totals(date, UsageTotals::default())
    }

    pub fn from_totals(date: NaiveDate, totals: UsageTotals) -> Self {
        Self {
            date,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            total_tokens: totals.total_tokens(),
            cost: totals.total_cost,
        }
    }
}
