//! Structured job summary produced from model output.
//!
//! The cache stores the raw model text, not this struct; the summary is parsed
//! again on every read so that shape changes never require cache invalidation.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DomainError, DomainResult};

/// Pay period reported by the posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryPeriod {
    Yearly,
    Monthly,
    Weekly,
    Hourly,
}

/// Salary information, only present when the posting states it explicitly.
///
/// Every field is optional and may be `null` in model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Salary {
    #[serde(default, alias = "min", skip_serializing_if = "Option::is_none")]
    pub min_salary: Option<f64>,
    #[serde(default, alias = "max", skip_serializing_if = "Option::is_none")]
    pub max_salary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<SalaryPeriod>,
}

/// Summary of one job posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub must_haves: Vec<String>,
    pub preferred: Vec<String>,
    pub requirements: Vec<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_salary",
        skip_serializing_if = "Option::is_none"
    )]
    pub salary: Option<Salary>,
}

impl JobSummary {
    /// True when the model found nothing worth showing.
    pub fn is_empty(&self) -> bool {
        self.must_haves.is_empty()
            && self.preferred.is_empty()
            && self.requirements.is_empty()
            && self.salary.is_none()
    }
}

/// Models sometimes answer `"salary": []` instead of omitting the field.
fn deserialize_salary<'de, D>(deserializer: D) -> Result<Option<Salary>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SalaryField {
        Object(Salary),
        List(Vec<serde_json::Value>),
    }

    match Option::<SalaryField>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SalaryField::Object(salary)) => Ok(Some(salary)),
        Some(SalaryField::List(items)) if items.is_empty() => Ok(None),
        Some(SalaryField::List(_)) => Err(serde::de::Error::custom(
            "salary must be an object, null or an empty list",
        )),
    }
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\n(.*?)\n```").expect("valid fence pattern"));

/// Strip an optional Markdown code fence around model output.
///
/// The first fenced block wins; text without a fence is returned trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Parse and validate raw model output into a [`JobSummary`].
///
/// Unparseable text and shape mismatches are both validation failures.
pub fn parse_summary(raw: &str) -> DomainResult<JobSummary> {
    let json_text = strip_code_fence(raw);

    let value: serde_json::Value = serde_json::from_str(json_text)
        .map_err(|e| DomainError::validation(format!("model output is not valid JSON: {e}")))?;

    serde_json::from_value(value).map_err(|e| {
        tracing::debug!(error = %e, "model output failed summary validation");
        DomainError::validation(format!("model output does not match the summary shape: {e}"))
    })
}
