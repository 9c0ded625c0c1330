use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};

/// Maximum length, in characters, of a guideline name.
pub const MAX_GUIDELINE_NAME_CHARS: usize = 255;

/// One of the three possible classification outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Complies,
    Deviates,
    Unclear,
}

impl Label {
    /// Candidate label set, in the order sent to the classifier.
    pub const ALL: [Label; 3] = [Label::Complies, Label::Deviates, Label::Unclear];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Complies => "complies",
            Label::Deviates => "deviates",
            Label::Unclear => "unclear",
        }
    }

    /// Precedence used when several guideline results compete for one action.
    pub fn priority(self) -> u8 {
        match self {
            Label::Complies => 3,
            Label::Deviates => 2,
            Label::Unclear => 1,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complies" => Ok(Label::Complies),
            "deviates" => Ok(Label::Deviates),
            "unclear" => Ok(Label::Unclear),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

impl ToSql for Label {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Label {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("confidence must be a number in [0, 1], got {0}")]
pub struct InvalidConfidence(pub f64);

/// Classifier confidence in `[0, 1]`, persisted and serialised with four
/// decimal places (`0.94` becomes `"0.9400"`).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Result<Self, InvalidConfidence> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidConfidence(value))
        }
    }

    pub fn to_fixed(self) -> String {
        format!("{:.4}", self.0)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed())
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed())
    }
}

impl ToSql for Confidence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_fixed()))
    }
}

impl FromSql for Confidence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let parsed = match value {
            ValueRef::Real(f) => f,
            ValueRef::Integer(i) => i as f64,
            other => other
                .as_str()?
                .parse::<f64>()
                .map_err(|e| FromSqlError::Other(Box::new(e)))?,
        };
        Confidence::new(parsed).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A named, reusable policy statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Guideline {
    pub id: i64,
    pub name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One evaluated `(action, guideline)` pair and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub action: String,
    pub guideline_id: i64,
    pub result: Label,
    pub confidence: Confidence,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A submission joined to the text of its guideline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionWithGuideline {
    #[serde(flatten)]
    pub submission: Submission,
    pub guideline: String,
}

/// Input to `SubmissionStore::create_submission`. `guideline` is raw text,
/// resolved to an existing guideline row by exact match or inserted.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub action: String,
    pub guideline: String,
    pub result: Label,
    pub confidence: Confidence,
}
