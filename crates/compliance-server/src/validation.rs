/// Request validation. Lengths are counted in characters, untrimmed.
use serde::{Deserialize, Serialize};

use compliance_common::model::MAX_GUIDELINE_NAME_CHARS;
use compliance_common::pagination::{
    Pagination, ResultFilter, SubmissionFilters, SubmissionQuery, DEFAULT_LIMIT, DEFAULT_PAGE,
};

use crate::error::AppError;

const MIN_TEXT_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Raw history query string. Everything arrives as text so that bad
/// pagination values degrade to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub result: Option<String>,
    pub search: Option<String>,
    pub confidence_min: Option<String>,
    pub confidence_max: Option<String>,
}

fn check_min_chars(errors: &mut Vec<FieldError>, field: &str, label: &str, value: &str) {
    let chars = value.chars().count();
    if chars == 0 {
        errors.push(FieldError::new(field, format!("{label} is required")));
    } else if chars < MIN_TEXT_CHARS {
        errors.push(FieldError::new(
            field,
            format!("{label} must be at least {MIN_TEXT_CHARS} characters"),
        ));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

pub fn analyze_request(action: &str, guideline: &str) -> Result<(), AppError> {
    let mut errors = Vec::new();
    check_min_chars(&mut errors, "action", "Action", action);
    check_min_chars(&mut errors, "guideline", "Guideline", guideline);
    finish(errors)
}

pub fn classify_request(action: &str, guideline_ids: &[i64]) -> Result<(), AppError> {
    let mut errors = Vec::new();
    check_min_chars(&mut errors, "action", "Action", action);
    if guideline_ids.is_empty() {
        errors.push(FieldError::new(
            "guidelineIds",
            "At least one guideline is required",
        ));
    }
    finish(errors)
}

pub fn new_guideline(name: &str, text: &str) -> Result<(), AppError> {
    let mut errors = Vec::new();
    let name_chars = name.chars().count();
    if name_chars == 0 {
        errors.push(FieldError::new("name", "Name is required"));
    } else if name_chars > MAX_GUIDELINE_NAME_CHARS {
        errors.push(FieldError::new(
            "name",
            format!("Name must be at most {MAX_GUIDELINE_NAME_CHARS} characters"),
        ));
    }
    if text.is_empty() {
        errors.push(FieldError::new("text", "Text is required"));
    }
    finish(errors)
}

/// Positive integer or the default; `page || 1` semantics.
fn lenient_u32(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&n| n >= 1)
        .unwrap_or(default)
}

fn confidence_bound(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&str>,
) -> Option<f64> {
    let raw = value.map(str::trim).filter(|v| !v.is_empty())?;
    match raw.parse::<f64>() {
        Ok(n) if (0.0..=1.0).contains(&n) => Some(n),
        _ => {
            errors.push(FieldError::new(
                field,
                format!("{field} must be a number between 0 and 1"),
            ));
            None
        }
    }
}

/// Build the store query from raw parameters. Only malformed confidence
/// bounds are rejected.
pub fn history_query(params: &HistoryParams) -> Result<SubmissionQuery, AppError> {
    let pagination = Pagination::new(
        lenient_u32(params.page.as_deref(), DEFAULT_PAGE),
        lenient_u32(params.limit.as_deref(), DEFAULT_LIMIT),
    );
    let result = params
        .result
        .as_deref()
        .and_then(ResultFilter::parse)
        .unwrap_or_default();
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut errors = Vec::new();
    let confidence_min = confidence_bound(&mut errors, "confidenceMin", params.confidence_min.as_deref());
    let confidence_max = confidence_bound(&mut errors, "confidenceMax", params.confidence_max.as_deref());
    finish(errors)?;

    Ok(SubmissionQuery {
        pagination,
        filters: SubmissionFilters {
            result,
            search,
            confidence_min,
            confidence_max,
        },
    })
}
