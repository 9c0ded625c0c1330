/// Picks one result out of several guideline classifications of the same action.
use crate::classifier::ClassificationResult;
use crate::error::EmptyInputError;
use crate::model::Label;

/// A guideline paired with the classifier's verdict for one action.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidelineAnalysis {
    pub guideline_id: i64,
    pub guideline_name: String,
    pub guideline_text: String,
    pub analysis: ClassificationResult,
}

/// Precedence of a raw classifier label. Labels outside the known set weigh 0.
pub fn label_priority(label: &str) -> u8 {
    label.parse::<Label>().map(Label::priority).unwrap_or(0)
}

/// Reduce left to right, keeping the current best unless a candidate has a
/// strictly higher label priority, or the same priority and a strictly
/// higher score. Full ties keep the earliest entry.
pub fn resolve(results: Vec<GuidelineAnalysis>) -> Result<GuidelineAnalysis, EmptyInputError> {
    let mut iter = results.into_iter();
    let first = iter.next().ok_or(EmptyInputError)?;

    Ok(iter.fold(first, |best, candidate| {
        let best_priority = label_priority(&best.analysis.label);
        let candidate_priority = label_priority(&candidate.analysis.label);
        let wins = candidate_priority > best_priority
            || (candidate_priority == best_priority
                && candidate.analysis.score > best.analysis.score);
        if wins {
            candidate
        } else {
            best
        }
    }))
}
