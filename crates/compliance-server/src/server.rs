use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use compliance_common::classifier::{ClassificationResult, ZeroShotClient};
use compliance_common::error::EmptyInputError;
use compliance_common::guidelines::GuidelineStore;
use compliance_common::model::{Guideline, NewSubmission, SubmissionWithGuideline};
use compliance_common::pagination::{Page, PaginationMeta};
use compliance_common::priority::{self, GuidelineAnalysis};
use compliance_common::submissions::SubmissionStore;

use crate::error::AppError;
use crate::rate_limit::ClassifierBudget;
use crate::validation::{self, HistoryParams};

#[derive(Clone)]
pub struct AppState {
    guidelines: GuidelineStore,
    submissions: SubmissionStore,
    classifier: Arc<ZeroShotClient>,
    budget: Option<ClassifierBudget>,
}

impl AppState {
    pub fn new(
        guidelines: GuidelineStore,
        submissions: SubmissionStore,
        classifier: Arc<ZeroShotClient>,
        budget: Option<ClassifierBudget>,
    ) -> Self {
        Self {
            guidelines,
            submissions,
            classifier,
            budget,
        }
    }

    /// Reserve `calls` classifier requests before the first one is sent.
    fn gate(&self, calls: u32) -> Result<(), AppError> {
        if let Some(budget) = &self.budget {
            budget.reserve(calls)?;
        }
        Ok(())
    }

    /// Persist a classified pair and return it joined to its guideline text.
    async fn record(
        &self,
        action: String,
        guideline: String,
        analysis: &ClassificationResult,
    ) -> Result<SubmissionWithGuideline, AppError> {
        let (result, confidence) = analysis.outcome()?;
        let submission = self
            .submissions
            .create_submission(NewSubmission {
                action,
                guideline: guideline.clone(),
                result,
                confidence,
            })
            .await?;
        Ok(SubmissionWithGuideline {
            submission,
            guideline,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/analyze", post(analyze))
        .route("/api/classify", post(classify))
        .route("/api/guidelines", get(list_guidelines).post(create_guideline))
        .route("/api/guidelines/{id}", delete(delete_guideline))
        .route("/api/submissions", get(list_submissions))
        .route("/api/submissions/latest", get(latest_submission))
        .route("/api/dashboard", get(dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    guideline: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    guideline_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateGuidelineRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardResponse {
    submissions: Vec<SubmissionWithGuideline>,
    pagination: PaginationMeta,
    latest_submission: Option<SubmissionWithGuideline>,
    guidelines: Vec<Guideline>,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<SubmissionWithGuideline>, AppError> {
    let Json(req) = payload?;
    validation::analyze_request(&req.action, &req.guideline)?;

    state.gate(1)?;
    let analysis = state.classifier.classify(&req.action, &req.guideline).await?;
    let recorded = state.record(req.action, req.guideline, &analysis).await?;
    Ok(Json(recorded))
}

/// Classify one action against several saved guidelines and keep the
/// highest-priority verdict.
async fn classify(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<Json<SubmissionWithGuideline>, AppError> {
    let Json(req) = payload?;
    validation::classify_request(&req.action, &req.guideline_ids)?;

    let guidelines = state.guidelines.list_guidelines_by_ids(&req.guideline_ids).await?;
    if guidelines.is_empty() {
        return Err(EmptyInputError.into());
    }
    debug!(
        requested = req.guideline_ids.len(),
        found = guidelines.len(),
        "classifying against saved guidelines"
    );
    state.gate(u32::try_from(guidelines.len()).unwrap_or(u32::MAX))?;

    let state_ref = &state;
    let action = req.action.as_str();
    let analyses = try_join_all(guidelines.into_iter().map(move |g| async move {
        let analysis = state_ref.classifier.classify(action, &g.text).await?;
        Ok::<_, AppError>(GuidelineAnalysis {
            guideline_id: g.id,
            guideline_name: g.name,
            guideline_text: g.text,
            analysis,
        })
    }))
    .await?;

    let winner = priority::resolve(analyses)?;
    info!(
        guideline_id = winner.guideline_id,
        label = %winner.analysis.label,
        score = winner.analysis.score,
        "selected winning guideline"
    );

    let recorded = state
        .record(req.action, winner.guideline_text, &winner.analysis)
        .await?;
    Ok(Json(recorded))
}

async fn list_guidelines(State(state): State<AppState>) -> Result<Json<Vec<Guideline>>, AppError> {
    Ok(Json(state.guidelines.list_guidelines().await?))
}

async fn create_guideline(
    State(state): State<AppState>,
    payload: Result<Json<CreateGuidelineRequest>, JsonRejection>,
) -> Result<Json<Guideline>, AppError> {
    let Json(req) = payload?;
    validation::new_guideline(&req.name, &req.text)?;
    Ok(Json(state.guidelines.create_guideline(&req.name, &req.text).await?))
}

async fn delete_guideline(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeleteResponse>, AppError> {
    let Path(id) = id?;
    state.guidelines.delete_guideline(id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

async fn list_submissions(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Page<SubmissionWithGuideline>>, AppError> {
    let query = validation::history_query(&params)?;
    Ok(Json(state.submissions.list_submissions(query).await?))
}

async fn latest_submission(
    State(state): State<AppState>,
) -> Result<Json<Option<SubmissionWithGuideline>>, AppError> {
    Ok(Json(state.submissions.get_latest_submission().await?))
}

async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<DashboardResponse>, AppError> {
    let query = validation::history_query(&params)?;
    let (page, latest_submission, guidelines) = tokio::try_join!(
        state.submissions.list_submissions(query),
        state.submissions.get_latest_submission(),
        state.guidelines.list_guidelines(),
    )?;
    Ok(Json(DashboardResponse {
        submissions: page.data,
        pagination: page.pagination,
        latest_submission,
        guidelines,
    }))
}
