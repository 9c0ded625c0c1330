/// Submission store: the analysis write path and the history read paths.
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::StorageError;
use crate::guidelines::{insert_guideline, truncate_name};
use crate::model::{NewSubmission, Submission, SubmissionWithGuideline};
use crate::pagination::{Page, PaginationMeta, ResultFilter, SubmissionFilters, SubmissionQuery};

const JOINED_COLUMNS: &str = "s.id, s.action, s.guideline_id, s.result, s.confidence, \
     s.timestamp, s.created_at, g.text AS guideline";
const JOINED_FROM: &str = "FROM submissions s INNER JOIN guidelines g ON g.id = s.guideline_id";

#[derive(Clone)]
pub struct SubmissionStore {
    db: Database,
}

impl SubmissionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist an analysed submission.
    ///
    /// The guideline text is matched exactly against existing guidelines; a
    /// match reuses that row, otherwise a guideline named after the first 255
    /// characters of the text is inserted first. Lookup and inserts share one
    /// transaction.
    pub async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StorageError> {
        let submission = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM guidelines WHERE text = ?1 ORDER BY id LIMIT 1",
                        params![new.guideline],
                        |row| row.get(0),
                    )
                    .optional()?;

                let guideline_id = match existing {
                    Some(id) => {
                        debug!(guideline_id = id, "reusing guideline with identical text");
                        id
                    }
                    None => {
                        let created =
                            insert_guideline(&tx, &truncate_name(&new.guideline), &new.guideline)?;
                        info!(guideline_id = created.id, "guideline created from submission");
                        created.id
                    }
                };

                let now = Utc::now();
                let submission = tx.query_row(
                    "INSERT INTO submissions \
                         (action, guideline_id, result, confidence, timestamp, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                     RETURNING id, action, guideline_id, result, confidence, timestamp, created_at",
                    params![new.action, guideline_id, new.result, new.confidence, now],
                    submission_from_row,
                )?;

                tx.commit()?;
                Ok(submission)
            })
            .await?;

        info!(
            id = submission.id,
            guideline_id = submission.guideline_id,
            result = %submission.result,
            confidence = %submission.confidence,
            "submission created"
        );
        Ok(submission)
    }

    /// The most recently created submission, or `None` when there are none.
    pub async fn get_latest_submission(
        &self,
    ) -> Result<Option<SubmissionWithGuideline>, StorageError> {
        self.db
            .call(|conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {JOINED_COLUMNS} {JOINED_FROM} \
                             ORDER BY s.created_at DESC, s.id DESC LIMIT 1"
                        ),
                        [],
                        joined_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    /// One page of history, newest first. The same filters drive both the page
    /// and the total count so the pagination meta matches the filtered set.
    pub async fn list_submissions(
        &self,
        query: SubmissionQuery,
    ) -> Result<Page<SubmissionWithGuideline>, StorageError> {
        let pagination = query.pagination;
        let (where_sql, filter_params) = filter_clause(&query.filters);

        let (data, total_count) = self
            .db
            .call(move |conn| {
                let mut page_params = filter_params.clone();
                page_params.push(Value::Integer(i64::from(pagination.limit())));
                page_params.push(Value::Integer(pagination.offset() as i64));

                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOINED_COLUMNS} {JOINED_FROM} {where_sql} \
                     ORDER BY s.created_at DESC, s.id DESC LIMIT ? OFFSET ?"
                ))?;
                let rows = stmt.query_map(params_from_iter(page_params), joined_from_row)?;
                let data = rows.collect::<Result<Vec<_>, _>>()?;

                let total_count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) {JOINED_FROM} {where_sql}"),
                    params_from_iter(filter_params),
                    |row| row.get(0),
                )?;

                Ok((data, total_count))
            })
            .await?;

        Ok(Page {
            data,
            pagination: PaginationMeta::new(pagination, total_count.max(0) as u64),
        })
    }
}

/// Build a `WHERE` clause (possibly empty) and its positional parameters.
fn filter_clause(filters: &SubmissionFilters) -> (String, Vec<Value>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let ResultFilter::Only(label) = filters.result {
        conditions.push("s.result = ?");
        values.push(Value::Text(label.as_str().to_string()));
    }

    if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("(s.action LIKE ? ESCAPE '\\' OR g.text LIKE ? ESCAPE '\\')");
        let pattern = format!("%{}%", escape_like(search));
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    if let Some(min) = filters.confidence_min {
        conditions.push("CAST(s.confidence AS REAL) >= ?");
        values.push(Value::Real(min));
    }

    if let Some(max) = filters.confidence_max {
        conditions.push("CAST(s.confidence AS REAL) <= ?");
        values.push(Value::Real(max));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: row.get("id")?,
        action: row.get("action")?,
        guideline_id: row.get("guideline_id")?,
        result: row.get("result")?,
        confidence: row.get("confidence")?,
        timestamp: row.get("timestamp")?,
        created_at: row.get("created_at")?,
    })
}

fn joined_from_row(row: &Row<'_>) -> rusqlite::Result<SubmissionWithGuideline> {
    Ok(SubmissionWithGuideline {
        submission: submission_from_row(row)?,
        guideline: row.get("guideline")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidelines::GuidelineStore;
    use crate::model::{Confidence, Label};
    use crate::pagination::Pagination;

    struct Fixture {
        db: Database,
        guidelines: GuidelineStore,
        submissions: SubmissionStore,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        Fixture {
            guidelines: GuidelineStore::new(db.clone()),
            submissions: SubmissionStore::new(db.clone()),
            db,
        }
    }

    fn new_submission(action: &str, guideline: &str, result: Label, confidence: f64) -> NewSubmission {
        NewSubmission {
            action: action.to_string(),
            guideline: guideline.to_string(),
            result,
            confidence: Confidence::new(confidence).unwrap(),
        }
    }

    async fn total_changes(db: &Database) -> i64 {
        db.call(|conn| Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    async fn seed(store: &SubmissionStore, count: usize) {
        for i in 0..count {
            let label = Label::ALL[i % 3];
            store
                .create_submission(new_submission(
                    &format!("Action number {i}"),
                    "Shared guideline for seeding",
                    label,
                    0.5,
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn existing_guideline_text_is_reused() {
        let f = fixture();
        let text = "All closed tickets must include a confirmation email";
        let saved = f.guidelines.create_guideline("Tickets", text).await.unwrap();

        let before = total_changes(&f.db).await;
        let submission = f
            .submissions
            .create_submission(new_submission(
                "Closed ticket #48219 and sent confirmation email",
                text,
                Label::Complies,
                0.94,
            ))
            .await
            .unwrap();

        assert_eq!(submission.guideline_id, saved.id);
        assert_eq!(total_changes(&f.db).await - before, 1);
        assert_eq!(f.guidelines.list_guidelines().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn novel_guideline_text_creates_a_guideline_first() {
        let f = fixture();
        let before = total_changes(&f.db).await;
        let submission = f
            .submissions
            .create_submission(new_submission(
                "Deployed without a change ticket",
                "Every deployment needs an approved change ticket",
                Label::Deviates,
                0.81,
            ))
            .await
            .unwrap();

        assert_eq!(total_changes(&f.db).await - before, 2);
        let guidelines = f.guidelines.list_guidelines().await.unwrap();
        assert_eq!(guidelines.len(), 1);
        assert_eq!(guidelines[0].id, submission.guideline_id);
        assert_eq!(guidelines[0].name, "Every deployment needs an approved change ticket");
    }

    #[tokio::test]
    async fn auto_created_name_is_truncated_to_255_characters() {
        let f = fixture();
        let text = "g".repeat(300);
        f.submissions
            .create_submission(new_submission("Some long action", &text, Label::Unclear, 0.4))
            .await
            .unwrap();

        let guideline = &f.guidelines.list_guidelines().await.unwrap()[0];
        assert_eq!(guideline.name.chars().count(), 255);
        assert_eq!(guideline.text, text);
    }

    #[tokio::test]
    async fn confidence_is_stored_with_four_decimals() {
        let f = fixture();
        f.submissions
            .create_submission(new_submission("Action text here", "Guideline text here", Label::Complies, 0.95))
            .await
            .unwrap();

        let stored: String = f
            .db
            .call(|conn| Ok(conn.query_row("SELECT confidence FROM submissions", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(stored, "0.9500");
    }

    #[tokio::test]
    async fn latest_is_none_when_empty() {
        let f = fixture();
        assert!(f.submissions.get_latest_submission().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_is_joined_to_guideline_text() {
        let f = fixture();
        f.submissions
            .create_submission(new_submission("First action text", "First guideline", Label::Unclear, 0.3))
            .await
            .unwrap();
        let second = f
            .submissions
            .create_submission(new_submission("Second action text", "Second guideline", Label::Deviates, 0.7))
            .await
            .unwrap();

        let latest = f.submissions.get_latest_submission().await.unwrap().unwrap();
        assert_eq!(latest.submission, second);
        assert_eq!(latest.guideline, "Second guideline");
    }

    #[tokio::test]
    async fn default_listing_over_twenty_five_rows() {
        let f = fixture();
        seed(&f.submissions, 25).await;

        let page = f.submissions.list_submissions(SubmissionQuery::default()).await.unwrap();
        assert_eq!(page.data.len(), 10);
        assert_eq!(
            page.pagination,
            PaginationMeta {
                page: 1,
                limit: 10,
                total_count: 25,
                total_pages: 3,
                has_next_page: true,
                has_previous_page: false,
            }
        );
        assert_eq!(page.data[0].submission.action, "Action number 24");
    }

    #[tokio::test]
    async fn custom_page_over_twenty_five_rows() {
        let f = fixture();
        seed(&f.submissions, 25).await;

        let page = f
            .submissions
            .list_submissions(SubmissionQuery {
                pagination: Pagination::new(2, 5),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.pagination.total_pages, 5);
        assert!(page.pagination.has_next_page);
        assert!(page.pagination.has_previous_page);
        let actions: Vec<&str> = page.data.iter().map(|s| s.submission.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "Action number 19",
                "Action number 18",
                "Action number 17",
                "Action number 16",
                "Action number 15",
            ]
        );
    }

    #[tokio::test]
    async fn empty_listing_has_zero_pages() {
        let f = fixture();
        let page = f.submissions.list_submissions(SubmissionQuery::default()).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total_pages, 0);
        assert!(!page.pagination.has_next_page);
        assert!(!page.pagination.has_previous_page);
    }

    #[tokio::test]
    async fn result_filter_applies_to_rows_and_count() {
        let f = fixture();
        seed(&f.submissions, 25).await;

        let page = f
            .submissions
            .list_submissions(SubmissionQuery {
                pagination: Pagination::default(),
                filters: SubmissionFilters {
                    result: ResultFilter::Only(Label::Deviates),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        // indices 1, 4, ..., 22 are `deviates`
        assert_eq!(page.pagination.total_count, 8);
        assert_eq!(page.pagination.total_pages, 1);
        assert!(page.data.iter().all(|s| s.submission.result == Label::Deviates));
    }

    #[tokio::test]
    async fn search_matches_action_or_guideline_case_insensitively() {
        let f = fixture();
        f.submissions
            .create_submission(new_submission("Refunded order 100%", "Refunds need approval", Label::Deviates, 0.6))
            .await
            .unwrap();
        f.submissions
            .create_submission(new_submission("Closed ticket quickly", "Tickets need an EMAIL", Label::Complies, 0.9))
            .await
            .unwrap();

        let search = |term: &str| SubmissionQuery {
            filters: SubmissionFilters {
                search: Some(term.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let by_guideline = f.submissions.list_submissions(search("email")).await.unwrap();
        assert_eq!(by_guideline.pagination.total_count, 1);
        assert_eq!(by_guideline.data[0].submission.action, "Closed ticket quickly");

        let by_action = f.submissions.list_submissions(search("100%")).await.unwrap();
        assert_eq!(by_action.pagination.total_count, 1);

        let literal_percent = f.submissions.list_submissions(search("%")).await.unwrap();
        assert_eq!(literal_percent.pagination.total_count, 1);
    }

    #[tokio::test]
    async fn confidence_bounds_are_inclusive() {
        let f = fixture();
        for (i, confidence) in [0.2, 0.5, 0.8].into_iter().enumerate() {
            f.submissions
                .create_submission(new_submission(
                    &format!("Bounded action {i}"),
                    "Confidence guideline",
                    Label::Complies,
                    confidence,
                ))
                .await
                .unwrap();
        }

        let page = f
            .submissions
            .list_submissions(SubmissionQuery {
                filters: SubmissionFilters {
                    confidence_min: Some(0.5),
                    confidence_max: Some(0.8),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.total_count, 2);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
    }

    #[test]
    fn no_filters_means_no_where_clause() {
        let (sql, values) = filter_clause(&SubmissionFilters::default());
        assert!(sql.is_empty());
        assert!(values.is_empty());
    }
}
