// Task store queries for SurrealDB.
//
// Every lifecycle transition is a single conditional UPDATE keyed by the
// expression text and the status the caller expects. An UPDATE that matches
// no row means another caller got there first. Concurrent UPDATEs on the
// same row can also fail to commit with a retryable conflict; those are
// retried, after which the loser sees the row already moved and matches
// nothing.

use crate::db::schema::*;
use crate::operation::{OperationTimes, Operator};
use anyhow::{anyhow, Result};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use surrealdb::{engine::any::Any, RecordId, Surreal};
use tracing::debug;

/// How long a conflicting update keeps retrying before the error surfaces.
const CONFLICT_RETRY_WINDOW: Duration = Duration::from_secs(2);

fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(2))
        .with_max_interval(Duration::from_millis(50))
        .with_max_elapsed_time(Some(CONFLICT_RETRY_WINDOW))
        .build()
}

/// Whether `err` is an optimistic transaction conflict that SurrealDB
/// reports as safe to retry.
pub fn is_retryable_conflict(err: &surrealdb::Error) -> bool {
    err.to_string().contains("can be retried")
}

/// Run `op`, retrying transaction conflicts with a short backoff.
async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, surrealdb::Error>>,
{
    let value = backoff::future::retry(conflict_backoff(), || {
        let attempt = op();
        async move {
            attempt.await.map_err(|e| {
                if is_retryable_conflict(&e) {
                    debug!("Transaction conflict, retrying: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await?;

    Ok(value)
}

pub struct QueryBuilder;

impl QueryBuilder {
    /// Insert a new Queued task stamped with the current time.
    pub async fn create_task(db: &Surreal<Any>, data: &TaskCreate) -> Result<TaskRecord> {
        let mut res = db
            .query(
                r#"
                CREATE task SET
                    expression = $expression,
                    hash_id = $hash_id,
                    status = $status,
                    result = '',
                    begin_time = time::now()
                "#,
            )
            .bind(("expression", data.expression.clone()))
            .bind(("hash_id", data.hash_id.clone()))
            .bind(("status", TaskStatus::Queued))
            .await?;

        let created: Option<TaskRecord> = res.take(0)?;
        created.ok_or_else(|| anyhow!("failed to create task record"))
    }

    /// All tasks, oldest submission first.
    pub async fn list_tasks(db: &Surreal<Any>) -> Result<Vec<TaskRecord>> {
        let mut res = db
            .query("SELECT * FROM task ORDER BY begin_time ASC")
            .await?;

        let tasks: Vec<TaskRecord> = res.take(0)?;
        Ok(tasks)
    }

    /// Most recently submitted task with the given expression text.
    pub async fn find_task_by_expression(
        db: &Surreal<Any>,
        expression: &str,
    ) -> Result<Option<TaskRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM task
                WHERE expression = $expression
                ORDER BY begin_time DESC
                LIMIT 1
                "#,
            )
            .bind(("expression", expression.to_string()))
            .await?;

        let tasks: Vec<TaskRecord> = res.take(0)?;
        Ok(tasks.into_iter().next())
    }

    /// Up to `limit` Queued tasks, oldest submission first.
    pub async fn queued_tasks(db: &Surreal<Any>, limit: u32) -> Result<Vec<TaskRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM task
                WHERE status = $status
                ORDER BY begin_time ASC
                LIMIT $limit
                "#,
            )
            .bind(("status", TaskStatus::Queued))
            .bind(("limit", limit as i64))
            .await?;

        let tasks: Vec<TaskRecord> = res.take(0)?;
        Ok(tasks)
    }

    /// Move the task for `expression` from `from` to `to`.
    ///
    /// Returns the updated record, or `None` when no task with that
    /// expression is currently in `from`. Terminal targets stamp `end_time`.
    pub async fn transition_task(
        db: &Surreal<Any>,
        expression: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Option<TaskRecord>> {
        let query = if to.is_terminal() {
            r#"
            UPDATE task SET
                status = $to_status,
                end_time = time::now()
            WHERE expression = $expression AND status = $from_status
            RETURN AFTER
            "#
        } else {
            r#"
            UPDATE task SET
                status = $to_status
            WHERE expression = $expression AND status = $from_status
            RETURN AFTER
            "#
        };

        let updated = retry_on_conflict(|| async move {
            let mut res = db
                .query(query)
                .bind(("expression", expression.to_string()))
                .bind(("from_status", from))
                .bind(("to_status", to))
                .await?;
            res.take::<Vec<TaskRecord>>(0)
        })
        .await?;

        Ok(updated.into_iter().next())
    }

    /// Assigned → Done, persisting the result in the same statement.
    pub async fn complete_task(
        db: &Surreal<Any>,
        expression: &str,
        result: &str,
    ) -> Result<Option<TaskRecord>> {
        let updated = retry_on_conflict(|| async move {
            let mut res = db
                .query(
                    r#"
                    UPDATE task SET
                        status = $done,
                        result = $result,
                        end_time = time::now()
                    WHERE expression = $expression AND status = $assigned
                    RETURN AFTER
                    "#,
                )
                .bind(("expression", expression.to_string()))
                .bind(("result", result.to_string()))
                .bind(("done", TaskStatus::Done))
                .bind(("assigned", TaskStatus::Assigned))
                .await?;
            res.take::<Vec<TaskRecord>>(0)
        })
        .await?;

        Ok(updated.into_iter().next())
    }

    /// Raw rows of the operation timing table.
    pub async fn load_operation_times(db: &Surreal<Any>) -> Result<Vec<OperationTimeRecord>> {
        let mut res = db
            .query("SELECT operation, seconds FROM operation")
            .await?;

        let rows: Vec<OperationTimeRecord> = res.take(0)?;
        Ok(rows)
    }

    /// Upsert one row per operator.
    pub async fn save_operation_times(db: &Surreal<Any>, times: &OperationTimes) -> Result<()> {
        for (op, seconds) in times.iter() {
            db.query(
                r#"
                UPSERT $id SET
                    operation = $operation,
                    seconds = $seconds
                "#,
            )
            .bind(("id", operation_record_id(op)))
            .bind(("operation", op.symbol().to_string()))
            .bind(("seconds", i64::try_from(seconds).unwrap_or(i64::MAX)))
            .await?
            .check()?;
        }

        Ok(())
    }
}

fn operation_record_id(op: Operator) -> RecordId {
    let key = match op {
        Operator::Add => "add",
        Operator::Sub => "sub",
        Operator::Mul => "mul",
        Operator::Div => "div",
    };
    RecordId::from_table_key("operation", key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_connection, ensure_schema, DatabaseConfig, Db};

    async fn setup_test_db() -> Db {
        let db = create_connection(DatabaseConfig::with_url("memory"))
            .await
            .unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    fn create(expression: &str) -> TaskCreate {
        TaskCreate {
            expression: expression.to_string(),
            hash_id: "abcd1234".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let db = setup_test_db().await;
        ensure_schema(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_task_starts_queued() {
        let db = setup_test_db().await;

        let task = QueryBuilder::create_task(&db, &create("2+2")).await.unwrap();
        assert_eq!(task.expression, "2+2");
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.result.is_empty());
        assert!(task.begin_time.is_some());
        assert!(task.end_time.is_none());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let db = setup_test_db().await;
        QueryBuilder::create_task(&db, &create("1+1")).await.unwrap();

        let claimed =
            QueryBuilder::transition_task(&db, "1+1", TaskStatus::Queued, TaskStatus::Assigned)
                .await
                .unwrap();
        assert_eq!(claimed.map(|t| t.status), Some(TaskStatus::Assigned));

        // A second claim of the same task matches nothing.
        let again =
            QueryBuilder::transition_task(&db, "1+1", TaskStatus::Queued, TaskStatus::Assigned)
                .await
                .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_complete_task_requires_assigned() {
        let db = setup_test_db().await;
        QueryBuilder::create_task(&db, &create("3*3")).await.unwrap();

        let early = QueryBuilder::complete_task(&db, "3*3", "9").await.unwrap();
        assert!(early.is_none());

        QueryBuilder::transition_task(&db, "3*3", TaskStatus::Queued, TaskStatus::Assigned)
            .await
            .unwrap();
        let done = QueryBuilder::complete_task(&db, "3*3", "9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.result, "9");
        assert!(done.end_time.is_some());
    }

    #[tokio::test]
    async fn test_queued_tasks_oldest_first() {
        let db = setup_test_db().await;
        QueryBuilder::create_task(&db, &create("1+1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        QueryBuilder::create_task(&db, &create("2+2")).await.unwrap();

        let queued = QueryBuilder::queued_tasks(&db, 10).await.unwrap();
        let expressions: Vec<_> = queued.iter().map(|t| t.expression.as_str()).collect();
        assert_eq!(expressions, vec!["1+1", "2+2"]);
    }

    #[tokio::test]
    async fn test_operation_times_round_trip() {
        let db = setup_test_db().await;
        assert!(QueryBuilder::load_operation_times(&db).await.unwrap().is_empty());

        let times = OperationTimes::default().with(Operator::Div, 5);
        QueryBuilder::save_operation_times(&db, &times).await.unwrap();
        // Saving twice keeps one row per operator.
        QueryBuilder::save_operation_times(&db, &times).await.unwrap();

        let rows = QueryBuilder::load_operation_times(&db).await.unwrap();
        assert_eq!(rows.len(), 4);
        let loaded =
            OperationTimes::from_rows(rows.iter().map(|r| (r.operation.as_str(), r.seconds)));
        assert_eq!(loaded, times);
    }
}
