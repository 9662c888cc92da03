// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use tokio::sync::broadcast;

use super::{
    ChangeEvent, Direction, Document, DocumentStore, Fields, FilterOp, Query, StoreError, WriteOp,
    check_precondition,
};

/// Row shape of the `documents` table.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    collection: String,
    id: String,
    data: Json<Fields>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            collection: row.collection,
            id: row.id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            data: row.data.0,
        }
    }
}

const COLUMNS: &str = "collection, id, data, version, created_at, updated_at";

/// Document store over a single JSONB table in Postgres.
///
/// Batches run inside one transaction and lock the touched rows with
/// `SELECT ... FOR UPDATE`, so preconditions are checked against the latest
/// committed version.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { pool, changes }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM documents WHERE collection = $1 AND id = $2",
            COLUMNS
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(Document::from))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM documents WHERE collection = ",
            COLUMNS
        ));
        builder.push_bind(query.collection.clone());

        for filter in &query.filters {
            builder.push(" AND data -> ");
            builder.push_bind(filter.field.clone());
            let (operator, value) = match filter.op {
                FilterOp::Eq => (" = ", filter.value.clone()),
                FilterOp::Lt => (" < ", filter.value.clone()),
                FilterOp::Lte => (" <= ", filter.value.clone()),
                FilterOp::Gt => (" > ", filter.value.clone()),
                FilterOp::Gte => (" >= ", filter.value.clone()),
                FilterOp::ArrayContains => (" @> ", Value::Array(vec![filter.value.clone()])),
            };
            builder.push(operator);
            builder.push_bind(Json(value));
            // jsonb ordering compares across types; keep range filters within one type.
            if !matches!(filter.op, FilterOp::Eq | FilterOp::ArrayContains) {
                builder.push(" AND jsonb_typeof(data -> ");
                builder.push_bind(filter.field.clone());
                builder.push(") = ");
                builder.push_bind(json_type(&filter.value));
            }
        }

        builder.push(" ORDER BY ");
        if let Some((field, direction)) = &query.order_by {
            builder.push("data -> ");
            builder.push_bind(field.clone());
            builder.push(match direction {
                Direction::Asc => " ASC NULLS LAST, ",
                Direction::Desc => " DESC NULLS LAST, ",
            });
        }
        builder.push("created_at, id");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows: Vec<DocumentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<Document>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut written = Vec::new();
        let mut events = Vec::new();

        for op in ops {
            let key = op.key().clone();
            let current: Option<(i64,)> = sqlx::query_as(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(&key.collection)
            .bind(&key.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            let current = current.map(|(v,)| v);

            match op {
                WriteOp::Set {
                    data,
                    merge,
                    precondition,
                    ..
                } => {
                    check_precondition(&key, current, precondition)?;
                    let sql = match (current.is_some(), merge) {
                        (false, _) => format!(
                            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) RETURNING {}",
                            COLUMNS
                        ),
                        (true, true) => format!(
                            "UPDATE documents SET data = data || $3, version = version + 1, updated_at = NOW() \
                             WHERE collection = $1 AND id = $2 RETURNING {}",
                            COLUMNS
                        ),
                        (true, false) => format!(
                            "UPDATE documents SET data = $3, version = version + 1, updated_at = NOW() \
                             WHERE collection = $1 AND id = $2 RETURNING {}",
                            COLUMNS
                        ),
                    };
                    let row: DocumentRow = sqlx::query_as(&sql)
                        .bind(&key.collection)
                        .bind(&key.id)
                        .bind(Json(data))
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| match e {
                            // A concurrent insert of the same id won the race.
                            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                                StoreError::AlreadyExists {
                                    collection: key.collection.clone(),
                                    id: key.id.clone(),
                                }
                            }
                            other => map_sqlx(other),
                        })?;
                    written.push(Document::from(row));
                }
                WriteOp::Delete { precondition, .. } => {
                    check_precondition(&key, current, precondition)?;
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(&key.collection)
                        .bind(&key.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                }
            }
            events.push(ChangeEvent {
                collection: key.collection,
                id: key.id,
            });
        }

        tx.commit().await.map_err(map_sqlx)?;

        for event in events {
            let _ = self.changes.send(event);
        }
        Ok(written)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
