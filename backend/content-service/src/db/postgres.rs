/// Postgres adapter for the relational store contract
///
/// Queries are assembled with `QueryBuilder`. Table and column identifiers
/// only ever come from `Table::columns()`; every value is a bound parameter.
/// Rows travel as `jsonb` so the adapter never needs per-table row types.
use super::store::{value_as_text, Filter, RelationalStore, Row, Select, StoreError, StoreResult, Table};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool using the database section of the config
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(max_connections = config.max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations (tables + seed tags)
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::InvalidQuery(format!("migration failed: {e}")))
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, table: Table, filters: &[Filter]) {
    for (i, filter) in filters.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq(column, Value::Null) => {
                qb.push(format!("t.\"{column}\" IS NULL"));
            }
            Filter::Eq(column, value) => {
                qb.push(format!("t.\"{column}\" = "));
                qb.push_bind(value_as_text(value));
                qb.push(format!("::{}", table.column_type(column)));
            }
            Filter::In(column, values) => {
                let values: Vec<String> = values.iter().map(value_as_text).collect();
                qb.push(format!("t.\"{column}\" = ANY("));
                qb.push_bind(values);
                qb.push(format!("::{}[])", table.column_type(column)));
            }
        }
    }
}

fn into_rows(table: Table, values: Vec<Json<Value>>) -> StoreResult<Vec<Row>> {
    values
        .into_iter()
        .map(|Json(value)| match value {
            Value::Object(row) => Ok(row),
            other => Err(StoreError::Decode {
                table: table.name(),
                message: format!("expected object, got {other}"),
            }),
        })
        .collect()
}

/// Column list shared by every row of an insert
fn insert_columns(table: Table, rows: &[Row]) -> StoreResult<Vec<String>> {
    let mut columns: Vec<String> = rows[0].keys().cloned().collect();
    columns.sort();
    for column in &columns {
        table.check_column(column)?;
    }
    for row in &rows[1..] {
        if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
            return Err(StoreError::InvalidQuery(format!(
                "rows for {} do not share one column set",
                table.name()
            )));
        }
    }
    Ok(columns)
}

fn map_sqlx_error(table: Table, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict {
                    table: table.name(),
                    message,
                },
                // integrity constraint class, insufficient_privilege
                Some(code) if code.starts_with("23") || code == "42501" => StoreError::Rejected {
                    table: table.name(),
                    message,
                },
                _ => StoreError::InvalidQuery(message),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Decode {
            table: table.name(),
            message: err.to_string(),
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn select(&self, query: Select) -> StoreResult<Vec<Row>> {
        query.validate()?;
        let table = query.table;
        let columns: &[&str] = if query.columns.is_empty() {
            table.columns()
        } else {
            &query.columns
        };

        let mut qb = QueryBuilder::<Postgres>::new("SELECT jsonb_build_object(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("'{column}', t.\"{column}\""));
        }
        qb.push(format!(") FROM {} AS t", table.name()));
        push_filters(&mut qb, table, &query.filters);
        for (i, order) in query.order.iter().enumerate() {
            qb.push(if i == 0 { " ORDER BY " } else { ", " });
            qb.push(format!(
                "t.\"{}\" {}",
                order.column,
                if order.descending { "DESC" } else { "ASC" }
            ));
        }

        tracing::debug!(table = table.name(), sql = qb.sql(), "select");
        let values = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(table, e))?;

        into_rows(table, values)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> StoreResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let columns = insert_columns(table, &rows)?;
        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let column_list = quoted.join(", ");
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {name} AS t ({column_list}) SELECT {column_list} \
             FROM jsonb_populate_recordset(NULL::{name}, ",
            name = table.name(),
        ));
        qb.push_bind(Json(payload));
        qb.push(") RETURNING to_jsonb(t)");

        tracing::debug!(table = table.name(), sql = qb.sql(), "insert");
        let values = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(table, e))?;

        into_rows(table, values)
    }

    async fn update(
        &self,
        table: Table,
        patch: Row,
        filters: Vec<Filter>,
    ) -> StoreResult<Vec<Row>> {
        if patch.is_empty() {
            return Err(StoreError::InvalidQuery("empty update patch".to_string()));
        }
        if filters.is_empty() {
            return Err(StoreError::InvalidQuery(format!(
                "refusing unfiltered update of {}",
                table.name()
            )));
        }
        for column in patch.keys() {
            table.check_column(column)?;
        }
        for filter in &filters {
            table.check_column(filter.column())?;
        }

        let assignments: Vec<String> = patch
            .keys()
            .map(|c| format!("\"{c}\" = r.\"{c}\""))
            .collect();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {name} AS t SET {} FROM jsonb_populate_record(NULL::{name}, ",
            assignments.join(", "),
            name = table.name(),
        ));
        qb.push_bind(Json(Value::Object(patch)));
        qb.push(") AS r");
        push_filters(&mut qb, table, &filters);
        qb.push(" RETURNING to_jsonb(t)");

        tracing::debug!(table = table.name(), sql = qb.sql(), "update");
        let values = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(table, e))?;

        into_rows(table, values)
    }
}
