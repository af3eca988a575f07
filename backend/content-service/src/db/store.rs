/// Relational store contract
///
/// The content core talks to its database through three generic calls
/// (`select`, `insert`, `update`) over JSON rows. Typed decoding happens in
/// `ContentRepository`, not here.
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A row as returned by the store: column name -> JSON value
pub type Row = Map<String, Value>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violated
    #[error("duplicate row in {table}: {message}")]
    Conflict { table: &'static str, message: String },

    /// Foreign key, check, not-null or permission failure
    #[error("{table} rejected write: {message}")]
    Rejected { table: &'static str, message: String },

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Row returned by the store does not match the expected shape
    #[error("malformed {table} row: {message}")]
    Decode { table: &'static str, message: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Posts,
    Tags,
    PostTags,
    Comments,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Posts => "posts",
            Table::Tags => "tags",
            Table::PostTags => "post_tags",
            Table::Comments => "comments",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Profiles => &["id", "username", "bio"],
            Table::Posts => &[
                "id",
                "created_at",
                "user_id",
                "title",
                "image_link",
                "description",
                "ingredients",
                "recipe",
            ],
            Table::Tags => &["id", "name"],
            Table::PostTags => &["post_id", "tag_id"],
            Table::Comments => &["id", "created_at", "user_id", "post_id", "content"],
        }
    }

    /// Postgres type of a column, used to cast bound filter values so the
    /// comparison stays index-friendly
    pub fn column_type(&self, column: &str) -> &'static str {
        match (self, column) {
            (Table::Profiles, "id") | (_, "user_id") => "uuid",
            (_, "id" | "post_id" | "tag_id") => "bigint",
            (_, "created_at") => "timestamptz",
            _ => "text",
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Reject identifiers that are not part of the table
    pub fn check_column(&self, column: &str) -> StoreResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(StoreError::InvalidQuery(format!(
                "unknown column {}.{}",
                self.name(),
                column
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
}

impl Filter {
    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }

    /// Evaluate the filter against a row held in memory
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, expected) => same_value(actual, expected),
            Filter::In(_, candidates) => candidates.iter().any(|c| same_value(actual, c)),
        }
    }
}

/// Loose equality: numbers compare numerically, everything else by text
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => value_as_text(a) == value_as_text(b),
    }
}

/// Text form of a scalar value; Postgres casts it back to the column type
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub descending: bool,
}

impl Order {
    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }
}

/// A select request: an empty column list means every column
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    pub columns: Vec<&'static str>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Newest first, ties broken by id so equal timestamps stay stable
    pub fn newest_first(self) -> Self {
        self.order(Order::desc("created_at")).order(Order::desc("id"))
    }

    /// Check every identifier in the request against the table definition
    pub fn validate(&self) -> StoreResult<()> {
        for column in &self.columns {
            self.table.check_column(column)?;
        }
        for filter in &self.filters {
            self.table.check_column(filter.column())?;
        }
        for order in &self.order {
            self.table.check_column(order.column)?;
        }
        Ok(())
    }
}

/// Relational collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Rows matching every filter, in the requested order
    async fn select(&self, query: Select) -> StoreResult<Vec<Row>>;

    /// Insert rows in one call; returns the stored rows with generated columns
    async fn insert(&self, table: Table, rows: Vec<Row>) -> StoreResult<Vec<Row>>;

    /// Apply `patch` to every row matching `filters`; returns the updated rows
    async fn update(&self, table: Table, patch: Row, filters: Vec<Filter>)
        -> StoreResult<Vec<Row>>;
}
