/// Database access layer
///
/// This module provides:
/// - `RelationalStore`: the table/row collaborator the core talks to
/// - `PgStore`: sqlx/Postgres adapter with bundled migrations
/// - `ContentRepository`: typed profile, post, tag and comment operations
pub mod content_repo;
pub mod postgres;
pub mod store;

pub use content_repo::ContentRepository;
pub use postgres::PgStore;
pub use store::{Filter, Order, RelationalStore, Row, Select, StoreError, StoreResult, Table};
