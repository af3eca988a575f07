//! In-memory collaborators for integration tests
//!
//! - `MemoryStore`: relational store with generated ids/timestamps, unique and
//!   foreign-key checks, per-table failure injection and a call log
//! - `MemoryObjectStore`: object store keeping uploads in a map
//! - `MemoryIdentityProvider`: identity provider that creates the profile row on
//!   sign-up, the way the database trigger does in a real deployment
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use sizzle_content::auth::{
    AuthEvent, IdentityError, IdentityProvider, Session, SignUpMetadata, SignUpOutcome,
};
use sizzle_content::db::{Filter, Order, RelationalStore, Row, Select, StoreError, StoreResult, Table};
use sizzle_content::media::{ObjectStore, ObjectStoreError};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const SEED_TAGS: [&str; 10] = [
    "Vegan",
    "Vegetarian",
    "Dairy Free",
    "Gluten Free",
    "Nut Free",
    "Halal",
    "Kosher",
    "Low Sugar",
    "Low Sodium",
    "Keto",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<Table, Vec<Row>>,
    next_id: HashMap<Table, i64>,
    ticks: i64,
}

impl Tables {
    fn rows(&self, table: Table) -> &[Row] {
        self.rows.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn exists(&self, table: Table, column: &str, value: &Value) -> bool {
        let filter = Filter::Eq(static_column(table, column), value.clone());
        self.rows(table).iter().any(|row| filter.matches(row))
    }

    fn next_id(&mut self, table: Table) -> i64 {
        let id = self.next_id.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    /// Strictly increasing timestamps, one second apart
    fn now(&mut self) -> String {
        self.ticks += 1;
        Utc.timestamp_opt(1_714_000_000 + self.ticks, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }
}

fn static_column(table: Table, column: &str) -> &'static str {
    table
        .columns()
        .iter()
        .copied()
        .find(|c| *c == column)
        .unwrap_or("id")
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn order_rows(rows: &mut [Row], order: &[Order]) {
    rows.sort_by(|a, b| {
        for o in order {
            let av = a.get(o.column).unwrap_or(&Value::Null);
            let bv = b.get(o.column).unwrap_or(&Value::Null);
            let ord = compare(av, bv);
            let ord = if o.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn rejected(table: Table, message: &str) -> StoreError {
    StoreError::Rejected {
        table: table.name(),
        message: message.to_string(),
    }
}

fn conflict(table: Table, message: &str) -> StoreError {
    StoreError::Conflict {
        table: table.name(),
        message: message.to_string(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<(Op, Table)>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(Op, Table)>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store seeded with the standard tag list
    pub fn seeded() -> Arc<Self> {
        let store = Self::new();
        {
            let mut tables = store.tables.lock().unwrap();
            for name in SEED_TAGS {
                let id = tables.next_id(Table::Tags);
                tables
                    .rows
                    .entry(Table::Tags)
                    .or_default()
                    .push(row(json!({"id": id, "name": name})));
            }
        }
        store
    }

    pub fn add_profile(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.put_profile(id, username)
            .unwrap_or_else(|e| panic!("seeding profile {username}: {e}"));
        id
    }

    fn put_profile(&self, id: Uuid, username: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.exists(Table::Profiles, "username", &json!(username)) {
            return Err(conflict(Table::Profiles, "profiles_username_key"));
        }
        tables
            .rows
            .entry(Table::Profiles)
            .or_default()
            .push(row(json!({"id": id, "username": username, "bio": null})));
        Ok(())
    }

    pub fn tag_id(&self, name: &str) -> i64 {
        let tables = self.tables.lock().unwrap();
        tables
            .rows(Table::Tags)
            .iter()
            .find(|r| r.get("name") == Some(&json!(name)))
            .and_then(|r| r.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or_else(|| panic!("unknown tag {name}"))
    }

    pub fn count(&self, table: Table) -> usize {
        self.tables.lock().unwrap().rows(table).len()
    }

    /// Make every `op` against `table` fail with a rejection
    pub fn fail(&self, op: Op, table: Table) {
        self.failing.lock().unwrap().insert((op, table));
    }

    /// Make every call fail as if the store were unreachable
    pub fn go_offline(&self) {
        self.offline.store(true, AtomicOrdering::SeqCst);
    }

    pub fn calls(&self, op: Op, table: Table) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == (op, table))
            .count()
    }

    fn enter(&self, op: Op, table: Table) -> StoreResult<()> {
        self.calls.lock().unwrap().push((op, table));
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        if self.failing.lock().unwrap().contains(&(op, table)) {
            return Err(rejected(table, "permission denied for table"));
        }
        Ok(())
    }

    /// Check constraints and fill generated columns for one new row
    fn prepare(tables: &mut Tables, table: Table, mut new: Row, batch: &[Row]) -> StoreResult<Row> {
        for column in new.keys() {
            table.check_column(column)?;
        }
        match table {
            Table::Profiles => {
                let username = new.get("username").cloned().unwrap_or(Value::Null);
                if username.is_null() {
                    return Err(rejected(table, "null value in column \"username\""));
                }
                if tables.exists(table, "username", &username) {
                    return Err(conflict(table, "profiles_username_key"));
                }
            }
            Table::Tags => {
                let name = new.get("name").cloned().unwrap_or(Value::Null);
                if tables.exists(table, "name", &name) {
                    return Err(conflict(table, "tags_name_key"));
                }
            }
            Table::Posts => {
                let user = new.get("user_id").cloned().unwrap_or(Value::Null);
                if !tables.exists(Table::Profiles, "id", &user) {
                    return Err(rejected(table, "violates foreign key constraint \"posts_user_id_fkey\""));
                }
            }
            Table::PostTags => {
                let post = new.get("post_id").cloned().unwrap_or(Value::Null);
                let tag = new.get("tag_id").cloned().unwrap_or(Value::Null);
                if !tables.exists(Table::Posts, "id", &post) || !tables.exists(Table::Tags, "id", &tag) {
                    return Err(rejected(table, "violates foreign key constraint \"post_tags_fkey\""));
                }
                let key = Filter::Eq("post_id", post.clone());
                let duplicate = tables
                    .rows(table)
                    .iter()
                    .chain(batch.iter())
                    .any(|r| key.matches(r) && Filter::Eq("tag_id", tag.clone()).matches(r));
                if duplicate {
                    return Err(conflict(table, "post_tags_pkey"));
                }
            }
            Table::Comments => {
                let post = new.get("post_id").cloned().unwrap_or(Value::Null);
                let user = new.get("user_id").cloned().unwrap_or(Value::Null);
                if !tables.exists(Table::Posts, "id", &post) {
                    return Err(rejected(table, "violates foreign key constraint \"comments_post_id_fkey\""));
                }
                if !tables.exists(Table::Profiles, "id", &user) {
                    return Err(rejected(table, "violates foreign key constraint \"comments_user_id_fkey\""));
                }
            }
        }

        if matches!(table, Table::Posts | Table::Tags | Table::Comments) && !new.contains_key("id") {
            let id = tables.next_id(table);
            new.insert("id".into(), json!(id));
        }
        if table.has_column("created_at") && !new.contains_key("created_at") {
            let now = tables.now();
            new.insert("created_at".into(), json!(now));
        }
        Ok(new)
    }
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn select(&self, query: Select) -> StoreResult<Vec<Row>> {
        self.enter(Op::Select, query.table)?;
        query.validate()?;

        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Row> = tables
            .rows(query.table)
            .iter()
            .filter(|r| query.filters.iter().all(|f| f.matches(r)))
            .cloned()
            .collect();
        order_rows(&mut rows, &query.order);

        if !query.columns.is_empty() {
            for r in rows.iter_mut() {
                r.retain(|k, _| query.columns.iter().any(|c| *c == k.as_str()));
            }
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> StoreResult<Vec<Row>> {
        self.enter(Op::Insert, table)?;

        let mut tables = self.tables.lock().unwrap();
        let mut prepared = Vec::with_capacity(rows.len());
        for new in rows {
            let stored = Self::prepare(&mut tables, table, new, &prepared)?;
            prepared.push(stored);
        }
        tables
            .rows
            .entry(table)
            .or_default()
            .extend(prepared.iter().cloned());
        Ok(prepared)
    }

    async fn update(&self, table: Table, patch: Row, filters: Vec<Filter>) -> StoreResult<Vec<Row>> {
        self.enter(Op::Update, table)?;
        for column in patch.keys() {
            table.check_column(column)?;
        }

        let mut tables = self.tables.lock().unwrap();
        let mut updated = Vec::new();
        if let Some(rows) = tables.rows.get_mut(&table) {
            for r in rows.iter_mut().filter(|r| filters.iter().all(|f| f.matches(r))) {
                for (k, v) in &patch {
                    r.insert(k.clone(), v.clone());
                }
                updated.push(r.clone());
            }
        }
        Ok(updated)
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    rejecting: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_uploads(&self) {
        self.rejecting.store(true, AtomicOrdering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{bucket}/{path}"))
            .map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        if self.rejecting.load(AtomicOrdering::SeqCst) {
            return Err(ObjectStoreError::Rejected("The resource already exists".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{path}"), (bytes, content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://media.test/storage/v1/object/public/{bucket}/{path}")
    }
}

struct Account {
    id: Uuid,
    password: String,
}

pub struct MemoryIdentityProvider {
    profiles: Arc<MemoryStore>,
    accounts: Mutex<HashMap<String, Account>>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    sign_up_calls: AtomicUsize,
}

impl MemoryIdentityProvider {
    pub fn new(profiles: Arc<MemoryStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            profiles,
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            events,
            sign_up_calls: AtomicUsize::new(0),
        })
    }

    pub fn sign_up_calls(&self) -> usize {
        self.sign_up_calls.load(AtomicOrdering::SeqCst)
    }

    /// Simulate the provider expiring the session on its own
    pub fn expire_session(&self) {
        self.session.lock().unwrap().take();
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    fn open_session(&self, id: Uuid, email: &str) -> Session {
        let session = Session {
            user_id: id,
            email: Some(email.to_string()),
            access_token: format!("token-{id}"),
            refresh_token: None,
            expires_at: None,
        };
        *self.session.lock().unwrap() = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        session
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let id = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(email) {
                Some(account) if account.password == password => account.id,
                _ => {
                    return Err(IdentityError::InvalidCredentials(
                        "Invalid login credentials".into(),
                    ))
                }
            }
        };
        Ok(self.open_session(id, email))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, IdentityError> {
        self.sign_up_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let id = Uuid::new_v4();
        {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(email) {
                return Err(IdentityError::Rejected("User already registered".into()));
            }
            // profile trigger; a duplicate username aborts the identity too
            self.profiles
                .put_profile(id, &metadata.username)
                .map_err(|e| IdentityError::Rejected(format!("Database error saving new user: {e}")))?;
            accounts.insert(
                email.to_string(),
                Account {
                    id,
                    password: password.to_string(),
                },
            );
        }
        Ok(SignUpOutcome::SignedIn(self.open_session(id, email)))
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let previous = self.session.lock().unwrap().take();
        match previous {
            Some(_) => {
                let _ = self.events.send(AuthEvent::SignedOut);
                Ok(())
            }
            None => Err(IdentityError::NoSession),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
