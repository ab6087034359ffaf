//! Storage abstraction for Scriptorium.
//!
//! The [`Backend`] trait is the whole capability set the catalog needs from
//! the hosted store: filtered range selects with an exact match count,
//! single-row inserts and updates, and predicate deletes. Records travel as
//! JSON objects ([`Row`]) so that every backend (in-memory, SQLite, the
//! hosted REST service) shares one wire shape and the access modules own
//! the typed view.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::BackendError;

/// A stored record: one JSON object per row.
pub type Row = serde_json::Map<String, Value>;

/// The four logical tables of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Manuscripts,
    BlogPosts,
    Comments,
    GuestbookEntries,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Manuscripts,
        Table::BlogPosts,
        Table::Comments,
        Table::GuestbookEntries,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Manuscripts => "manuscripts",
            Table::BlogPosts => "blog_posts",
            Table::Comments => "comments",
            Table::GuestbookEntries => "guestbook_entries",
        }
    }

    /// Column holding the creation timestamp, stamped by the backend on insert.
    pub fn timestamp_column(self) -> &'static str {
        match self {
            Table::Manuscripts => "created_at",
            Table::BlogPosts | Table::Comments | Table::GuestbookEntries => "date",
        }
    }

    /// Whether rows carry an `updated_at` column refreshed on every write.
    pub fn tracks_updates(self) -> bool {
        matches!(self, Table::Manuscripts)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality predicate on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: Value,
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

/// Case-insensitive substring match, OR-ed across `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub columns: Vec<String>,
    pub needle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// A select request against one table.
///
/// Predicates and the search are applied before both the range and the
/// count, so `Selection::total` always describes the same filtered set the
/// returned rows were cut from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub predicates: Vec<Predicate>,
    pub search: Option<Search>,
    pub order: Vec<Order>,
    /// Zero-based half-open row range. `None` selects every matching row.
    pub range: Option<Range<u64>>,
    /// Ask the backend for the exact number of matching rows.
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::eq(column, value));
        self
    }

    /// Adds a substring search. Blank needles leave the query unfiltered.
    pub fn search(mut self, columns: &[&str], needle: &str) -> Self {
        let needle = needle.trim();
        if !needle.is_empty() && !columns.is_empty() {
            self.search = Some(Search {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                needle: needle.to_string(),
            });
        }
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            descending,
        });
        self
    }

    /// Newest first by the table's timestamp, ties broken by id.
    pub fn newest_first(self, table: Table) -> Self {
        self.order_by(table.timestamp_column(), true)
            .order_by("id", true)
    }

    /// Oldest first by the table's timestamp, ties broken by id.
    pub fn oldest_first(self, table: Table) -> Self {
        self.order_by(table.timestamp_column(), false)
            .order_by("id", false)
    }

    pub fn range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn exact_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Count-only query: no rows come back, only the total.
    pub fn count_only(self) -> Self {
        self.range(0..0).exact_count()
    }

    /// Every column name this query mentions.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.predicates
            .iter()
            .map(|p| p.column.as_str())
            .chain(
                self.search
                    .iter()
                    .flat_map(|s| s.columns.iter().map(String::as_str)),
            )
            .chain(self.order.iter().map(|o| o.column.as_str()))
    }

    /// Evaluates predicates and search against a row, the way a backend
    /// without a query engine (see [`memory`]) filters.
    pub fn matches(&self, row: &Row) -> bool {
        predicates_match(&self.predicates, row)
            && self.search.as_ref().map_or(true, |s| search_matches(s, row))
    }
}

/// True when every predicate holds for `row`.
pub fn predicates_match(predicates: &[Predicate], row: &Row) -> bool {
    predicates
        .iter()
        .all(|p| row.get(&p.column).unwrap_or(&Value::Null) == &p.value)
}

fn search_matches(search: &Search, row: &Row) -> bool {
    let needle = search.needle.to_lowercase();
    search.columns.iter().any(|column| match row.get(column) {
        Some(Value::String(s)) => s.to_lowercase().contains(&needle),
        Some(Value::Null) | None => false,
        Some(other) => other.to_string().to_lowercase().contains(&needle),
    })
}

/// Column names must be plain identifiers; they end up in SQL and URLs.
pub fn is_column_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rejects queries naming anything other than plain identifiers.
pub fn check_columns(query: &Query) -> Result<(), BackendError> {
    match query.columns().find(|c| !is_column_name(c)) {
        Some(bad) => Err(BackendError::Schema(format!("invalid column name: {bad:?}"))),
        None => Ok(()),
    }
}

/// Result of a [`Backend::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub rows: Vec<Row>,
    /// Exact number of matching rows when the query asked for a count.
    pub total: Option<u64>,
}

/// Abstract storage backend for Scriptorium.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`select`](Backend::select) | Filtered, ordered range select with optional exact count |
/// | [`insert`](Backend::insert) | Insert one row, returning it with `id` and timestamps |
/// | [`update`](Backend::update) | Merge a patch into the row with the given id |
/// | [`delete`](Backend::delete) | Delete every row matching the predicates |
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Selection, BackendError>;

    /// Inserts a row. Implementations assign `id` and stamp timestamps via
    /// [`prepare_insert`] (or let the hosted store do the same).
    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError>;

    /// Merges `patch` into the row with the given id. `Ok(None)` when no row matched.
    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Option<Row>, BackendError>;

    /// Deletes matching rows and returns how many were removed.
    async fn delete(&self, table: Table, predicates: &[Predicate]) -> Result<u64, BackendError>;
}

/// Fetches a single row by id.
pub async fn fetch_by_id(
    backend: &dyn Backend,
    table: Table,
    id: &str,
) -> Result<Option<Row>, BackendError> {
    let selection = backend
        .select(table, &Query::new().eq("id", id).range(0..1))
        .await?;
    Ok(selection.rows.into_iter().next())
}

/// Exact number of rows matching `query`, without fetching any.
pub async fn count_rows(
    backend: &dyn Backend,
    table: Table,
    query: Query,
) -> Result<u64, BackendError> {
    let selection = backend.select(table, &query.count_only()).await?;
    selection
        .total
        .ok_or_else(|| BackendError::Schema(format!("{table}: backend returned no row count")))
}

/// Fixed-width UTC timestamp (microsecond precision) so that lexical and
/// chronological order agree in every backend.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn normalize_timestamp(value: &Value) -> Result<String, BackendError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BackendError::Schema(format!("timestamp must be a string, got {value}")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| format_timestamp(dt.with_timezone(&Utc)))
        .map_err(|e| BackendError::Schema(format!("invalid timestamp {raw:?}: {e}")))
}

/// Assigns `id` and stamps the timestamp columns of a row about to be inserted.
///
/// Caller-supplied timestamps are kept but rewritten into the fixed-width format.
pub fn prepare_insert(table: Table, mut row: Row, now: DateTime<Utc>) -> Result<Row, BackendError> {
    match row.get("id") {
        None | Some(Value::Null) => {
            row.insert(
                "id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        Some(Value::String(id)) if !id.is_empty() => {}
        Some(other) => {
            return Err(BackendError::Schema(format!("id must be a string, got {other}")));
        }
    }

    let stamp = format_timestamp(now);
    let ts_column = table.timestamp_column();
    let created = match row.get(ts_column) {
        None | Some(Value::Null) => stamp.clone(),
        Some(v) => normalize_timestamp(v)?,
    };
    row.insert(ts_column.to_string(), Value::String(created));
    if table.tracks_updates() {
        row.insert("updated_at".to_string(), Value::String(stamp));
    }
    Ok(row)
}

/// Merges `patch` into `existing`. The id is immutable; `updated_at` is refreshed.
pub fn apply_patch(
    table: Table,
    existing: &mut Row,
    patch: Row,
    now: DateTime<Utc>,
) -> Result<(), BackendError> {
    for (key, value) in prepare_patch(table, patch, now)? {
        existing.insert(key, value);
    }
    Ok(())
}

/// The columns an update writes: `id` dropped, the timestamp column in
/// fixed-width form, and `updated_at` stamped where the table tracks it.
pub fn prepare_patch(table: Table, mut patch: Row, now: DateTime<Utc>) -> Result<Row, BackendError> {
    patch.remove("id");
    if let Some(v) = patch.get(table.timestamp_column()) {
        let normalized = normalize_timestamp(v)?;
        patch.insert(
            table.timestamp_column().to_string(),
            Value::String(normalized),
        );
    }
    if table.tracks_updates() {
        patch.insert(
            "updated_at".to_string(),
            Value::String(format_timestamp(now)),
        );
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 7, 20, 10, 0, 0).unwrap();
        assert_eq!(format_timestamp(a), "2024-07-20T10:00:00.000000Z");
    }

    #[test]
    fn prepare_insert_assigns_id_and_stamps() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let out = prepare_insert(Table::Manuscripts, row(json!({"judul": "A"})), now).unwrap();
        assert!(out["id"].as_str().unwrap().len() >= 32);
        assert_eq!(out["created_at"], json!("2024-01-02T03:04:05.000000Z"));
        assert_eq!(out["updated_at"], json!("2024-01-02T03:04:05.000000Z"));
    }

    #[test]
    fn prepare_insert_rewrites_supplied_timestamp() {
        let now = Utc::now();
        let out = prepare_insert(
            Table::GuestbookEntries,
            row(json!({"id": "gb-1", "date": "2024-01-01T07:00:00+07:00"})),
            now,
        )
        .unwrap();
        assert_eq!(out["id"], json!("gb-1"));
        assert_eq!(out["date"], json!("2024-01-01T00:00:00.000000Z"));
        assert!(out.get("updated_at").is_none());
    }

    #[test]
    fn prepare_insert_rejects_garbage_timestamp() {
        let err = prepare_insert(Table::Comments, row(json!({"date": "yesterday"})), Utc::now())
            .unwrap_err();
        assert!(matches!(err, BackendError::Schema(_)));
    }

    #[test]
    fn patch_keeps_id() {
        let now = Utc::now();
        let mut existing = row(json!({"id": "m1", "judul": "Old"}));
        apply_patch(
            Table::Manuscripts,
            &mut existing,
            row(json!({"id": "hijack", "judul": "New"})),
            now,
        )
        .unwrap();
        assert_eq!(existing["id"], json!("m1"));
        assert_eq!(existing["judul"], json!("New"));
        assert!(existing.contains_key("updated_at"));
    }

    #[test]
    fn query_matching_combines_predicates_and_search() {
        let q = Query::new()
            .eq("isApproved", true)
            .search(&["name", "message"], "QOMAR");
        assert!(q.matches(&row(json!({"isApproved": true, "name": "Qomaruddin"}))));
        assert!(!q.matches(&row(json!({"isApproved": false, "name": "Qomaruddin"}))));
        assert!(!q.matches(&row(json!({"isApproved": true, "name": "Other"}))));
    }

    #[test]
    fn blank_search_is_ignored() {
        let q = Query::new().search(&["judul"], "   ");
        assert!(q.search.is_none());
    }

    #[test]
    fn rejects_non_identifier_columns() {
        let q = Query::new().eq("judul; DROP TABLE", 1);
        assert!(check_columns(&q).is_err());
        assert!(check_columns(&Query::new().newest_first(Table::BlogPosts)).is_ok());
    }
}
