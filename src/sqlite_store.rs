//! SQLite-backed [`Backend`] implementation.
//!
//! Each logical table is a SQLite table of `(id, data, folded)` where `data`
//! is the row's JSON object and `folded` holds the same keys with values
//! lowercased in Rust. SQLite's `lower()` only folds ASCII, so searches match
//! against `folded` instead. Predicates, search and ordering are translated
//! into `json_extract` expressions; column names have already been checked to
//! be plain identifiers before they are spliced into SQL.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, SqlitePool};

use scriptorium_core::store::{
    apply_patch, check_columns, prepare_insert, Backend, Predicate, Query, Row, Selection, Table,
};
use scriptorium_core::BackendError;

/// SQLite implementation of the [`Backend`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// A bound SQL parameter. JSON booleans compare as 0/1 under `json_extract`.
#[derive(Debug, Clone, PartialEq)]
enum Param {
    Text(String),
    Int(i64),
    Real(f64),
}

fn param_for(value: &Value) -> Option<Param> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Param::Int(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Param::Int(i),
            None => Param::Real(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(Param::Text(s.clone())),
        other => Some(Param::Text(other.to_string())),
    }
}

fn json_path(column: &str) -> String {
    format!("json_extract(data, '$.{column}')")
}

fn folded_path(column: &str) -> String {
    format!("json_extract(folded, '$.{column}')")
}

/// Search shadow of a row: every non-null value as lowercased text, the
/// same text the in-memory search compares against.
pub(crate) fn fold(row: &Row) -> Map<String, Value> {
    row.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            Some((key.clone(), Value::String(text)))
        })
        .collect()
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// `WHERE` clause and its parameters for predicates plus an optional search.
fn where_clause(predicates: &[Predicate], query: Option<&Query>) -> (String, Vec<Param>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    for predicate in predicates {
        let expr = json_path(&predicate.column);
        match param_for(&predicate.value) {
            None => conditions.push(format!("{expr} IS NULL")),
            Some(param) => {
                conditions.push(format!("{expr} = ?"));
                params.push(param);
            }
        }
    }

    if let Some(search) = query.and_then(|q| q.search.as_ref()) {
        let pattern = escape_like(&search.needle);
        let alternatives: Vec<String> = search
            .columns
            .iter()
            .map(|column| {
                params.push(Param::Text(pattern.clone()));
                format!("{} LIKE ? ESCAPE '\\'", folded_path(column))
            })
            .collect();
        conditions.push(format!("({})", alternatives.join(" OR ")));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

fn order_clause(query: &Query) -> String {
    if query.order.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = query
        .order
        .iter()
        .map(|o| {
            let expr = if o.column == "id" {
                "id".to_string()
            } else {
                json_path(&o.column)
            };
            format!("{expr} {}", if o.descending { "DESC" } else { "ASC" })
        })
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

fn arguments<'q>(params: &[Param]) -> Result<SqliteArguments<'q>, BackendError> {
    let mut args = SqliteArguments::default();
    for param in params {
        let added = match param {
            Param::Text(s) => args.add(s.clone()),
            Param::Int(i) => args.add(*i),
            Param::Real(f) => args.add(*f),
        };
        added.map_err(|e| BackendError::Schema(e.to_string()))?;
    }
    Ok(args)
}

fn db_error(e: sqlx::Error) -> BackendError {
    match e {
        sqlx::Error::Database(db) => BackendError::Rejected {
            status: if db.is_unique_violation() { 409 } else { 400 },
            message: db.message().to_string(),
        },
        other => BackendError::Transport(other.to_string()),
    }
}

fn decode(table: Table, raw: &str) -> Result<Row, BackendError> {
    serde_json::from_str(raw)
        .map_err(|e| BackendError::Schema(format!("{table}: stored row is not a JSON object: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, BackendError> {
    serde_json::to_string(value).map_err(|e| BackendError::Schema(e.to_string()))
}

fn row_id(row: &Row) -> Result<String, BackendError> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::Schema("row has no string id".to_string()))
}

#[async_trait]
impl Backend for SqliteStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Selection, BackendError> {
        check_columns(query)?;
        let name = table.name();
        let (filter, params) = where_clause(&query.predicates, Some(query));

        let total = if query.count {
            let sql = format!("SELECT COUNT(*) FROM {name}{filter}");
            let count: i64 = sqlx::query_scalar_with(&sql, arguments(&params)?)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
            Some(u64::try_from(count).unwrap_or_default())
        } else {
            None
        };

        let rows = match &query.range {
            Some(range) if range.is_empty() => Vec::new(),
            range => {
                let mut sql = format!("SELECT data FROM {name}{filter}{}", order_clause(query));
                if let Some(range) = range {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", range.end - range.start, range.start));
                }
                let raw: Vec<String> = sqlx::query_scalar_with(&sql, arguments(&params)?)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?;
                raw.iter()
                    .map(|r| decode(table, r))
                    .collect::<Result<_, _>>()?
            }
        };

        Ok(Selection { rows, total })
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        let row = prepare_insert(table, row, Utc::now())?;
        let sql = format!("INSERT INTO {} (id, data, folded) VALUES (?, ?, ?)", table.name());
        sqlx::query(&sql)
            .bind(row_id(&row)?)
            .bind(encode(&row)?)
            .bind(encode(&fold(&row))?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Option<Row>, BackendError> {
        let name = table.name();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let existing: Option<String> =
            sqlx::query_scalar(&format!("SELECT data FROM {name} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        let Some(existing) = existing else {
            return Ok(None);
        };

        let mut row = decode(table, &existing)?;
        apply_patch(table, &mut row, patch, Utc::now())?;
        sqlx::query(&format!("UPDATE {name} SET data = ?, folded = ? WHERE id = ?"))
            .bind(encode(&row)?)
            .bind(encode(&fold(&row))?)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(Some(row))
    }

    async fn delete(&self, table: Table, predicates: &[Predicate]) -> Result<u64, BackendError> {
        check_columns(&Query {
            predicates: predicates.to_vec(),
            ..Query::default()
        })?;
        let (filter, params) = where_clause(predicates, None);
        let sql = format!("DELETE FROM {}{filter}", table.name());
        let result = sqlx::query_with(&sql, arguments(&params)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::open(&dir.path().join("store.sqlite")).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn insert_select_count() {
        let (_dir, store) = store().await;
        for (i, approved) in [true, false, true].into_iter().enumerate() {
            store
                .insert(
                    Table::GuestbookEntries,
                    row(json!({
                        "name": format!("Tamu {i}"),
                        "message": "Halo",
                        "isApproved": approved,
                        "date": format!("2024-01-0{}T00:00:00Z", i + 1),
                    })),
                )
                .await
                .unwrap();
        }

        let query = Query::new()
            .eq("isApproved", true)
            .newest_first(Table::GuestbookEntries)
            .range(0..1)
            .exact_count();
        let selection = store.select(Table::GuestbookEntries, &query).await.unwrap();
        assert_eq!(selection.total, Some(2));
        assert_eq!(selection.rows.len(), 1);
        assert_eq!(selection.rows[0]["name"], json!("Tamu 2"));
        assert_eq!(selection.rows[0]["isApproved"], json!(true));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_escaped() {
        let (_dir, store) = store().await;
        for title in ["Hikayat Raja", "Serat 100% Jawa", "Babad"] {
            store
                .insert(Table::Manuscripts, row(json!({"judul": title})))
                .await
                .unwrap();
        }
        let hits = store
            .select(Table::Manuscripts, &Query::new().search(&["judul"], "hikayat").exact_count())
            .await
            .unwrap();
        assert_eq!(hits.total, Some(1));

        let percent = store
            .select(Table::Manuscripts, &Query::new().search(&["judul"], "0%").exact_count())
            .await
            .unwrap();
        assert_eq!(percent.total, Some(1));
    }

    #[tokio::test]
    async fn search_folds_non_ascii_like_the_memory_store() {
        let (_dir, store) = store().await;
        let memory = scriptorium_core::store::memory::InMemoryStore::new();
        for title in ["ĀDAB AL-ṢALAWĀT", "Serat Ambiya"] {
            let r = row(json!({"judul": title}));
            store.insert(Table::Manuscripts, r.clone()).await.unwrap();
            memory.insert(Table::Manuscripts, r).await.unwrap();
        }

        for needle in ["ādab", "ṣalawāt", "AMBIYA"] {
            let query = Query::new().search(&["judul"], needle).range(0..10).exact_count();
            let sqlite = store.select(Table::Manuscripts, &query).await.unwrap();
            let reference = memory.select(Table::Manuscripts, &query).await.unwrap();
            assert_eq!(sqlite.total, Some(1), "needle {needle}");
            assert_eq!(sqlite.total, reference.total, "needle {needle}");
            assert_eq!(sqlite.rows.len(), 1);
        }

        let updated_id = store
            .select(Table::Manuscripts, &Query::new().search(&["judul"], "ādab"))
            .await
            .unwrap()
            .rows[0]["id"]
            .as_str()
            .unwrap()
            .to_string();
        store
            .update(Table::Manuscripts, &updated_id, row(json!({"judul": "ŚLOKA"})))
            .await
            .unwrap();
        let hits = store
            .select(Table::Manuscripts, &Query::new().search(&["judul"], "śloka").exact_count())
            .await
            .unwrap();
        assert_eq!(hits.total, Some(1));
    }

    #[test]
    fn fold_lowercases_every_value() {
        let folded = fold(&row(json!({"judul": "ĀDAB", "jumlahHalaman": 12, "x": null})));
        assert_eq!(folded["judul"], json!("ādab"));
        assert_eq!(folded["jumlahHalaman"], json!("12"));
        assert!(!folded.contains_key("x"));
    }

    #[tokio::test]
    async fn update_merges_and_delete_counts() {
        let (_dir, store) = store().await;
        let inserted = store
            .insert(Table::Comments, row(json!({"post_id": "p1", "text": "a", "isApproved": false})))
            .await
            .unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        let updated = store
            .update(Table::Comments, &id, row(json!({"isApproved": true})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["isApproved"], json!(true));
        assert_eq!(updated["text"], json!("a"));
        assert!(store
            .update(Table::Comments, "missing", row(json!({})))
            .await
            .unwrap()
            .is_none());

        let removed = store
            .delete(Table::Comments, &[Predicate::eq("post_id", "p1")])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (_dir, store) = store().await;
        store
            .insert(Table::BlogPosts, row(json!({"id": "p1", "title": "A"})))
            .await
            .unwrap();
        let err = store
            .insert(Table::BlogPosts, row(json!({"id": "p1", "title": "B"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 409, .. }));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("A_b%"), "%a\\_b\\%%");
    }
}
