//! In-memory [`Backend`] implementation for testing and WASM targets.
//!
//! Keeps one `Vec<Row>` per table behind a `std::sync::RwLock`. Filtering,
//! ordering, and range slicing follow the same rules the SQL and REST
//! backends push down to their stores.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::BackendError;

use super::{
    apply_patch, check_columns, predicates_match, prepare_insert, Backend, Order, Predicate,
    Query, Row, Selection, Table,
};

/// In-memory store for testing and WASM environments.
pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Number of rows currently held for `table`.
    pub fn len(&self, table: Table) -> usize {
        self.read()
            .map(|tables| tables.get(&table).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Table, Vec<Row>>>, BackendError> {
        self.tables
            .read()
            .map_err(|_| BackendError::Transport("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Table, Vec<Row>>>, BackendError> {
        self.tables
            .write()
            .map_err(|_| BackendError::Transport("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[Order]) -> Ordering {
    for o in order {
        let ord = compare_values(a.get(&o.column), b.get(&o.column));
        let ord = if o.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Backend for InMemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Selection, BackendError> {
        check_columns(query)?;
        let tables = self.read()?;
        let mut matching: Vec<&Row> = tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).collect())
            .unwrap_or_default();
        matching.sort_by(|a, b| compare_rows(a, b, &query.order));

        let total = matching.len() as u64;
        let rows = match &query.range {
            Some(range) => {
                let start = range.start.min(total);
                let end = range.end.min(total).max(start);
                matching[start as usize..end as usize]
                    .iter()
                    .map(|r| (*r).clone())
                    .collect()
            }
            None => matching.into_iter().cloned().collect(),
        };

        Ok(Selection {
            rows,
            total: query.count.then_some(total),
        })
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        let row = prepare_insert(table, row, Utc::now())?;
        let mut tables = self.write()?;
        let rows = tables.entry(table).or_default();
        if rows.iter().any(|r| r.get("id") == row.get("id")) {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("duplicate id in {table}"),
            });
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Option<Row>, BackendError> {
        let mut tables = self.write()?;
        let Some(existing) = tables
            .get_mut(&table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            })
        else {
            return Ok(None);
        };
        apply_patch(table, existing, patch, Utc::now())?;
        Ok(Some(existing.clone()))
    }

    async fn delete(&self, table: Table, predicates: &[Predicate]) -> Result<u64, BackendError> {
        check_columns(&Query {
            predicates: predicates.to_vec(),
            ..Query::default()
        })?;
        let mut tables = self.write()?;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !predicates_match(predicates, r));
        Ok((before - rows.len()) as u64)
    }
}
