//! Hosted REST [`Backend`] implementation.
//!
//! Speaks the PostgREST dialect used by the hosted database service:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | select | `GET /rest/v1/{table}?col=eq.v&or=(...)&order=...&limit=&offset=` |
//! | insert | `POST /rest/v1/{table}` with `Prefer: return=representation` |
//! | update | `PATCH /rest/v1/{table}?id=eq.{id}` with `Prefer: return=representation` |
//! | delete | `DELETE /rest/v1/{table}?...` with `Prefer: return=representation` |
//!
//! Exact totals come from the `Content-Range` header when the request sends
//! `Prefer: count=exact`. A page past the end answers `416`, which is mapped
//! to an empty page rather than an error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use scriptorium_core::store::{
    check_columns, prepare_insert, prepare_patch, Backend, Predicate, Query, Row, Selection, Table,
};
use scriptorium_core::BackendError;

use crate::config::RestConfig;

/// Client for the hosted PostgREST endpoint.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &RestConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

/// Renders a value as a PostgREST filter operand.
fn filter_operand(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::Bool(b) => format!("is.{b}"),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

/// Values inside `or=(...)` are double-quoted so commas and parentheses survive.
fn quote(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// `ilike` pattern matching `needle` as a substring.
///
/// `%`, `_` and `\` are escaped for LIKE. PostgREST turns every `*` into `%`
/// and offers no escape for it, so a literal `*` becomes `_` (one character)
/// instead of widening the match to anything.
fn ilike_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('*');
    for c in needle.chars() {
        match c {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('_'),
            _ => out.push(c),
        }
    }
    out.push('*');
    out
}

fn filter_params(predicates: &[Predicate]) -> Vec<(String, String)> {
    predicates
        .iter()
        .map(|p| (p.column.clone(), filter_operand(&p.value)))
        .collect()
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.predicates));

    if let Some(search) = &query.search {
        let pattern = quote(&ilike_pattern(&search.needle));
        let alternatives: Vec<String> = search
            .columns
            .iter()
            .map(|c| format!("{c}.ilike.{pattern}"))
            .collect();
        params.push(("or".to_string(), format!("({})", alternatives.join(","))));
    }

    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.descending { "desc" } else { "asc" }))
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }

    if let Some(range) = &query.range {
        params.push(("limit".to_string(), (range.end - range.start).to_string()));
        params.push(("offset".to_string(), range.start.to_string()));
    }
    params
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/42`.
fn parse_content_range(header: &str) -> Option<u64> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn rejected(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let message = match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => format!("HTTP {status}"),
    };
    BackendError::Rejected { status, message }
}

async fn rows_from(response: Response) -> Result<Vec<Row>, BackendError> {
    let body: Value = response.json().await.map_err(transport)?;
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(BackendError::Schema(format!("expected a JSON object, got {other}"))),
            })
            .collect(),
        other => Err(BackendError::Schema(format!("expected a JSON array, got {other}"))),
    }
}

fn total_from(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

#[async_trait]
impl Backend for RestStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Selection, BackendError> {
        check_columns(query)?;
        let mut request = self
            .authorized(self.client.get(self.endpoint(table)))
            .query(&query_params(query));
        if query.count {
            request = request.header("Prefer", "count=exact");
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(table = %table, "requested range is past the end");
            return Ok(Selection {
                rows: Vec::new(),
                total: if query.count { total_from(&response) } else { None },
            });
        }
        if !status.is_success() {
            return Err(rejected(response).await);
        }

        let total = if query.count {
            Some(total_from(&response).ok_or_else(|| {
                BackendError::Schema(format!("{table}: response has no Content-Range total"))
            })?)
        } else {
            None
        };
        let rows = rows_from(response).await?;
        Ok(Selection { rows, total })
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        let row = prepare_insert(table, row, Utc::now())?;
        let response = self
            .authorized(self.client.post(self.endpoint(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        rows_from(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Schema(format!("{table}: insert returned no row")))
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Option<Row>, BackendError> {
        let patch = prepare_patch(table, patch, Utc::now())?;
        let response = self
            .authorized(self.client.patch(self.endpoint(table)))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(rows_from(response).await?.into_iter().next())
    }

    async fn delete(&self, table: Table, predicates: &[Predicate]) -> Result<u64, BackendError> {
        check_columns(&Query {
            predicates: predicates.to_vec(),
            ..Query::default()
        })?;
        let response = self
            .authorized(self.client.delete(self.endpoint(table)))
            .query(&filter_params(predicates))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(rows_from(response).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
    }

    #[test]
    fn filters_follow_postgrest_syntax() {
        assert_eq!(filter_operand(&json!(false)), "is.false");
        assert_eq!(filter_operand(&json!("p-1")), "eq.p-1");
        assert_eq!(filter_operand(&Value::Null), "is.null");
        assert_eq!(filter_operand(&json!(3)), "eq.3");
    }

    #[test]
    fn search_needles_cannot_inject_wildcards() {
        assert_eq!(ilike_pattern("Serat"), "*Serat*");
        assert_eq!(ilike_pattern("5*"), "*5_*");
        assert_eq!(ilike_pattern("100%_a\\b"), "*100\\%\\_a\\\\b*");
    }

    #[test]
    fn patches_are_normalized_like_local_updates() {
        let patch = json!({"id": "other", "date": "2024-07-20T17:00:00+07:00", "isApproved": true});
        let patch = prepare_patch(
            Table::GuestbookEntries,
            patch.as_object().unwrap().clone(),
            Utc::now(),
        )
        .unwrap();
        assert!(patch.get("id").is_none());
        assert_eq!(patch["date"], json!("2024-07-20T10:00:00.000000Z"));
    }

    #[test]
    fn list_query_parameters() {
        let query = Query::new()
            .eq("isApproved", true)
            .search(&["judul", "pengarang"], "Raja, \"Ali\"")
            .newest_first(Table::Manuscripts)
            .range(10..20)
            .exact_count();
        let params = query_params(&query);
        let get = |k: &str| {
            params
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("isApproved"), Some("is.true"));
        assert_eq!(
            get("or"),
            Some(r#"(judul.ilike."*Raja, \"Ali\"*",pengarang.ilike."*Raja, \"Ali\"*")"#)
        );
        assert_eq!(get("order"), Some("created_at.desc,id.desc"));
        assert_eq!(get("limit"), Some("10"));
        assert_eq!(get("offset"), Some("10"));
    }
}
