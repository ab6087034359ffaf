//! Canonicalization of stored manuscript rows.
//!
//! Classification columns were written both as JSON arrays and as a single
//! comma-joined string while the schema settled. [`normalize_manuscript_row`]
//! runs once at the access-module boundary and rewrites every such column to
//! an array of trimmed, non-empty strings, so nothing downstream needs to
//! inspect the stored shape. Set columns also drop repeats; `imageUrls` is an
//! ordered gallery and keeps them.

use serde_json::Value;

use crate::store::Row;

/// Columns holding a list of strings.
pub const LIST_COLUMNS: [&str; 4] = ["kategori", "bahasa", "aksara", "imageUrls"];

/// List columns whose values form a set.
pub const SET_COLUMNS: [&str; 3] = ["kategori", "bahasa", "aksara"];

/// Delimiter used when a list column was stored as one string.
pub const STORED_LIST_DELIMITER: char = ',';

/// The two shapes a list column may arrive in.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredList<'a> {
    Missing,
    Joined(&'a str),
    Items(&'a [Value]),
    /// A scalar that is neither a string nor an array (a number, say).
    Scalar(&'a Value),
}

impl<'a> StoredList<'a> {
    pub fn classify(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => StoredList::Missing,
            Some(Value::String(s)) => StoredList::Joined(s),
            Some(Value::Array(items)) => StoredList::Items(items),
            Some(other) => StoredList::Scalar(other),
        }
    }

    pub fn into_strings(self) -> Vec<String> {
        match self {
            StoredList::Missing => Vec::new(),
            StoredList::Joined(s) => trim_items(s.split(STORED_LIST_DELIMITER)),
            StoredList::Items(items) => trim_items(items.iter().filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })),
            StoredList::Scalar(v) => trim_items(std::iter::once(v.to_string())),
        }
    }
}

/// Trims and drops empties. Order and repeats are kept.
pub fn trim_items<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| item.as_ref().trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Trims, drops empties, and removes repeats while keeping first-seen order.
pub fn clean<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in trim_items(items) {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Splits a delimited cell into distinct clean segments.
pub fn split_list(raw: &str, delimiter: char) -> Vec<String> {
    clean(raw.split(delimiter))
}

/// Splits a delimited cell into trimmed segments, repeats kept.
pub fn split_ordered(raw: &str, delimiter: char) -> Vec<String> {
    trim_items(raw.split(delimiter))
}

/// Rewrites every list column of a manuscript row into its canonical array form.
///
/// Applying it to an already-normalized row changes nothing.
pub fn normalize_manuscript_row(mut row: Row) -> Row {
    for column in LIST_COLUMNS {
        let mut items = StoredList::classify(row.get(column)).into_strings();
        if SET_COLUMNS.contains(&column) {
            items = clean(items);
        }
        row.insert(
            column.to_string(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
    }
    if let Some(Value::String(raw)) = row.get("jumlahHalaman") {
        if let Ok(n) = raw.trim().parse::<u64>() {
            row.insert("jumlahHalaman".to_string(), Value::from(n));
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn joined_string_becomes_list() {
        let out = normalize_manuscript_row(row(json!({"kategori": "Tasawuf,Fiqh"})));
        assert_eq!(out["kategori"], json!(["Tasawuf", "Fiqh"]));
    }

    #[test]
    fn list_is_returned_unchanged() {
        let input = row(json!({
            "kategori": ["Tasawuf", "Fiqh"],
            "bahasa": ["Arab", "Jawa"],
            "aksara": ["Pegon"],
            "imageUrls": []
        }));
        let once = normalize_manuscript_row(input.clone());
        assert_eq!(once, input);
        assert_eq!(normalize_manuscript_row(once.clone()), once);
    }

    #[test]
    fn segments_are_trimmed_and_deduplicated() {
        let out = normalize_manuscript_row(row(json!({
            "bahasa": " Arab , ,Jawa,Arab ",
            "aksara": ["  Pegon", "", null]
        })));
        assert_eq!(out["bahasa"], json!(["Arab", "Jawa"]));
        assert_eq!(out["aksara"], json!(["Pegon"]));
    }

    #[test]
    fn image_gallery_keeps_order_and_repeats() {
        let gallery = json!(["b.jpg", "a.jpg", "b.jpg"]);
        let out = normalize_manuscript_row(row(json!({"imageUrls": gallery.clone()})));
        assert_eq!(out["imageUrls"], gallery);

        let out = normalize_manuscript_row(row(json!({"imageUrls": "x.jpg, x.jpg"})));
        assert_eq!(out["imageUrls"], json!(["x.jpg", "x.jpg"]));
    }

    #[test]
    fn missing_columns_become_empty_lists() {
        let out = normalize_manuscript_row(row(json!({"judul": "A", "imageUrls": null})));
        for column in LIST_COLUMNS {
            assert_eq!(out[column], json!([]), "{column}");
        }
        assert_eq!(out["judul"], json!("A"));
    }

    #[test]
    fn numeric_page_count_strings_are_coerced() {
        let out = normalize_manuscript_row(row(json!({"jumlahHalaman": "120"})));
        assert_eq!(out["jumlahHalaman"], json!(120));
        let out = normalize_manuscript_row(row(json!({"jumlahHalaman": "banyak"})));
        assert_eq!(out["jumlahHalaman"], json!("banyak"));
    }

    #[test]
    fn split_list_uses_given_delimiter() {
        assert_eq!(split_list("a; b;;c ", ';'), vec!["a", "b", "c"]);
        assert!(split_list("   ", ';').is_empty());
        assert_eq!(split_list("a;a", ';'), vec!["a"]);
        assert_eq!(split_ordered("a; a ;", ';'), vec!["a", "a"]);
    }
}
