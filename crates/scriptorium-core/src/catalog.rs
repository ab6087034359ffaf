//! Manuscript access: paginated catalog search plus admin CRUD.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{from_row, to_row, Manuscript, ManuscriptFields};
use crate::normalize::{clean, normalize_manuscript_row, trim_items};
use crate::pagination::{fetch_page, Page, PageRequest};
use crate::store::{count_rows, fetch_by_id, Backend, Predicate, Query, Row, Table};

const TABLE: Table = Table::Manuscripts;
const ENTITY: &str = "manuscript";

/// Columns a free-text catalog query is matched against.
pub const SEARCH_COLUMNS: [&str; 4] = ["judul", "pengarang", "kodeInventarisasi", "deskripsi"];

/// Optional columns an edit may clear; they are written as `null` when absent.
const OPTIONAL_COLUMNS: [&str; 9] = [
    "kodeDigital",
    "penyalin",
    "tahunPenyalinan",
    "tinta",
    "kondisiNaskah",
    "kolofon",
    "catatan",
    "thumbnailUrl",
    "googleDriveFolderUrl",
];

/// Checks the required descriptive fields before anything is written.
///
/// The closed vocabularies and the page count are enforced by the types.
pub fn validate_fields(fields: &ManuscriptFields) -> Result<()> {
    let required = [
        ("kodeInventarisasi", &fields.inventory_code),
        ("judul", &fields.title),
        ("pengarang", &fields.author),
        ("deskripsi", &fields.description),
    ];
    for (column, value) in required {
        if value.trim().is_empty() {
            return Err(Error::validation(column, "must not be empty"));
        }
    }
    Ok(())
}

fn prepare(fields: &ManuscriptFields) -> Result<Row> {
    validate_fields(fields)?;
    let mut fields = fields.clone();
    fields.categories = clean(&fields.categories);
    fields.languages = clean(&fields.languages);
    fields.scripts = clean(&fields.scripts);
    fields.image_urls = trim_items(&fields.image_urls);
    to_row(TABLE, &fields)
}

fn decode(row: Row) -> Result<Manuscript> {
    from_row(TABLE, normalize_manuscript_row(row))
}

/// Entity access for the `manuscripts` table.
#[derive(Clone)]
pub struct Catalog {
    backend: Arc<dyn Backend>,
    page_size: u32,
}

impl Catalog {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// One page of the catalog, newest first, optionally narrowed by a
    /// case-insensitive substring match on title, author, inventory code,
    /// or description.
    pub async fn list(&self, page: u32, query: Option<&str>) -> Result<Page<Manuscript>> {
        let mut q = Query::new();
        if let Some(needle) = query {
            q = q.search(&SEARCH_COLUMNS, needle);
        }
        let q = q.newest_first(TABLE);
        debug!(page, query = ?query, "listing manuscripts");
        let request = PageRequest::new(page, self.page_size);
        let rows = fetch_page(self.backend.as_ref(), TABLE, q, request).await?;
        rows.try_map(decode)
    }

    pub async fn get(&self, id: &str) -> Result<Manuscript> {
        let row = fetch_by_id(self.backend.as_ref(), TABLE, id)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))?;
        decode(row)
    }

    pub async fn create(&self, fields: &ManuscriptFields) -> Result<Manuscript> {
        let row = prepare(fields)?;
        let stored = self.backend.insert(TABLE, row).await?;
        let manuscript = decode(stored)?;
        info!(id = %manuscript.id, code = %manuscript.fields.inventory_code, "manuscript created");
        Ok(manuscript)
    }

    /// Replaces every editable field of an existing manuscript.
    pub async fn update(&self, id: &str, fields: &ManuscriptFields) -> Result<Manuscript> {
        let mut patch = prepare(fields)?;
        for column in OPTIONAL_COLUMNS {
            patch.entry(column.to_string()).or_insert(Value::Null);
        }
        let stored = self
            .backend
            .update(TABLE, id, patch)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))?;
        info!(id, "manuscript updated");
        decode(stored)
    }

    /// Permanently removes a manuscript.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = self
            .backend
            .delete(TABLE, &[Predicate::eq("id", id)])
            .await?;
        if removed == 0 {
            return Err(Error::not_found(ENTITY, id));
        }
        info!(id, "manuscript deleted");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(count_rows(self.backend.as_ref(), TABLE, Query::new()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, Completeness, Legibility};
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn fields(code: &str, title: &str, author: &str) -> ManuscriptFields {
        ManuscriptFields {
            inventory_code: code.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            description: format!("Naskah {title}"),
            availability: Availability::Available,
            completeness: Completeness::Complete,
            legibility: Legibility::Good,
            page_count: 10,
            ..ManuscriptFields::default()
        }
    }

    fn catalog() -> (Arc<InMemoryStore>, Catalog) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), Catalog::new(store, 10))
    }

    #[tokio::test]
    async fn search_matches_any_column_case_insensitively() {
        let (_, catalog) = catalog();
        catalog
            .create(&fields("TPPKPQ-001", "Kitab Tauhid", "KH Qomaruddin"))
            .await
            .unwrap();
        catalog
            .create(&fields("QOMARUDDIN-002", "Fiqih", "Anonim"))
            .await
            .unwrap();
        let mut described = fields("TPPKPQ-003", "Hikayat", "Anonim");
        described.description = "Salinan dari pesantren Qomaruddin".to_string();
        catalog.create(&described).await.unwrap();
        catalog
            .create(&fields("TPPKPQ-004", "Barzanji", "Ja'far"))
            .await
            .unwrap();

        let page = catalog.list(1, Some("qomaruddin")).await.unwrap();
        assert_eq!(page.total_items, 3);
        assert_eq!(page.records.len(), 3);

        let none = catalog.list(1, Some("tidak-ada")).await.unwrap();
        assert!(none.records.is_empty());
        assert_eq!(none.total_items, 0);
        assert_eq!(none.total_pages, 0);
    }

    #[tokio::test]
    async fn stored_joined_classifications_come_back_as_lists() {
        let (store, catalog) = catalog();
        let row = json!({
            "id": "legacy",
            "kodeInventarisasi": "OLD-1",
            "judul": "Lama",
            "pengarang": "Anonim",
            "deskripsi": "Data lama",
            "statusKetersediaan": "Restorasi",
            "kelengkapan": "Tidak Lengkap",
            "keterbacaan": "Kurang",
            "jumlahHalaman": 0,
            "kategori": "Tasawuf,Fiqh",
            "bahasa": ["Arab"],
        });
        store
            .insert(Table::Manuscripts, row.as_object().unwrap().clone())
            .await
            .unwrap();

        let m = catalog.get("legacy").await.unwrap();
        assert_eq!(m.fields.categories, vec!["Tasawuf", "Fiqh"]);
        assert_eq!(m.fields.languages, vec!["Arab"]);
        assert!(m.fields.scripts.is_empty());
        assert_eq!(m.fields.availability, Availability::UnderRestoration);
    }

    #[tokio::test]
    async fn create_rejects_blank_required_fields() {
        let (store, catalog) = catalog();
        let err = catalog
            .create(&fields("  ", "Judul", "Penulis"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "kodeInventarisasi"));
        assert!(store.is_empty(Table::Manuscripts));
    }

    #[tokio::test]
    async fn update_replaces_fields_and_clears_optionals() {
        let (_, catalog) = catalog();
        let mut f = fields("A-1", "Awal", "Anonim");
        f.notes = Some("catatan".to_string());
        let created = catalog.create(&f).await.unwrap();

        let mut edited = fields("A-1", "Revisi", "Anonim");
        edited.categories = vec!["Adab".to_string(), " Adab ".to_string()];
        let updated = catalog.update(&created.id, &edited).await.unwrap();
        assert_eq!(updated.fields.title, "Revisi");
        assert_eq!(updated.fields.notes, None);
        assert_eq!(updated.fields.categories, vec!["Adab"]);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let (_, catalog) = catalog();
        assert!(catalog.get("nope").await.unwrap_err().is_not_found());
        assert!(catalog.delete("nope").await.unwrap_err().is_not_found());
        assert!(catalog
            .update("nope", &fields("X", "Y", "Z"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn delete_is_permanent() {
        let (_, catalog) = catalog();
        let m = catalog.create(&fields("D-1", "Hapus", "Anonim")).await.unwrap();
        assert_eq!(catalog.count().await.unwrap(), 1);
        catalog.delete(&m.id).await.unwrap();
        assert_eq!(catalog.count().await.unwrap(), 0);
        assert!(catalog.get(&m.id).await.unwrap_err().is_not_found());
    }
}
