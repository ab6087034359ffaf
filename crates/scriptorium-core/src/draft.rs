//! Draft persistence for the manuscript form.
//!
//! While the form is open every change is written to a [`DraftStorage`]
//! under [`DRAFT_KEY`], so an accidental navigation loses nothing. The draft
//! is removed once the form is submitted successfully or cancelled. Drafts
//! are local only and never reconciled with the backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::import::{cells_from_fields, fields_from_cells, is_known_column};
use crate::models::{Manuscript, ManuscriptFields};

/// Fixed storage key of the manuscript form draft.
pub const DRAFT_KEY: &str = "manuscript-form-draft";

/// List fields in the form are typed comma-separated.
pub const FORM_LIST_DELIMITER: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("draft storage failed: {0}")]
    Storage(String),

    #[error("stored draft is unreadable: {0}")]
    Corrupt(String),
}

/// Key-value storage for drafts.
pub trait DraftStorage: Send + Sync {
    fn load(&self, key: &str) -> std::result::Result<Option<String>, DraftError>;
    fn save(&self, key: &str, value: &str) -> std::result::Result<(), DraftError>;
    fn clear(&self, key: &str) -> std::result::Result<(), DraftError>;
}

#[derive(Default)]
pub struct MemoryDraftStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryDraftStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftStorage for MemoryDraftStorage {
    fn load(&self, key: &str) -> std::result::Result<Option<String>, DraftError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> std::result::Result<(), DraftError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> std::result::Result<(), DraftError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// What gets persisted: the form's text values and, for edits, the record id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editing_id: Option<String>,
    pub values: BTreeMap<String, String>,
}

fn blank_values() -> BTreeMap<String, String> {
    cells_from_fields(&ManuscriptFields::default(), FORM_LIST_DELIMITER)
}

/// The admin manuscript form, for a new record or an edit.
pub struct ManuscriptForm<'a> {
    storage: &'a dyn DraftStorage,
    draft: ManuscriptDraft,
    restored: bool,
}

impl<'a> ManuscriptForm<'a> {
    /// Opens a blank creation form, restoring a saved creation draft if one exists.
    pub fn new(storage: &'a dyn DraftStorage) -> Result<Self> {
        let saved = Self::saved_draft(storage)?.filter(|d| d.editing_id.is_none());
        Ok(Self::from_parts(storage, saved, ManuscriptDraft {
            editing_id: None,
            values: blank_values(),
        }))
    }

    /// Opens an edit form for `manuscript`, restoring a saved draft for the
    /// same record if one exists.
    pub fn edit(storage: &'a dyn DraftStorage, manuscript: &Manuscript) -> Result<Self> {
        let saved = Self::saved_draft(storage)?
            .filter(|d| d.editing_id.as_deref() == Some(manuscript.id.as_str()));
        Ok(Self::from_parts(storage, saved, ManuscriptDraft {
            editing_id: Some(manuscript.id.clone()),
            values: cells_from_fields(&manuscript.fields, FORM_LIST_DELIMITER),
        }))
    }

    /// Reopens whatever draft is saved, creation or edit.
    pub fn resume(storage: &'a dyn DraftStorage) -> Result<Self> {
        let saved = Self::saved_draft(storage)?;
        Ok(Self::from_parts(storage, saved, ManuscriptDraft {
            editing_id: None,
            values: blank_values(),
        }))
    }

    fn from_parts(
        storage: &'a dyn DraftStorage,
        saved: Option<ManuscriptDraft>,
        fresh: ManuscriptDraft,
    ) -> Self {
        match saved {
            Some(mut draft) => {
                for (column, value) in fresh.values {
                    draft.values.entry(column).or_insert(value);
                }
                debug!(editing = ?draft.editing_id, "restored manuscript draft");
                Self {
                    storage,
                    draft,
                    restored: true,
                }
            }
            None => Self {
                storage,
                draft: fresh,
                restored: false,
            },
        }
    }

    fn saved_draft(storage: &dyn DraftStorage) -> Result<Option<ManuscriptDraft>> {
        match storage.load(DRAFT_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::from(DraftError::Corrupt(e.to_string()))),
            None => Ok(None),
        }
    }

    /// Whether the form started from a saved draft.
    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn draft(&self) -> &ManuscriptDraft {
        &self.draft
    }

    pub fn value(&self, column: &str) -> Option<&str> {
        self.draft.values.get(column).map(String::as_str)
    }

    /// Changes one field and writes the draft through to storage.
    pub fn set(&mut self, column: &str, value: &str) -> Result<()> {
        if !is_known_column(column) {
            return Err(Error::validation(column, "unknown manuscript field"));
        }
        self.draft
            .values
            .insert(column.to_string(), value.to_string());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.draft)
            .map_err(|e| DraftError::Storage(e.to_string()))?;
        self.storage.save(DRAFT_KEY, &raw)?;
        Ok(())
    }

    /// Validates the form without saving anything.
    pub fn fields(&self) -> Result<ManuscriptFields> {
        fields_from_cells(&self.draft.values, FORM_LIST_DELIMITER)
    }

    /// Creates or updates the manuscript, then discards the draft.
    ///
    /// On any failure the draft stays in storage.
    pub async fn submit(self, catalog: &Catalog) -> Result<Manuscript> {
        let fields = self.fields()?;
        let saved = match &self.draft.editing_id {
            Some(id) => catalog.update(id, &fields).await?,
            None => catalog.create(&fields).await?,
        };
        self.storage.clear(DRAFT_KEY)?;
        Ok(saved)
    }

    /// Abandons the form and discards the draft.
    pub fn cancel(self) -> Result<()> {
        self.storage.clear(DRAFT_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;

    fn fill(form: &mut ManuscriptForm<'_>) {
        for (column, value) in [
            ("kodeInventarisasi", "F-1"),
            ("judul", "Dalail"),
            ("pengarang", "Al-Jazuli"),
            ("deskripsi", "Shalawat"),
            ("kategori", "Doa, Shalawat"),
        ] {
            form.set(column, value).unwrap();
        }
    }

    #[test]
    fn drafts_survive_reopening_the_form() {
        let storage = MemoryDraftStorage::new();
        {
            let mut form = ManuscriptForm::new(&storage).unwrap();
            assert!(!form.restored());
            form.set("judul", "Setengah jadi").unwrap();
        }
        let form = ManuscriptForm::new(&storage).unwrap();
        assert!(form.restored());
        assert_eq!(form.value("judul"), Some("Setengah jadi"));
        assert_eq!(form.value("statusKetersediaan"), Some("Tersedia"));
        assert_eq!(form.value("jumlahHalaman"), Some("0"));
    }

    #[tokio::test]
    async fn submit_clears_the_draft() {
        let storage = MemoryDraftStorage::new();
        let catalog = Catalog::new(Arc::new(InMemoryStore::new()), 10);
        let mut form = ManuscriptForm::new(&storage).unwrap();
        fill(&mut form);

        let created = form.submit(&catalog).await.unwrap();
        assert_eq!(created.fields.categories, vec!["Doa", "Shalawat"]);
        assert_eq!(created.fields.page_count, 0);
        assert_eq!(storage.load(DRAFT_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn failed_submit_keeps_the_draft() {
        let storage = MemoryDraftStorage::new();
        let catalog = Catalog::new(Arc::new(InMemoryStore::new()), 10);
        let mut form = ManuscriptForm::new(&storage).unwrap();
        form.set("judul", "Tanpa kode").unwrap();

        let err = form.submit(&catalog).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(storage.load(DRAFT_KEY).unwrap().is_some());
    }

    #[test]
    fn cancel_discards_the_draft() {
        let storage = MemoryDraftStorage::new();
        let mut form = ManuscriptForm::new(&storage).unwrap();
        form.set("judul", "Batal").unwrap();
        form.cancel().unwrap();
        assert!(!ManuscriptForm::new(&storage).unwrap().restored());
    }

    #[tokio::test]
    async fn edit_drafts_do_not_leak_into_other_records() {
        let storage = MemoryDraftStorage::new();
        let catalog = Catalog::new(Arc::new(InMemoryStore::new()), 10);
        let mut form = ManuscriptForm::new(&storage).unwrap();
        fill(&mut form);
        let m = form.submit(&catalog).await.unwrap();

        let mut edit = ManuscriptForm::edit(&storage, &m).unwrap();
        assert_eq!(edit.value("kategori"), Some("Doa, Shalawat"));
        edit.set("judul", "Dalail al-Khairat").unwrap();

        assert!(!ManuscriptForm::new(&storage).unwrap().restored());
        let resumed = ManuscriptForm::resume(&storage).unwrap();
        assert_eq!(resumed.draft().editing_id.as_deref(), Some(m.id.as_str()));

        let updated = resumed.submit(&catalog).await.unwrap();
        assert_eq!(updated.id, m.id);
        assert_eq!(updated.fields.title, "Dalail al-Khairat");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let storage = MemoryDraftStorage::new();
        let mut form = ManuscriptForm::new(&storage).unwrap();
        assert!(form.set("tanggalDitambahkan", "kemarin").is_err());
        assert_eq!(storage.load(DRAFT_KEY).unwrap(), None);
    }

    #[test]
    fn corrupt_drafts_are_reported() {
        let storage = MemoryDraftStorage::new();
        storage.save(DRAFT_KEY, "{not json").unwrap();
        assert!(matches!(
            ManuscriptForm::new(&storage),
            Err(Error::Draft(DraftError::Corrupt(_)))
        ));
    }
}
