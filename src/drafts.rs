//! File-backed manuscript form drafts and the `scriptorium draft` commands.
//!
//! Each draft key is one JSON file under `[drafts] dir`. Writes go through a
//! temporary file and a rename so a crash never leaves half a draft behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;

use scriptorium_core::draft::{DraftError, DraftStorage, ManuscriptForm, DRAFT_KEY};
use scriptorium_core::Library;

use crate::backend::open_backend;
use crate::config::Config;

/// Drafts stored as `<dir>/<key>.json`.
pub struct FileDraftStorage {
    dir: PathBuf,
}

impl FileDraftStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DraftError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DraftError::Storage(format!("invalid draft key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> DraftError {
    DraftError::Storage(format!("{}: {e}", path.display()))
}

impl DraftStorage for FileDraftStorage {
    fn load(&self, key: &str) -> Result<Option<String>, DraftError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), DraftError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| storage_error(&self.dir, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| storage_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| storage_error(&path, e))
    }

    fn clear(&self, key: &str) -> Result<(), DraftError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&path, e)),
        }
    }
}

fn storage(config: &Config) -> FileDraftStorage {
    FileDraftStorage::new(&config.drafts.dir)
}

/// `draft set`: changes one field. With `editing`, starts or continues a
/// draft for that existing manuscript.
pub async fn run_draft_set(
    config: &Config,
    field: &str,
    value: &str,
    editing: Option<&str>,
) -> Result<()> {
    let storage = storage(config);
    let mut form = match editing {
        Some(id) => {
            let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());
            let manuscript = library.catalog.get(id).await?;
            ManuscriptForm::edit(&storage, &manuscript)?
        }
        None => ManuscriptForm::resume(&storage)?,
    };
    form.set(field, value)?;
    println!("{field} = {value}");
    Ok(())
}

/// `draft show`: prints the saved draft and whether it would pass validation.
pub fn run_draft_show(config: &Config) -> Result<()> {
    let storage = storage(config);
    let form = ManuscriptForm::resume(&storage)?;
    if !form.restored() {
        println!("No draft saved in {}.", storage.dir().display());
        return Ok(());
    }

    match &form.draft().editing_id {
        Some(id) => println!("Draft: editing manuscript {id}"),
        None => println!("Draft: new manuscript"),
    }
    for (column, value) in &form.draft().values {
        if !value.is_empty() {
            println!("  {column:<22} {value}");
        }
    }
    match form.fields() {
        Ok(_) => println!("\nReady to submit."),
        Err(e) => println!("\nNot ready: {e}"),
    }
    Ok(())
}

/// `draft submit`: saves the manuscript and discards the draft.
pub async fn run_draft_submit(config: &Config) -> Result<()> {
    let storage = storage(config);
    let form = ManuscriptForm::resume(&storage)?;
    if !form.restored() {
        anyhow::bail!("no draft to submit (key {DRAFT_KEY})");
    }
    let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());
    let saved = form.submit(&library.catalog).await?;
    println!("Saved manuscript {} ({})", saved.id, saved.fields.title);
    Ok(())
}

/// `draft cancel`: discards the draft.
pub fn run_draft_cancel(config: &Config) -> Result<()> {
    let storage = storage(config);
    ManuscriptForm::resume(&storage)?.cancel()?;
    println!("Draft discarded.");
    Ok(())
}
