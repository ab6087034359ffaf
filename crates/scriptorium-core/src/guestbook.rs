//! Guestbook entries: public signing and admin moderation.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{from_row, to_row, GuestBookEntry, NewGuestBookEntry};
use crate::moderation::{ModerationFilter, APPROVAL_COLUMN};
use crate::pagination::{fetch_page, Page, PageRequest};
use crate::store::{count_rows, Backend, Predicate, Query, Row, Table};

const TABLE: Table = Table::GuestbookEntries;
const ENTITY: &str = "guestbook entry";

#[derive(Clone)]
pub struct Guestbook {
    backend: Arc<dyn Backend>,
    page_size: u32,
}

impl Guestbook {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// One page of entries, newest first. The moderation filter is part of
    /// the backend query, so the totals describe exactly the filtered set.
    pub async fn list(&self, page: u32, filter: ModerationFilter) -> Result<Page<GuestBookEntry>> {
        let query = filter.apply(Query::new()).newest_first(TABLE);
        let request = PageRequest::new(page, self.page_size);
        let rows = fetch_page(self.backend.as_ref(), TABLE, query, request).await?;
        rows.try_map(|row| from_row(TABLE, row))
    }

    /// Public listing: approved entries only.
    pub async fn list_public(&self, page: u32) -> Result<Page<GuestBookEntry>> {
        self.list(page, ModerationFilter::Approved).await
    }

    /// Records a public entry. It stays hidden until approved.
    pub async fn sign(&self, entry: &NewGuestBookEntry) -> Result<GuestBookEntry> {
        if entry.name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        if entry.message.trim().is_empty() {
            return Err(Error::validation("message", "must not be empty"));
        }
        let mut row = to_row(TABLE, entry)?;
        row.insert(APPROVAL_COLUMN.to_string(), Value::Bool(false));
        let stored = self.backend.insert(TABLE, row).await?;
        let entry: GuestBookEntry = from_row(TABLE, stored)?;
        info!(id = %entry.id, "guestbook entry submitted for moderation");
        Ok(entry)
    }

    pub async fn approve(&self, id: &str) -> Result<GuestBookEntry> {
        let mut patch = Row::new();
        patch.insert(APPROVAL_COLUMN.to_string(), Value::Bool(true));
        let stored = self
            .backend
            .update(TABLE, id, patch)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))?;
        info!(id, "guestbook entry approved");
        from_row(TABLE, stored)
    }

    /// Rejecting an entry removes it; there is no rejected state.
    pub async fn reject(&self, id: &str) -> Result<()> {
        self.delete(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = self
            .backend
            .delete(TABLE, &[Predicate::eq("id", id)])
            .await?;
        if removed == 0 {
            return Err(Error::not_found(ENTITY, id));
        }
        info!(id, "guestbook entry deleted");
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let query = ModerationFilter::Pending.apply(Query::new());
        Ok(count_rows(self.backend.as_ref(), TABLE, query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn entry(name: &str) -> NewGuestBookEntry {
        NewGuestBookEntry {
            name: name.to_string(),
            message: "Semoga berkah".to_string(),
        }
    }

    #[tokio::test]
    async fn signed_entries_are_hidden_until_approved() {
        let book = Guestbook::new(Arc::new(InMemoryStore::new()), 10);
        let e = book.sign(&entry("Ahmad")).await.unwrap();
        assert!(!e.is_approved);
        assert!(book.list_public(1).await.unwrap().records.is_empty());

        book.approve(&e.id).await.unwrap();
        let public = book.list_public(1).await.unwrap();
        assert_eq!(public.records.len(), 1);
        assert_eq!(public.records[0].name, "Ahmad");
    }

    #[tokio::test]
    async fn pending_filter_paginates_over_pending_rows_only() {
        let book = Guestbook::new(Arc::new(InMemoryStore::new()), 2);
        let mut ids = Vec::new();
        for i in 0..7 {
            ids.push(book.sign(&entry(&format!("Tamu {i}"))).await.unwrap().id);
        }
        for id in &ids[..2] {
            book.approve(id).await.unwrap();
        }

        let pending = book.list(1, ModerationFilter::Pending).await.unwrap();
        assert_eq!(pending.total_items, 5);
        assert_eq!(pending.total_pages, 3);
        assert!(pending.records.iter().all(|e| !e.is_approved));

        let last = book.list(3, ModerationFilter::Pending).await.unwrap();
        assert_eq!(last.records.len(), 1);

        let all = book.list(1, ModerationFilter::All).await.unwrap();
        assert_eq!(all.total_items, 7);
        assert_eq!(book.pending_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn reject_removes_the_entry() {
        let book = Guestbook::new(Arc::new(InMemoryStore::new()), 10);
        let e = book.sign(&entry("Spam")).await.unwrap();
        book.reject(&e.id).await.unwrap();
        assert_eq!(book.pending_count().await.unwrap(), 0);
        assert!(book.reject(&e.id).await.unwrap_err().is_not_found());
        assert!(book.approve(&e.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn blank_submissions_are_invalid() {
        let book = Guestbook::new(Arc::new(InMemoryStore::new()), 10);
        let err = book
            .sign(&NewGuestBookEntry {
                name: "Budi".to_string(),
                message: "   ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "message"));
    }
}
