//! State held by a paginated list view between fetches.
//!
//! Every fetch is started with [`ListView::begin`], which hands out a
//! [`Ticket`]. Only the ticket of the most recent fetch may update the view;
//! a response that arrives after the user moved on is discarded.

use std::fmt::Display;

use crate::pagination::{Page, PagerWindow};

/// Identifies one fetch started by a [`ListView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Parameters a fetch should be issued with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: Ticket,
    pub page: u32,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListView<T> {
    page: u32,
    search: String,
    loading: bool,
    error: Option<String>,
    current: Option<Page<T>>,
    generation: u64,
}

impl<T> Default for ListView<T> {
    fn default() -> Self {
        Self {
            page: 1,
            search: String::new(),
            loading: false,
            error: None,
            current: None,
            generation: 0,
        }
    }
}

impl<T> ListView<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The last page that loaded successfully.
    pub fn current(&self) -> Option<&Page<T>> {
        self.current.as_ref()
    }

    pub fn records(&self) -> &[T] {
        self.current
            .as_ref()
            .map(|p| p.records.as_slice())
            .unwrap_or_default()
    }

    pub fn pager(&self) -> Option<PagerWindow> {
        self.current.as_ref().and_then(Page::pager)
    }

    /// Starts a fetch for the current page and search text.
    pub fn begin(&mut self) -> FetchRequest {
        self.generation += 1;
        self.loading = true;
        self.error = None;
        let search = self.search.trim();
        FetchRequest {
            ticket: Ticket(self.generation),
            page: self.page,
            search: (!search.is_empty()).then(|| search.to_string()),
        }
    }

    pub fn go_to(&mut self, page: u32) -> FetchRequest {
        self.page = page.max(1);
        self.begin()
    }

    /// New search text always starts again from page 1.
    pub fn set_search(&mut self, text: &str) -> FetchRequest {
        self.search = text.to_string();
        self.page = 1;
        self.begin()
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.generation
    }

    /// Applies a fetch result. Returns `false`, changing nothing, when the
    /// ticket is stale. A failure keeps the previously loaded page.
    pub fn resolve<E: Display>(&mut self, ticket: Ticket, result: Result<Page<T>, E>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                self.current = Some(page);
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
        true
    }
}
