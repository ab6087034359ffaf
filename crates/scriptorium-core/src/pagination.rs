//! Paginated, filtered list access shared by every list view.
//!
//! A page is requested from the backend as one half-open row range plus an
//! exact count of the filtered set, so the rows and the pager metadata are
//! computed from the same predicates and nothing beyond one page is ever
//! materialized.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::store::{Backend, Query, Row, Table};

/// A 1-based page number with its page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    /// Page 0 is treated as page 1 and a size of 0 as 1.
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: page.max(1),
            size: size.max(1),
        }
    }

    /// Zero-based half-open row range `[(page-1)*size, page*size)`.
    pub fn range(&self) -> Range<u64> {
        let size = u64::from(self.size);
        let start = (u64::from(self.page) - 1) * size;
        start..start + size
    }
}

/// `ceil(total_items / page_size)`, zero when there are no items.
pub fn total_pages(total_items: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    total_items.div_ceil(size)
}

/// One page of records plus what a pager needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total_pages: u64,
    pub total_items: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            records: Vec::new(),
            total_pages: 0,
            total_items: 0,
            page: request.page,
            page_size: request.size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            records: self.records.into_iter().map(f).collect(),
            total_pages: self.total_pages,
            total_items: self.total_items,
            page: self.page,
            page_size: self.page_size,
        }
    }

    /// Like [`map`](Page::map) but stops at the first failing record.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        let records = self.records.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(Page {
            records,
            total_pages: self.total_pages,
            total_items: self.total_items,
            page: self.page,
            page_size: self.page_size,
        })
    }

    pub fn pager(&self) -> Option<PagerWindow> {
        PagerWindow::new(self.page, self.total_pages)
    }
}

/// Runs `query` restricted to the requested page with an exact count.
///
/// The query's predicates, search, and ordering are kept; any range or count
/// setting on it is replaced. Pages past the end come back empty with the
/// true totals.
pub async fn fetch_page(
    backend: &dyn Backend,
    table: Table,
    query: Query,
    request: PageRequest,
) -> Result<Page<Row>, BackendError> {
    let query = query.range(request.range()).exact_count();
    let selection = backend.select(table, &query).await?;
    let total_items = selection.total.ok_or_else(|| {
        BackendError::Schema(format!("{table}: backend returned no row count"))
    })?;
    Ok(Page {
        records: selection.rows,
        total_pages: total_pages(total_items, request.size),
        total_items,
        page: request.page,
        page_size: request.size,
    })
}

/// Maximum number of numbered links in a pager.
pub const PAGER_LINKS: u64 = 5;

/// A numbered link or a gap marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PagerItem {
    Page { number: u64, current: bool },
    Ellipsis,
}

/// The links a pager control shows for the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerWindow {
    pub items: Vec<PagerItem>,
    pub has_previous: bool,
    pub has_next: bool,
}

impl PagerWindow {
    /// `None` when there is at most one page.
    pub fn new(current: u32, total_pages: u64) -> Option<Self> {
        if total_pages <= 1 {
            return None;
        }
        let current = u64::from(current.max(1));
        let before = PAGER_LINKS / 2;
        let after = PAGER_LINKS.div_ceil(2) - 1;

        let (start, end) = if total_pages <= PAGER_LINKS {
            (1, total_pages)
        } else if current <= before {
            (1, PAGER_LINKS)
        } else if current + after >= total_pages {
            (total_pages - PAGER_LINKS + 1, total_pages)
        } else {
            (current - before, current + after)
        };

        let mut items = Vec::new();
        if start > 1 {
            items.push(PagerItem::Page {
                number: 1,
                current: current == 1,
            });
            if start > 2 {
                items.push(PagerItem::Ellipsis);
            }
        }
        for number in start..=end {
            items.push(PagerItem::Page {
                number,
                current: number == current,
            });
        }
        if end < total_pages {
            if end < total_pages - 1 {
                items.push(PagerItem::Ellipsis);
            }
            items.push(PagerItem::Page {
                number: total_pages,
                current: current == total_pages,
            });
        }

        Some(Self {
            items,
            has_previous: current > 1,
            has_next: current < total_pages,
        })
    }

    /// Numbered links in display order, without gap markers.
    pub fn numbers(&self) -> Vec<u64> {
        self.items
            .iter()
            .filter_map(|item| match item {
                PagerItem::Page { number, .. } => Some(*number),
                PagerItem::Ellipsis => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;
    use std::collections::HashSet;

    async fn store_with(n: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        for i in 0..n {
            let row = json!({
                "id": format!("gb-{i:03}"),
                "name": format!("Tamu {i}"),
                "message": "Salam",
                "date": format!("2024-01-{:02}T00:00:00Z", (i % 28) + 1),
                "isApproved": true,
            });
            store
                .insert(Table::GuestbookEntries, row.as_object().unwrap().clone())
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn range_is_half_open() {
        assert_eq!(PageRequest::new(1, 10).range(), 0..10);
        assert_eq!(PageRequest::new(3, 5).range(), 10..15);
        assert_eq!(PageRequest::new(0, 5).range(), 0..5);
    }

    #[test]
    fn total_pages_is_ceiling() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        for total in 0..50u64 {
            for size in 1..12u32 {
                let pages = total_pages(total, size);
                assert_eq!(pages == 0, total == 0);
                assert!(pages * u64::from(size) >= total);
                assert!(pages == 0 || (pages - 1) * u64::from(size) < total);
            }
        }
    }

    #[tokio::test]
    async fn page_lengths_follow_the_formula() {
        let store = store_with(23).await;
        for size in [1u32, 5, 10, 23, 30] {
            for page in 1..=6u32 {
                let req = PageRequest::new(page, size);
                let got = fetch_page(
                    &store,
                    Table::GuestbookEntries,
                    Query::new().newest_first(Table::GuestbookEntries),
                    req,
                )
                .await
                .unwrap();
                let offset = u64::from(page - 1) * u64::from(size);
                let expected = u64::from(size).min(23u64.saturating_sub(offset));
                assert_eq!(got.records.len() as u64, expected, "page {page} size {size}");
                assert_eq!(got.total_items, 23);
                assert_eq!(got.total_pages, total_pages(23, size));
            }
        }
    }

    #[tokio::test]
    async fn concatenated_pages_cover_everything_once() {
        let store = store_with(37).await;
        let size = 5;
        let first = fetch_page(
            &store,
            Table::GuestbookEntries,
            Query::new().newest_first(Table::GuestbookEntries),
            PageRequest::new(1, size),
        )
        .await
        .unwrap();

        let mut all = Vec::new();
        for page in 1..=first.total_pages as u32 {
            let got = fetch_page(
                &store,
                Table::GuestbookEntries,
                Query::new().newest_first(Table::GuestbookEntries),
                PageRequest::new(page, size),
            )
            .await
            .unwrap();
            all.extend(got.records);
        }

        assert_eq!(all.len() as u64, first.total_items);
        let ids: HashSet<_> = all.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids.len(), all.len());
        for pair in all.windows(2) {
            let a = (pair[0]["date"].as_str().unwrap(), pair[0]["id"].as_str().unwrap());
            let b = (pair[1]["date"].as_str().unwrap(), pair[1]["id"].as_str().unwrap());
            assert!(a > b, "{a:?} should precede {b:?}");
        }
    }

    #[tokio::test]
    async fn empty_table_has_zero_pages() {
        let store = InMemoryStore::new();
        let got = fetch_page(&store, Table::Comments, Query::new(), PageRequest::new(1, 10))
            .await
            .unwrap();
        assert!(got.records.is_empty());
        assert_eq!(got.total_pages, 0);
        assert!(got.pager().is_none());
    }

    #[test]
    fn pager_hidden_for_single_page() {
        assert!(PagerWindow::new(1, 0).is_none());
        assert!(PagerWindow::new(1, 1).is_none());
    }

    #[test]
    fn pager_shows_all_links_when_few_pages() {
        let w = PagerWindow::new(2, 4).unwrap();
        assert_eq!(w.numbers(), vec![1, 2, 3, 4]);
        assert!(!w.items.contains(&PagerItem::Ellipsis));
        assert!(w.has_previous && w.has_next);
    }

    #[test]
    fn pager_window_slides_with_ellipses() {
        let start = PagerWindow::new(1, 10).unwrap();
        assert_eq!(start.numbers(), vec![1, 2, 3, 4, 5, 10]);
        assert!(!start.has_previous);

        let middle = PagerWindow::new(6, 10).unwrap();
        assert_eq!(middle.numbers(), vec![1, 4, 5, 6, 7, 8, 10]);
        assert_eq!(middle.items[1], PagerItem::Ellipsis);
        assert!(middle.items.contains(&PagerItem::Page {
            number: 6,
            current: true
        }));

        let end = PagerWindow::new(10, 10).unwrap();
        assert_eq!(end.numbers(), vec![1, 6, 7, 8, 9, 10]);
        assert!(!end.has_next);
    }

    #[test]
    fn pager_omits_ellipsis_for_adjacent_ends() {
        let w = PagerWindow::new(4, 6).unwrap();
        assert_eq!(w.numbers(), vec![1, 2, 3, 4, 5, 6]);
        assert!(!w.items.contains(&PagerItem::Ellipsis));
    }
}
