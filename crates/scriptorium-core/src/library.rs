//! The three access modules bundled over one backend, plus dashboard figures.

use std::sync::Arc;

use serde::Serialize;

use crate::blog::Blog;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::guestbook::Guestbook;
use crate::store::Backend;

/// Page size per list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub manuscripts: u32,
    pub blog_posts: u32,
    pub guestbook: u32,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            manuscripts: 10,
            blog_posts: 5,
            guestbook: 10,
        }
    }
}

/// Counts shown on the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub manuscripts: u64,
    pub blog_posts: u64,
    pub pending_guestbook_entries: u64,
    pub pending_comments: u64,
}

#[derive(Clone)]
pub struct Library {
    pub catalog: Catalog,
    pub blog: Blog,
    pub guestbook: Guestbook,
}

impl Library {
    pub fn new(backend: Arc<dyn Backend>, sizes: PageSizes) -> Self {
        Self {
            catalog: Catalog::new(backend.clone(), sizes.manuscripts),
            blog: Blog::new(backend.clone(), sizes.blog_posts),
            guestbook: Guestbook::new(backend, sizes.guestbook),
        }
    }

    /// Runs the four counts concurrently.
    pub async fn dashboard(&self) -> Result<DashboardStats> {
        let (manuscripts, blog_posts, pending_guestbook_entries, pending_comments) =
            futures::try_join!(
                self.catalog.count(),
                self.blog.count_posts(),
                self.guestbook.pending_count(),
                self.blog.pending_comment_count(),
            )?;
        Ok(DashboardStats {
            manuscripts,
            blog_posts,
            pending_guestbook_entries,
            pending_comments,
        })
    }
}
