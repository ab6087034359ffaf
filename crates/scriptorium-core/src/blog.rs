//! Blog posts and their moderated comments.
//!
//! Public reads attach approved comments only, oldest first. Admin reads see
//! every comment, newest first. Comment lookups for a page of posts are
//! issued concurrently and joined before the page is returned.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{from_row, to_row, BlogPost, BlogPostFields, Comment, NewComment};
use crate::moderation::{ModerationFilter, APPROVAL_COLUMN};
use crate::pagination::{fetch_page, Page, PageRequest};
use crate::store::{count_rows, fetch_by_id, Backend, Predicate, Query, Row, Table};

const POSTS: Table = Table::BlogPosts;
const COMMENTS: Table = Table::Comments;

/// Column linking a comment to its post.
pub const POST_ID_COLUMN: &str = "post_id";

/// A post as listed in the admin panel, with its comment tallies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    #[serde(flatten)]
    pub post: BlogPost,
    pub approved_comments: u64,
    pub total_comments: u64,
}

/// Outcome of deleting a post and its comments.
///
/// The two steps are independent: comments go first, then the post. A
/// comment failure is recorded here and does not stop the post deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub post_id: String,
    pub comments_deleted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_error: Option<String>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.comment_error.is_none()
    }
}

fn validate_post(fields: &BlogPostFields) -> Result<()> {
    if fields.title.trim().is_empty() {
        return Err(Error::validation("title", "must not be empty"));
    }
    if fields.content.trim().is_empty() {
        return Err(Error::validation("content", "must not be empty"));
    }
    Ok(())
}

fn validate_comment(comment: &NewComment) -> Result<()> {
    if comment.author.trim().is_empty() {
        return Err(Error::validation("author", "must not be empty"));
    }
    if comment.text.trim().is_empty() {
        return Err(Error::validation("text", "must not be empty"));
    }
    Ok(())
}

fn decode_post(row: Row) -> Result<BlogPost> {
    from_row(POSTS, row)
}

fn decode_comments(rows: Vec<Row>) -> Result<Vec<Comment>> {
    rows.into_iter().map(|r| from_row(COMMENTS, r)).collect()
}

/// Entity access for `blog_posts` and `comments`.
#[derive(Clone)]
pub struct Blog {
    backend: Arc<dyn Backend>,
    page_size: u32,
}

impl Blog {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn post_page(&self, page: u32) -> Result<Page<BlogPost>> {
        let request = PageRequest::new(page, self.page_size);
        let rows = fetch_page(
            self.backend.as_ref(),
            POSTS,
            Query::new().newest_first(POSTS),
            request,
        )
        .await?;
        rows.try_map(decode_post)
    }

    async fn approved_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let query = Query::new()
            .eq(POST_ID_COLUMN, post_id)
            .eq(APPROVAL_COLUMN, true)
            .oldest_first(COMMENTS);
        let selection = self.backend.select(COMMENTS, &query).await?;
        decode_comments(selection.rows)
    }

    /// Public comments for a post; a failed lookup yields none.
    async fn approved_comments_or_empty(&self, post_id: &str) -> Vec<Comment> {
        match self.approved_comments(post_id).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(post_id, error = %e, "could not load comments; showing none");
                Vec::new()
            }
        }
    }

    async fn all_comments_or_empty(&self, post_id: &str) -> Vec<Comment> {
        match self.comments_for_post(post_id, ModerationFilter::All).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(post_id, error = %e, "could not load comments; showing none");
                Vec::new()
            }
        }
    }

    /// Public listing: a page of posts, newest first, each with its
    /// approved comments attached.
    pub async fn list_posts(&self, page: u32) -> Result<Page<BlogPost>> {
        let mut posts = self.post_page(page).await?;
        let comments = join_all(
            posts
                .records
                .iter()
                .map(|p| self.approved_comments_or_empty(&p.id)),
        )
        .await;
        for (post, comments) in posts.records.iter_mut().zip(comments) {
            post.comments = comments;
        }
        Ok(posts)
    }

    /// Admin listing: a page of posts with approved and total comment counts.
    pub async fn list_posts_with_counts(&self, page: u32) -> Result<Page<PostSummary>> {
        let posts = self.post_page(page).await?;
        let counts = join_all(posts.records.iter().map(|p| async move {
            let total = count_rows(
                self.backend.as_ref(),
                COMMENTS,
                Query::new().eq(POST_ID_COLUMN, p.id.as_str()),
            );
            let approved = count_rows(
                self.backend.as_ref(),
                COMMENTS,
                Query::new()
                    .eq(POST_ID_COLUMN, p.id.as_str())
                    .eq(APPROVAL_COLUMN, true),
            );
            let (total, approved) = futures::join!(total, approved);
            Ok::<_, Error>((approved?, total?))
        }))
        .await;

        let mut counts = counts.into_iter();
        posts.try_map(|post| {
            let (approved_comments, total_comments) = counts
                .next()
                .unwrap_or(Ok((0, 0)))?;
            Ok(PostSummary {
                post,
                approved_comments,
                total_comments,
            })
        })
    }

    async fn find_post(&self, id: &str) -> Result<BlogPost> {
        let row = fetch_by_id(self.backend.as_ref(), POSTS, id)
            .await?
            .ok_or_else(|| Error::not_found("blog post", id))?;
        decode_post(row)
    }

    /// A single post with its approved comments.
    pub async fn get_post(&self, id: &str) -> Result<BlogPost> {
        let mut post = self.find_post(id).await?;
        post.comments = self.approved_comments_or_empty(id).await;
        Ok(post)
    }

    /// A single post with every comment, pending ones included.
    pub async fn get_post_for_admin(&self, id: &str) -> Result<BlogPost> {
        let mut post = self.find_post(id).await?;
        post.comments = self.all_comments_or_empty(id).await;
        Ok(post)
    }

    pub async fn create_post(&self, fields: &BlogPostFields) -> Result<BlogPost> {
        validate_post(fields)?;
        let stored = self.backend.insert(POSTS, to_row(POSTS, fields)?).await?;
        let post = decode_post(stored)?;
        info!(id = %post.id, title = %post.fields.title, "blog post created");
        Ok(post)
    }

    /// Replaces the editable fields of a post. The publish date is kept.
    pub async fn update_post(&self, id: &str, fields: &BlogPostFields) -> Result<BlogPost> {
        validate_post(fields)?;
        let mut patch = to_row(POSTS, fields)?;
        patch
            .entry("thumbnailUrl".to_string())
            .or_insert(Value::Null);
        let stored = self
            .backend
            .update(POSTS, id, patch)
            .await?
            .ok_or_else(|| Error::not_found("blog post", id))?;
        info!(id, "blog post updated");
        let mut post = decode_post(stored)?;
        post.comments = self.all_comments_or_empty(id).await;
        Ok(post)
    }

    /// Deletes a post's comments, then the post.
    ///
    /// Returns not-found when no post had that id (after still clearing any
    /// comments that referenced it).
    pub async fn delete_post(&self, id: &str) -> Result<CascadeReport> {
        let mut report = CascadeReport {
            post_id: id.to_string(),
            comments_deleted: 0,
            comment_error: None,
        };
        match self
            .backend
            .delete(COMMENTS, &[Predicate::eq(POST_ID_COLUMN, id)])
            .await
        {
            Ok(n) => report.comments_deleted = n,
            Err(e) => {
                warn!(post_id = id, error = %e, "comment cleanup failed; deleting post anyway");
                report.comment_error = Some(e.to_string());
            }
        }

        let removed = self.backend.delete(POSTS, &[Predicate::eq("id", id)]).await?;
        if removed == 0 {
            return Err(Error::not_found("blog post", id));
        }
        info!(
            id,
            comments = report.comments_deleted,
            complete = report.is_complete(),
            "blog post deleted"
        );
        Ok(report)
    }

    /// Public comment submission. The comment always starts pending.
    pub async fn add_comment(&self, post_id: &str, comment: &NewComment) -> Result<Comment> {
        validate_comment(comment)?;
        self.find_post(post_id).await?;
        let mut row = to_row(COMMENTS, comment)?;
        row.insert(POST_ID_COLUMN.to_string(), Value::from(post_id));
        row.insert(APPROVAL_COLUMN.to_string(), Value::Bool(false));
        let stored = self.backend.insert(COMMENTS, row).await?;
        let comment: Comment = from_row(COMMENTS, stored)?;
        info!(id = %comment.id, post_id, "comment submitted for moderation");
        Ok(comment)
    }

    pub async fn approve_comment(&self, id: &str) -> Result<Comment> {
        let mut patch = Row::new();
        patch.insert(APPROVAL_COLUMN.to_string(), Value::Bool(true));
        let stored = self
            .backend
            .update(COMMENTS, id, patch)
            .await?
            .ok_or_else(|| Error::not_found("comment", id))?;
        info!(id, "comment approved");
        from_row(COMMENTS, stored)
    }

    pub async fn delete_comment(&self, id: &str) -> Result<()> {
        let removed = self
            .backend
            .delete(COMMENTS, &[Predicate::eq("id", id)])
            .await?;
        if removed == 0 {
            return Err(Error::not_found("comment", id));
        }
        info!(id, "comment deleted");
        Ok(())
    }

    pub async fn get_comment(&self, id: &str) -> Result<Comment> {
        let row = fetch_by_id(self.backend.as_ref(), COMMENTS, id)
            .await?
            .ok_or_else(|| Error::not_found("comment", id))?;
        from_row(COMMENTS, row)
    }

    /// Admin view of a post's comments, newest first.
    pub async fn comments_for_post(
        &self,
        post_id: &str,
        filter: ModerationFilter,
    ) -> Result<Vec<Comment>> {
        let query = filter
            .apply(Query::new().eq(POST_ID_COLUMN, post_id))
            .newest_first(COMMENTS);
        let selection = self.backend.select(COMMENTS, &query).await?;
        decode_comments(selection.rows)
    }

    pub async fn pending_comment_count(&self) -> Result<u64> {
        let query = ModerationFilter::Pending.apply(Query::new());
        Ok(count_rows(self.backend.as_ref(), COMMENTS, query).await?)
    }

    pub async fn count_posts(&self) -> Result<u64> {
        Ok(count_rows(self.backend.as_ref(), POSTS, Query::new()).await?)
    }
}
