//! # Scriptorium Core
//!
//! Backend-agnostic logic for the Scriptorium manuscript library: data
//! models, the storage trait and its in-memory implementation, paginated
//! list access, the manuscript, blog, and guestbook access modules,
//! moderation, bulk import validation, admin sessions, list view state, and
//! form drafts.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies.

pub mod blog;
pub mod catalog;
pub mod draft;
pub mod error;
pub mod guestbook;
pub mod import;
pub mod library;
pub mod models;
pub mod moderation;
pub mod normalize;
pub mod pagination;
pub mod session;
pub mod store;
pub mod view;

pub use error::{BackendError, Error, Result};
pub use library::{DashboardStats, Library, PageSizes};
