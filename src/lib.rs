//! # Scriptorium
//!
//! Catalog, blog, and guestbook service for a manuscript library.
//!
//! The backend-agnostic logic lives in `scriptorium-core`. This crate adds
//! the native pieces around it: TOML configuration, the SQLite and hosted
//! REST storage backends, admin authentication, xlsx reading for bulk
//! import, file-backed form drafts, the JSON HTTP server, and the
//! `scriptorium` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │  CLI / HTTP  │──▶│ scriptorium-core   │──▶│ Backend          │
//! │  (axum)      │   │ catalog/blog/guest │   │ SQLite/REST/mem  │
//! └──────────────┘   └────────────────────┘   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`backend`] | Opens the configured storage backend |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation and legacy field migration |
//! | [`sqlite_store`] | Local SQLite backend |
//! | [`rest_store`] | Hosted REST backend |
//! | [`auth`] | Admin authentication |
//! | [`xlsx`] | First-worksheet reader for bulk import |
//! | [`drafts`] | File-backed manuscript form drafts |
//! | [`server`] | JSON HTTP server |
//! | [`logging`] | tracing subscriber setup |

pub mod auth;
pub mod backend;
pub mod bulk_import;
pub mod config;
pub mod db;
pub mod drafts;
pub mod get;
pub mod logging;
pub mod migrate;
pub mod rest_store;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod xlsx;
