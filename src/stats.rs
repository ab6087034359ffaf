//! Catalog statistics for `scriptorium stats`: the admin dashboard figures.

use anyhow::Result;

use scriptorium_core::Library;

use crate::backend::open_backend;
use crate::config::{BackendKind, Config};

/// Run the stats command: query the backend and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());
    let stats = library.dashboard().await?;

    println!("Scriptorium Catalog Stats");
    println!("=========================");
    println!();
    match config.backend.kind {
        BackendKind::Sqlite => {
            let path = &config.db()?.path;
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            println!("  Database:    {}", path.display());
            println!("  Size:        {}", format_bytes(size));
        }
        BackendKind::Rest => println!("  Backend:     {}", config.rest()?.url),
        BackendKind::Memory => println!("  Backend:     in-memory"),
    }
    println!();
    println!("  Manuscripts:               {}", stats.manuscripts);
    println!("  Blog posts:                {}", stats.blog_posts);
    println!("  Pending guestbook entries: {}", stats.pending_guestbook_entries);
    println!("  Pending comments:          {}", stats.pending_comments);
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
