use anyhow::Result;

use scriptorium_core::models::Manuscript;
use scriptorium_core::pagination::{Page, PagerItem};
use scriptorium_core::Library;

use crate::backend::open_backend;
use crate::config::Config;

/// `scriptorium search`: one page of the public catalog, optionally filtered.
pub async fn run_search(config: &Config, query: &str, page: u32) -> Result<()> {
    let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());
    let query = Some(query.trim()).filter(|q| !q.is_empty());
    let results = library.catalog.list(page, query).await?;
    print_page(&results);
    Ok(())
}

fn print_page(results: &Page<Manuscript>) {
    if results.records.is_empty() {
        println!("No results.");
        return;
    }

    let first = (u64::from(results.page) - 1) * u64::from(results.page_size);
    for (i, manuscript) in results.records.iter().enumerate() {
        let fields = &manuscript.fields;
        println!(
            "{}. [{}] {} / {}",
            first + i as u64 + 1,
            fields.inventory_code,
            fields.title,
            fields.author
        );
        println!("    status: {}", fields.availability);
        if !fields.categories.is_empty() {
            println!("    kategori: {}", fields.categories.join(", "));
        }
        println!("    id: {}", manuscript.id);
        println!();
    }

    println!(
        "Page {} of {} ({} manuscripts)",
        results.page, results.total_pages, results.total_items
    );
    if let Some(pager) = results.pager() {
        let links: Vec<String> = pager
            .items
            .iter()
            .map(|item| match item {
                PagerItem::Page { number, current: true } => format!("[{number}]"),
                PagerItem::Page { number, .. } => number.to_string(),
                PagerItem::Ellipsis => "...".to_string(),
            })
            .collect();
        println!(
            "{} {} {}",
            if pager.has_previous { "<" } else { " " },
            links.join(" "),
            if pager.has_next { ">" } else { " " }
        );
    }
}
