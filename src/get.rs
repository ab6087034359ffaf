//! Manuscript retrieval by ID for `scriptorium get`.

use anyhow::Result;

use scriptorium_core::models::Manuscript;
use scriptorium_core::Library;

use crate::backend::open_backend;
use crate::config::Config;

pub async fn get_manuscript(config: &Config, id: &str) -> Result<Manuscript> {
    let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());
    Ok(library.catalog.get(id).await?)
}

/// CLI entry point: prints the manuscript record to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let manuscript = match get_manuscript(config, id).await {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let f = &manuscript.fields;
    let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    println!("--- Manuscript ---");
    println!("id:                 {}", manuscript.id);
    println!("kodeInventarisasi:  {}", f.inventory_code);
    println!("kodeDigital:        {}", optional(&f.digital_code));
    println!("judul:              {}", f.title);
    println!("pengarang:          {}", f.author);
    println!("penyalin:           {}", optional(&f.transcriber));
    println!("tahunPenyalinan:    {}", optional(&f.year_copied));
    println!("statusKetersediaan: {}", f.availability);
    println!("kelengkapan:        {}", f.completeness);
    println!("keterbacaan:        {}", f.legibility);
    println!("kategori:           {}", f.categories.join(", "));
    println!("bahasa:             {}", f.languages.join(", "));
    println!("aksara:             {}", f.scripts.join(", "));
    println!("jumlahHalaman:      {}", f.page_count);
    println!("tinta:              {}", optional(&f.ink));
    println!("kondisiNaskah:      {}", optional(&f.condition));
    println!("created_at:         {}", manuscript.created_at.to_rfc3339());
    if let Some(updated) = manuscript.updated_at {
        println!("updated_at:         {}", updated.to_rfc3339());
    }
    println!();

    println!("--- Deskripsi ---");
    println!("{}", f.description);
    if let Some(colophon) = &f.colophon {
        println!();
        println!("--- Kolofon ---");
        println!("{}", colophon);
    }
    if let Some(notes) = &f.notes {
        println!();
        println!("--- Catatan ---");
        println!("{}", notes);
    }
    if !f.image_urls.is_empty() || f.drive_folder_url.is_some() {
        println!();
        println!("--- Images ({}) ---", f.image_urls.len());
        for url in &f.image_urls {
            println!("{}", url);
        }
        if let Some(folder) = &f.drive_folder_url {
            println!("folder: {}", folder);
        }
    }

    Ok(())
}
