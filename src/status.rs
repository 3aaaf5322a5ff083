//! `rgl status` output: the document registry at a glance.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::ingest::list_documents;
use crate::models::IngestStatus;

pub async fn run_status(pool: &SqlitePool) -> Result<()> {
    let documents = list_documents(pool).await?;
    if documents.is_empty() {
        println!("No documents registered. Run `rgl ingest --all` to index a source.");
        return Ok(());
    }

    let mut indexed = 0usize;
    let mut failed = 0usize;

    println!(
        "{:<40} {:<10} {:>7}  {}",
        "SOURCE", "STATUS", "CHUNKS", "DETAIL"
    );
    for doc in &documents {
        let detail = match doc.status {
            IngestStatus::Failed => {
                failed += 1;
                let step = doc.failed_step.as_deref().unwrap_or("?");
                let error = doc.error.as_deref().unwrap_or("unknown error");
                format!("{step}: {error}")
            }
            IngestStatus::Indexed => {
                indexed += 1;
                String::new()
            }
            _ => String::new(),
        };
        println!(
            "{:<40} {:<10} {:>7}  {}",
            doc.source_key,
            doc.status.as_str(),
            doc.chunk_count,
            detail
        );
    }

    println!();
    println!(
        "{} documents: {} indexed, {} failed",
        documents.len(),
        indexed,
        failed
    );
    Ok(())
}
