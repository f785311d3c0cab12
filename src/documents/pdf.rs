use anyhow::anyhow;
use std::path::Path;
use tracing::{debug, warn};

use super::{Document, metadata_for};

/// Extract a PDF into one document per page that has text.
///
/// `pdf-extract` panics on some malformed files, so the extraction runs
/// under `catch_unwind` and a panic becomes an ordinary error.
pub(super) fn load_pdf_file(file_path: &Path) -> anyhow::Result<Vec<Document>> {
    let pages_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_by_pages(file_path)
    }));

    let pages = match pages_result {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => return Err(anyhow!("Failed to extract PDF text: {}", e)),
        Err(panic_payload) => {
            let panic_msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            return Err(anyhow!("PDF extraction panicked: {}", panic_msg));
        }
    };

    debug!("Extracted {} page(s) from {}", pages.len(), file_path.display());

    let documents: Vec<Document> = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| {
            let mut metadata = metadata_for(file_path, ".pdf", None);
            metadata.page_label = Some((index + 1).to_string());
            Document { text, metadata }
        })
        .collect();

    if documents.is_empty() {
        warn!("No extractable text in {}", file_path.display());
    }

    Ok(documents)
}
