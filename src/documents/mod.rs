// Document loading module
// Turns the files of the archive folder into text documents ready for chunking

pub mod encoding;
mod pdf;


use itertools::Itertools;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::documents::encoding::{decode_lossy, detect_encoding};

/// File extensions the loader understands, matched case-insensitively
pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".pdf", ".txt", ".md", ".html", ".csv"];

/// Metadata carried by a document and inherited by its chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    /// Lower-cased extension including the dot, e.g. `.pdf`
    pub file_type: String,
    pub encoding: Option<String>,
    pub file_path: Option<PathBuf>,
    /// 1-based page number for documents extracted from a PDF page
    pub page_label: Option<String>,
}

/// Extracted text of one source file (or one PDF page)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// A supported file found in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub name: String,
    pub file_type: String,
    pub size_bytes: u64,
}

/// Summary of the supported files in the archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub by_type: BTreeMap<String, usize>,
    pub files: Vec<ArchiveFile>,
}

impl ArchiveStats {
    #[inline]
    pub fn total_size_mb(&self) -> f64 {
        bytes_to_mb(self.total_size_bytes)
    }
}

#[inline]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Lower-cased extension of `path` including the leading dot
#[inline]
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// Whether the loader can read `path`
#[inline]
pub fn is_supported_file(path: &Path) -> bool {
    file_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Loads documents from the archive folder
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    archive_dir: PathBuf,
}

impl DocumentLoader {
    #[inline]
    pub fn new<P: Into<PathBuf>>(archive_dir: P) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    #[inline]
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Load every supported file of the archive, in sorted order.
    ///
    /// Unreadable files are logged and skipped; a missing archive yields no
    /// documents.
    #[inline]
    pub fn load_all_documents(&self) -> Vec<Document> {
        let files = match self.supported_files() {
            Ok(files) => files,
            Err(e) => {
                error!(
                    "Archive directory {} is not readable: {}",
                    self.archive_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        if files.is_empty() {
            warn!("No supported files found in {}", self.archive_dir.display());
            return Vec::new();
        }

        info!("Found {} files to load", files.len());

        let mut all_documents = Vec::new();
        for file_path in files {
            let documents = self.load_document(&file_path);
            info!(
                "Loaded {} document(s) from {}",
                documents.len(),
                display_name(&file_path)
            );
            all_documents.extend(documents);
        }

        info!("Total documents loaded: {}", all_documents.len());
        all_documents
    }

    /// Load a single file, dispatching on its extension.
    ///
    /// Never fails: problems are logged and produce an empty vector.
    #[inline]
    pub fn load_document(&self, file_path: &Path) -> Vec<Document> {
        if !file_path.exists() {
            error!("File not found: {}", file_path.display());
            return Vec::new();
        }

        let Some(extension) = file_extension(file_path).filter(|_| is_supported_file(file_path))
        else {
            warn!(
                "Unsupported file type: {}",
                file_extension(file_path).unwrap_or_else(|| "(none)".to_string())
            );
            return Vec::new();
        };

        debug!("Loading document: {}", display_name(file_path));

        let result = match extension.as_str() {
            ".pdf" => pdf::load_pdf_file(file_path),
            ".csv" => load_csv_file(file_path),
            ".html" => load_html_file(file_path),
            _ => load_text_file(file_path, &extension),
        };

        match result {
            Ok(documents) => documents,
            Err(e) => {
                error!("Error loading file {}: {:#}", file_path.display(), e);
                Vec::new()
            }
        }
    }

    /// Supported files of the archive, sorted and de-duplicated
    #[inline]
    pub fn supported_files(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.archive_dir.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "archive directory does not exist",
            ));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)? {
            let path = entry?.path();
            if path.is_file() && is_supported_file(&path) {
                files.push(path);
            }
        }

        Ok(files.into_iter().sorted().dedup().collect())
    }

    /// Statistics about the supported files currently in the archive
    #[inline]
    pub fn archive_stats(&self) -> ArchiveStats {
        let mut stats = ArchiveStats::default();

        let Ok(files) = self.supported_files() else {
            return stats;
        };

        for path in files {
            let size_bytes = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("Could not stat {}: {}", path.display(), e);
                    continue;
                }
            };
            let file_type = file_extension(&path).unwrap_or_default();

            stats.total_files += 1;
            stats.total_size_bytes += size_bytes;
            *stats.by_type.entry(file_type.clone()).or_insert(0) += 1;
            stats.files.push(ArchiveFile {
                name: display_name(&path),
                file_type,
                size_bytes,
            });
        }

        stats
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn metadata_for(file_path: &Path, file_type: &str, encoding: Option<String>) -> DocumentMetadata {
    DocumentMetadata {
        file_name: display_name(file_path),
        file_type: file_type.to_string(),
        encoding,
        file_path: Some(file_path.to_path_buf()),
        page_label: None,
    }
}

/// Read a file and decode it with the detected encoding
fn read_decoded(file_path: &Path) -> anyhow::Result<(String, String)> {
    let bytes = fs::read(file_path)?;
    let encoding = detect_encoding(&bytes);
    let text = decode_lossy(&bytes, &encoding);
    Ok((text, encoding))
}

fn load_text_file(file_path: &Path, extension: &str) -> anyhow::Result<Vec<Document>> {
    let (text, encoding) = read_decoded(file_path)?;

    Ok(vec![Document {
        text,
        metadata: metadata_for(file_path, extension, Some(encoding)),
    }])
}

fn load_csv_file(file_path: &Path) -> anyhow::Result<Vec<Document>> {
    let (content, encoding) = read_decoded(file_path)?;

    // Rows stay as raw text; the header tells the model it is tabular
    let text = format!("CSV File: {}\n\n{}", display_name(file_path), content);

    Ok(vec![Document {
        text,
        metadata: metadata_for(file_path, ".csv", Some(encoding)),
    }])
}

fn load_html_file(file_path: &Path) -> anyhow::Result<Vec<Document>> {
    let (html, encoding) = read_decoded(file_path)?;

    let extracted = html_to_text(&html);
    let text = if extracted.trim().is_empty() {
        html
    } else {
        extracted
    };

    Ok(vec![Document {
        text,
        metadata: metadata_for(file_path, ".html", Some(encoding)),
    }])
}

/// Visible text of an HTML document, one text node per line
#[inline]
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    document
        .tree
        .nodes()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element().map(|e| e.name().to_string()))
                .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
            if hidden {
                return None;
            }
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .join("\n")
}
