//! Document loading and text extraction.
//!
//! Turns an uploaded file into plain text per page. PDF pages come from
//! `lopdf`; DOCX bodies are read straight out of the zip container.

use crate::types::{DocumentFormat, ExtractedDocument, PageText};
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use synapse_core::{AppError, AppResult};
use walkdir::WalkDir;

/// Load a file and extract its text.
///
/// Every failure is an `Ingestion` error naming the file, so a batch can
/// report it per document and carry on.
pub fn load_document(path: &Path) -> AppResult<ExtractedDocument> {
    let filename = display_name(path);

    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        AppError::ingestion(
            &filename,
            format!(
                "unsupported format (supported: {})",
                DocumentFormat::SUPPORTED_EXTENSIONS.join(", ")
            ),
        )
    })?;

    let bytes = fs::read(path).map_err(|e| AppError::ingestion(&filename, e.to_string()))?;

    let pages = match format {
        DocumentFormat::Text | DocumentFormat::Markdown => vec![PageText {
            number: 1,
            text: decode_utf8(&filename, bytes)?,
        }],
        DocumentFormat::Pdf => extract_pdf_pages(&filename, &bytes)?,
        DocumentFormat::Docx => vec![PageText {
            number: 1,
            text: extract_docx_text(&filename, &bytes)?,
        }],
    };

    tracing::debug!(
        file = %filename,
        format = format.as_str(),
        pages = pages.len(),
        "Extracted document text"
    );

    Ok(ExtractedDocument {
        filename,
        format,
        pages,
    })
}

/// Expand directories into the supported files beneath them.
///
/// Explicit file arguments are kept as given, even when unsupported, so the
/// loader can report them.
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| DocumentFormat::from_path(p).is_some())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    files
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn decode_utf8(filename: &str, bytes: Vec<u8>) -> AppResult<String> {
    String::from_utf8(bytes).map_err(|e| {
        AppError::ingestion(filename, format!("not valid UTF-8 text: {}", e.utf8_error()))
    })
}

fn extract_pdf_pages(filename: &str, bytes: &[u8]) -> AppResult<Vec<PageText>> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| AppError::ingestion(filename, format!("corrupt PDF: {}", e)))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|e| AppError::ingestion(filename, format!("page {}: {}", page_no, e)))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(AppError::ingestion(filename, "PDF has no readable page text"));
    }

    Ok(pages)
}

fn docx_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|</w:p>|<w:tab/>|<w:br/>")
            .unwrap_or_else(|e| unreachable!("static DOCX pattern: {}", e))
    })
}

fn extract_docx_text(filename: &str, bytes: &[u8]) -> AppResult<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| AppError::ingestion(filename, format!("corrupt DOCX container: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::ingestion(filename, format!("missing document body: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| AppError::ingestion(filename, format!("unreadable document body: {}", e)))?;

    Ok(docx_xml_to_text(&xml))
}

/// Join `<w:t>` runs; paragraph ends become blank lines.
fn docx_xml_to_text(xml: &str) -> String {
    let mut text = String::with_capacity(xml.len() / 4);

    for caps in docx_token_regex().captures_iter(xml) {
        match caps.get(1) {
            Some(run) => text.push_str(&unescape_xml(run.as_str())),
            None => match &caps[0] {
                "</w:p>" => text.push_str("\n\n"),
                "<w:tab/>" => text.push('\t'),
                _ => text.push('\n'),
            },
        }
    }

    text.trim().to_string()
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
