//! PDF text extraction.
//!
//! Used in two places: the content scanner converts `.pdf` files to plain
//! text before chunking, and the `extract-pdf` command renders a PDF as a
//! Markdown document with one section per page, ready to be dropped into the
//! content directory.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Extract all text from a PDF held in memory.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    guarded(|| pdf_extract::extract_text_from_mem(bytes))
}

/// Extract text page by page, in page order.
pub fn extract_pdf_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    if let Err(source) = std::fs::metadata(path) {
        return Err(ExtractError::Io {
            path: path.display().to_string(),
            source,
        });
    }
    guarded(|| pdf_extract::extract_text_by_pages(path))
}

/// Run a pdf-extract call, turning both its errors and its panics into
/// [`ExtractError::Pdf`]. pdf-extract panics on some malformed documents
/// (e.g. text drawn with a font missing from the page resources).
fn guarded<T, E: std::fmt::Display>(
    extract: impl FnOnce() -> Result<T, E>,
) -> Result<T, ExtractError> {
    match catch_unwind(AssertUnwindSafe(extract)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExtractError::Pdf(format!("extractor panicked: {}", message)))
        }
    }
}

/// Render extracted pages as Markdown.
///
/// ```text
/// # <title>
///
/// **Source PDF**: <file name>
///
/// ## Page 1
///
/// <text>
///
/// ---
/// ```
pub fn render_markdown(title: &str, source_name: &str, pages: &[String]) -> String {
    let mut out = format!("# {}\n\n**Source PDF**: {}\n\n", title, source_name);
    for (i, page) in pages.iter().enumerate() {
        out.push_str(&format!("## Page {}\n\n{}\n\n---\n\n", i + 1, page.trim()));
    }
    out
}

/// Read a PDF from disk and render it as Markdown.
///
/// The title defaults to the file stem.
pub fn pdf_file_to_markdown(path: &Path, title: Option<&str>) -> Result<String, ExtractError> {
    let pages = extract_pdf_pages(path)?;
    tracing::info!(path = %path.display(), pages = pages.len(), "extracted PDF");

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let default_title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source_name.clone());

    Ok(render_markdown(
        title.unwrap_or(&default_title),
        &source_name,
        &pages,
    ))
}

/// A one-page PDF whose content stream selects `/F1` while the page has
/// no font resources.
#[cfg(test)]
pub(crate) fn pdf_without_fonts() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << >> >> endobj\n",
    );
    let o4 = out.len();
    out.extend_from_slice(
        b"4 0 obj << /Length 23 >> stream\nBT /F1 12 Tf (Hi) Tj ET\nendstream endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 5\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 5 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_markdown_sections() {
        let pages = vec!["First page text.\n".to_string(), "Second.".to_string()];
        let md = render_markdown("Proposal", "proposal.pdf", &pages);
        assert!(md.starts_with("# Proposal\n\n**Source PDF**: proposal.pdf\n\n"));
        assert!(md.contains("## Page 1\n\nFirst page text.\n\n---\n\n"));
        assert!(md.contains("## Page 2\n\nSecond.\n\n---\n\n"));
    }

    #[test]
    fn test_render_markdown_no_pages() {
        let md = render_markdown("Empty", "empty.pdf", &[]);
        assert_eq!(md, "# Empty\n\n**Source PDF**: empty.pdf\n\n");
    }

    #[test]
    fn test_invalid_pdf_is_error() {
        let result = extract_pdf_text(b"definitely not a pdf");
        assert!(matches!(result, Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn test_fontless_pdf_is_error_not_panic() {
        let result = extract_pdf_text(&pdf_without_fonts());
        assert!(matches!(result, Err(ExtractError::Pdf(_))), "{:?}", result);
    }

    #[test]
    fn test_fontless_pdf_pages_is_error_not_panic() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fontless.pdf");
        std::fs::write(&path, pdf_without_fonts()).unwrap();
        let result = pdf_file_to_markdown(&path, None);
        assert!(matches!(result, Err(ExtractError::Pdf(_))), "{:?}", result);
    }

    #[test]
    fn test_guarded_maps_panic_to_pdf_error() {
        let result: Result<(), ExtractError> = guarded(|| -> Result<(), String> {
            panic!("Font");
        });
        match result {
            Err(ExtractError::Pdf(message)) => assert!(message.contains("Font")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = pdf_file_to_markdown(Path::new("/nonexistent/file.pdf"), None);
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }
}
