//! Plain-text extraction from PDF content streams.
//!
//! Only text-showing operators (`Tj`, `TJ`, `'`, `"`) are read. Image-only pages
//! yield empty strings, which is what intake uses to reject scanned documents.

use lopdf::content::Operation;
use lopdf::{Document, Object};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfTextError {
    #[error("not a parseable PDF: {0}")]
    Parse(String),

    #[error("PDF has no pages")]
    NoPages,
}

/// Extract text per page, in page order.
///
/// `max_pages` limits how many leading pages are read. Pages whose content
/// stream cannot be decoded contribute an empty string instead of failing the
/// whole document.
pub fn extract_text(bytes: &[u8], max_pages: Option<usize>) -> Result<Vec<String>, PdfTextError> {
    let doc = Document::load_mem(bytes).map_err(|e| PdfTextError::Parse(e.to_string()))?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(PdfTextError::NoPages);
    }

    let take = max_pages.unwrap_or(usize::MAX);
    let mut out = Vec::with_capacity(pages.len().min(take));
    for (page_num, page_id) in pages.into_iter().take(take) {
        match doc.get_and_decode_page_content(page_id) {
            Ok(content) => out.push(text_from_operations(&content.operations)),
            Err(e) => {
                tracing::debug!(page = page_num, error = %e, "could not decode page content");
                out.push(String::new());
            }
        }
    }
    Ok(out)
}

fn text_from_operations(ops: &[Operation]) -> String {
    let mut text = String::new();

    for op in ops {
        match op.operator.as_str() {
            "Tj" => push_strings(&mut text, &op.operands),
            "'" | "\"" => {
                new_line(&mut text);
                if let Some(last) = op.operands.last() {
                    push_strings(&mut text, std::slice::from_ref(last));
                }
            }
            "TJ" => {
                for operand in &op.operands {
                    if let Object::Array(items) = operand {
                        for item in items {
                            match item {
                                Object::String(bytes, _) => text.push_str(&String::from_utf8_lossy(bytes)),
                                // Large negative kerning is how most producers encode a word gap.
                                Object::Integer(n) if *n < -200 => text.push(' '),
                                Object::Real(n) if *n < -200.0 => text.push(' '),
                                _ => {}
                            }
                        }
                    }
                }
            }
            "Td" | "TD" | "T*" | "ET" => new_line(&mut text),
            _ => {}
        }
    }

    text.trim().to_string()
}

fn push_strings(text: &mut String, operands: &[Object]) {
    for operand in operands {
        if let Object::String(bytes, _) = operand {
            text.push_str(&String::from_utf8_lossy(bytes));
        }
    }
}

fn new_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}
