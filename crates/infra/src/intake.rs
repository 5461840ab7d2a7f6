//! Upload validation and blob storage.
//!
//! Checks run cheapest first: declared type, size, magic header, then a parse
//! of the leading pages. Only uploads that pass every check are written to disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, instrument};

use docflow_analysis::{extract_text, PdfTextError};
use docflow_core::DocumentId;

use crate::config::IntakeConfig;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("file is corrupted: {0}")]
    Corrupted(String),

    #[error("file is unreadable: {0}")]
    Unreadable(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Raw upload as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A validated upload that has been written to blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
}

/// Validates uploads and stores the accepted ones.
#[async_trait]
pub trait DocumentIntake: Send + Sync {
    async fn validate_and_store(&self, document_id: DocumentId, upload: Upload) -> Result<StoredBlob, IntakeError>;

    /// Remove a stored blob; missing blobs are not an error.
    async fn discard(&self, path: &Path) -> Result<(), IntakeError>;
}

/// PDF intake writing blobs under a local directory.
#[derive(Debug, Clone)]
pub struct PdfIntake {
    config: IntakeConfig,
}

impl PdfIntake {
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// Resolve the effective mime type: the declared one unless it is missing or
    /// generic, in which case it is guessed from the filename.
    fn effective_mime(upload: &Upload) -> String {
        let declared = upload
            .content_type
            .as_deref()
            .map(|c| c.split(';').next().unwrap_or(c).trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty() && c != "application/octet-stream");
        declared.unwrap_or_else(|| {
            mime_guess::from_path(&upload.filename)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string()
        })
    }

    /// All checks short of writing anything.
    pub async fn validate(&self, upload: &Upload) -> Result<String, IntakeError> {
        let mime = Self::effective_mime(upload);
        if !self.config.allowed_mime_types.iter().any(|m| *m == mime) {
            return Err(IntakeError::Unsupported(mime));
        }

        let size = upload.bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(IntakeError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        if size == 0 {
            return Err(IntakeError::Corrupted("empty upload".into()));
        }
        if !upload.bytes.starts_with(PDF_MAGIC) {
            return Err(IntakeError::Corrupted("missing %PDF- header".into()));
        }

        let bytes = upload.bytes.clone();
        let pages = self.config.probe_pages;
        let probe = tokio::task::spawn_blocking(move || extract_text(&bytes, Some(pages)))
            .await
            .map_err(|e| IntakeError::Corrupted(format!("probe aborted: {e}")))?;

        match probe {
            Err(PdfTextError::Parse(msg)) => Err(IntakeError::Corrupted(msg)),
            Err(PdfTextError::NoPages) => Err(IntakeError::Corrupted("document has no pages".into())),
            Ok(texts) if texts.iter().all(|t| t.trim().is_empty()) => Err(IntakeError::Unreadable(format!(
                "no extractable text in the first {pages} page(s)"
            ))),
            Ok(_) => Ok(mime),
        }
    }
}

#[async_trait]
impl DocumentIntake for PdfIntake {
    #[instrument(skip(self, upload), fields(filename = %upload.filename, size = upload.bytes.len()))]
    async fn validate_and_store(&self, document_id: DocumentId, upload: Upload) -> Result<StoredBlob, IntakeError> {
        let mime = self.validate(&upload).await?;

        tokio::fs::create_dir_all(&self.config.upload_dir)
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;
        let path = self
            .config
            .upload_dir
            .join(format!("{document_id}_{}", sanitize_filename(&upload.filename)));
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;
        debug!(path = %path.display(), "stored upload");

        Ok(StoredBlob {
            filename: upload.filename,
            size: upload.bytes.len() as u64,
            path,
            mime,
        })
    }

    async fn discard(&self, path: &Path) -> Result<(), IntakeError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IntakeError::Storage(e.to_string())),
        }
    }
}

/// Keep only a safe basename: no directories, no exotic characters.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.pdf".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream, StringFormat};

    /// A one-page PDF; `text` of `None` produces a page with no text operators.
    pub(crate) fn pdf_bytes(text: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut operations = vec![Operation::new("BT", vec![])];
        for line in text.unwrap_or_default().lines() {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(line.as_bytes().to_vec(), StringFormat::Literal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn upload(name: &str, mime: Option<&str>, bytes: Vec<u8>) -> Upload {
        Upload {
            filename: name.to_string(),
            content_type: mime.map(str::to_string),
            bytes: Bytes::from(bytes),
        }
    }

    fn intake(dir: &Path) -> PdfIntake {
        PdfIntake::new(IntakeConfig {
            upload_dir: dir.to_path_buf(),
            max_upload_bytes: 64 * 1024,
            ..IntakeConfig::default()
        })
    }

    #[tokio::test]
    async fn accepts_and_stores_readable_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let id = DocumentId::new();
        let blob = intake(dir.path())
            .validate_and_store(id, upload("report.pdf", Some("application/pdf"), pdf_bytes(Some("Revenue 100"))))
            .await
            .unwrap();

        assert!(blob.path.starts_with(dir.path()));
        assert!(blob.path.to_string_lossy().contains(&id.to_string()));
        assert_eq!(tokio::fs::read(&blob.path).await.unwrap().len() as u64, blob.size);
    }

    #[tokio::test]
    async fn rejects_disallowed_mime() {
        let dir = tempfile::tempdir().unwrap();
        let err = intake(dir.path())
            .validate_and_store(DocumentId::new(), upload("notes.txt", Some("text/plain"), b"hello".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err, IntakeError::Unsupported("text/plain".into()));
    }

    #[tokio::test]
    async fn guesses_mime_from_extension_when_generic() {
        let dir = tempfile::tempdir().unwrap();
        let res = intake(dir.path())
            .validate(&upload(
                "scan.pdf",
                Some("application/octet-stream"),
                pdf_bytes(Some("Net income 5")),
            ))
            .await;
        assert_eq!(res, Ok("application/pdf".to_string()));
    }

    #[tokio::test]
    async fn rejects_oversized_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(64 * 1024 + 1, b' ');
        let err = intake(dir.path())
            .validate(&upload("big.pdf", Some("application/pdf"), bytes))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn rejects_missing_magic_header() {
        let dir = tempfile::tempdir().unwrap();
        let err = intake(dir.path())
            .validate(&upload("fake.pdf", Some("application/pdf"), b"GIF89a....".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Corrupted(_)));
    }

    #[tokio::test]
    async fn rejects_pdf_without_text_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = intake(dir.path())
            .validate_and_store(DocumentId::new(), upload("blank.pdf", Some("application/pdf"), pdf_bytes(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Unreadable(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn discard_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(intake(dir.path()).discard(&dir.path().join("gone.pdf")).await.is_ok());
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("Q3 report (final).pdf"), "Q3_report__final_.pdf");
        assert_eq!(sanitize_filename("..."), "upload.pdf");
    }
}
