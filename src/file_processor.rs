use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm_providers::DocumentTextExtractor;
use crate::models::UploadFileRequest;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_IMAGE_PREFIX: &str = "image/";

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File is too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("File data is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("File name must not be empty")]
    MissingFilename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Pdf,
    Docx,
    Image,
}

impl FileKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime_type = mime_type.trim().to_lowercase();
        match mime_type.as_str() {
            MIME_TEXT => Some(FileKind::PlainText),
            MIME_PDF => Some(FileKind::Pdf),
            MIME_DOCX => Some(FileKind::Docx),
            other if other.len() > MIME_IMAGE_PREFIX.len() && other.starts_with(MIME_IMAGE_PREFIX) => {
                Some(FileKind::Image)
            }
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::PlainText => "Text",
            FileKind::Pdf => "PDF",
            FileKind::Docx => "DOCX",
            FileKind::Image => "Image",
        }
    }

    fn extraction_instruction(self) -> &'static str {
        match self {
            FileKind::PlainText => "",
            FileKind::Pdf => "Extract all text content from this PDF file. Return only the extracted text without any additional formatting or explanations.",
            FileKind::Docx => "This is a DOCX file. Please extract all the text content from this document and return it as plain text. Remove any formatting and return only the readable content.",
            FileKind::Image => "Extract all text content from this image. If there's no text, describe what you see in the image. Return only the extracted text or description without any additional formatting.",
        }
    }

    fn failed_placeholder(self, filename: &str) -> String {
        format!("{} file: {} (content extraction failed)", self.label(), filename)
    }
}

/// An upload that has been decoded and had its text extracted
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub filename: String,
    pub file_type: String,
    pub file_size: usize,
    pub kind: FileKind,
    pub content: String,
}

#[derive(Clone)]
pub struct FileProcessor {
    extractor: Arc<dyn DocumentTextExtractor>,
    max_upload_bytes: usize,
}

impl FileProcessor {
    pub fn new(extractor: Arc<dyn DocumentTextExtractor>, max_upload_bytes: usize) -> Self {
        Self {
            extractor,
            max_upload_bytes,
        }
    }

    pub async fn process(&self, upload: &UploadFileRequest) -> Result<ProcessedFile, FileError> {
        let filename = upload.filename.trim();
        if filename.is_empty() {
            return Err(FileError::MissingFilename);
        }

        let kind = FileKind::from_mime(&upload.mime_type)
            .ok_or_else(|| FileError::UnsupportedType(upload.mime_type.clone()))?;

        // Reject on encoded length first so oversized payloads are never decoded
        let approx_size = upload.data.len() / 4 * 3;
        if approx_size > self.max_upload_bytes + 3 {
            return Err(FileError::TooLarge {
                size: approx_size,
                max: self.max_upload_bytes,
            });
        }

        let bytes = BASE64.decode(upload.data.trim())?;
        if bytes.len() > self.max_upload_bytes {
            return Err(FileError::TooLarge {
                size: bytes.len(),
                max: self.max_upload_bytes,
            });
        }

        let content = match kind {
            FileKind::PlainText => String::from_utf8_lossy(&bytes).into_owned(),
            _ => self.extract_binary(kind, filename, &upload.mime_type, &bytes).await,
        };

        info!(
            filename = %filename,
            file_type = %upload.mime_type,
            file_size = bytes.len(),
            content_length = content.len(),
            "Processed uploaded file"
        );

        Ok(ProcessedFile {
            filename: filename.to_string(),
            file_type: upload.mime_type.trim().to_string(),
            file_size: bytes.len(),
            kind,
            content,
        })
    }

    /// Extraction failures degrade to a placeholder instead of failing the upload
    async fn extract_binary(&self, kind: FileKind, filename: &str, mime_type: &str, bytes: &[u8]) -> String {
        match self
            .extractor
            .extract_text(kind.extraction_instruction(), mime_type.trim(), bytes)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) if kind == FileKind::Image => format!("Image file: {}", filename),
            Ok(_) => {
                warn!(filename = %filename, kind = kind.label(), "Document extraction returned no text");
                String::new()
            }
            Err(e) => {
                warn!(
                    filename = %filename,
                    kind = kind.label(),
                    error = %e,
                    "Document extraction failed, storing placeholder content"
                );
                kind.failed_placeholder(filename)
            }
        }
    }
}
