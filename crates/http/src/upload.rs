//! Multipart payload decoding.
//!
//! The dispatch core is synchronous, so multipart bodies are decoded at the
//! transport boundary (where we are already async) and attached to the
//! request envelope as a [`FormPayload`]: plain fields in encounter order
//! plus uploaded files keyed by field name.

use bytes::Bytes;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{Seek, SeekFrom, Write};

use crate::protocol::ParseError;

/// One uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    content: Bytes,
}

impl UploadedFile {
    pub fn new(field_name: impl Into<String>, file_name: Option<String>, content_type: Option<String>, content: Bytes) -> Self {
        Self { field_name: field_name.into(), file_name, content_type, content }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Spill the content into a fresh temp file, rewound to the start.
    /// The caller owns the handle; dropping it removes the file.
    pub fn spill(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new().prefix("tiller-upload").tempfile()?;
        file.write_all(&self.content)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

/// Decoded multipart (or adapter-supplied) form payload.
#[derive(Debug, Default, Clone)]
pub struct FormPayload {
    values: Vec<(String, String)>,
    files: HashMap<String, Vec<UploadedFile>>,
}

impl FormPayload {
    pub fn push_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.push((name.into(), value.into()));
    }

    pub fn push_file(&mut self, file: UploadedFile) {
        self.files.entry(file.field_name.clone()).or_default().push(file);
    }

    /// Plain (non-file) fields, in encounter order.
    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    pub fn files(&self) -> &HashMap<String, Vec<UploadedFile>> {
        &self.files
    }
}

/// Decode a `multipart/form-data` body, rejecting payloads over `max_size`.
///
/// Fields carrying a filename are collected as [`UploadedFile`]s; everything
/// else is treated as a text value.
pub async fn parse_multipart(content_type: &str, body: Bytes, max_size: u64) -> Result<FormPayload, ParseError> {
    let boundary = multer::parse_boundary(content_type).map_err(|e| ParseError::invalid_header(e.to_string()))?;

    if body.len() as u64 > max_size {
        return Err(ParseError::too_large_body(body.len(), max_size as usize));
    }

    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().whole_stream(max_size));
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

    let mut payload = FormPayload::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| ParseError::invalid_body(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }

        if field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(|m| m.to_string());
            let content = field.bytes().await.map_err(|e| ParseError::invalid_body(e.to_string()))?;
            payload.push_file(UploadedFile::new(name, file_name, content_type, content));
        } else {
            let text = field.text().await.map_err(|e| ParseError::invalid_body(e.to_string()))?;
            payload.push_value(name, text);
        }
    }

    Ok(payload)
}
